//! CLI instance subcommands: start, show, list, approvals, approve, reject,
//! resume, cancel.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use serde_json::{Map, Value};
use uuid::Uuid;

use hrflow_types::approval::{ApprovalAction, ApprovalRecord, ApprovalStatus};
use hrflow_types::definition::BusinessType;
use hrflow_types::instance::{InstanceFilter, InstanceSnapshot, InstanceStatus};

use crate::cli::flush_notifications;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum InstanceCommand {
    /// Start an instance of the latest active version of a definition.
    Start {
        /// Definition id.
        definition_id: Uuid,

        /// Business object id (employee number, request number).
        #[arg(long)]
        business_id: String,

        /// Who starts the process.
        #[arg(long)]
        initiator: String,

        /// Business type (default: the definition's category).
        #[arg(long)]
        business_type: Option<BusinessType>,

        /// Initial variables as a JSON object.
        #[arg(long)]
        vars: Option<String>,

        /// Single variable as KEY=VALUE (VALUE parsed as JSON, else string).
        #[arg(long = "var")]
        var: Vec<String>,
    },

    /// Show an instance.
    Show { id: Uuid },

    /// List instances, newest first.
    List {
        #[arg(long)]
        status: Option<InstanceStatus>,

        #[arg(long)]
        business_type: Option<BusinessType>,

        #[arg(long)]
        business_id: Option<String>,
    },

    /// Show an instance's approval records.
    Approvals { id: Uuid },

    /// Approve on an Approval node.
    Approve {
        id: Uuid,
        node: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Reject on an Approval node.
    Reject {
        id: Uuid,
        node: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Re-run pending transitions of an instance (after a crash or a
    /// concurrent-modification give-up).
    Resume { id: Uuid },

    /// Cancel a running instance.
    Cancel {
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_instance_command(cmd: InstanceCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        InstanceCommand::Start {
            definition_id,
            business_id,
            initiator,
            business_type,
            vars,
            var,
        } => {
            let variables = parse_variables(vars.as_deref(), &var)?;
            handle_start(definition_id, business_type, &business_id, &initiator, variables, state, json).await
        }
        InstanceCommand::Show { id } => handle_show(id, state, json).await,
        InstanceCommand::List {
            status,
            business_type,
            business_id,
        } => {
            let filter = InstanceFilter {
                status,
                business_type,
                business_id,
            };
            handle_list(&filter, state, json).await
        }
        InstanceCommand::Approvals { id } => handle_approvals(id, state, json).await,
        InstanceCommand::Approve {
            id,
            node,
            approver,
            comment,
        } => handle_decide(id, &node, &approver, ApprovalAction::Approve, comment.as_deref(), state, json).await,
        InstanceCommand::Reject {
            id,
            node,
            approver,
            comment,
        } => handle_decide(id, &node, &approver, ApprovalAction::Reject, comment.as_deref(), state, json).await,
        InstanceCommand::Resume { id } => handle_resume(id, state, json).await,
        InstanceCommand::Cancel { id, reason, force } => {
            handle_cancel(id, reason.as_deref(), force, state, json).await
        }
    }
}

/// Merge `--vars` (a JSON object) with `--var KEY=VALUE` pairs; pairs win.
fn parse_variables(vars: Option<&str>, pairs: &[String]) -> Result<Map<String, Value>> {
    let mut variables = match vars {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid --vars JSON")? {
            Value::Object(map) => map,
            _ => bail!("--vars must be a JSON object"),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("--var expects KEY=VALUE, got '{pair}'");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        variables.insert(key.to_string(), value);
    }
    Ok(variables)
}

fn status_cell(status: InstanceStatus) -> Cell {
    let color = match status {
        InstanceStatus::Running => Color::Yellow,
        InstanceStatus::Completed => Color::Green,
        InstanceStatus::Rejected => Color::Red,
        InstanceStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

fn print_snapshot(snap: &InstanceSnapshot) {
    println!();
    println!("  Instance {}", style(snap.id).cyan());
    println!("  Definition: {} v{}", snap.definition_id, snap.definition_version);
    println!("  Business: {} {}", snap.business_type, snap.business_id);
    println!("  Initiator: {}", snap.initiator_id);
    println!("  Status: {}", style(snap.status).bold());
    if !snap.frontier.is_empty() {
        println!("  Waiting on: {}", snap.frontier.join(", "));
    }
    if let Some(reason) = &snap.cancel_reason {
        println!("  Cancel reason: {reason}");
    }
    if !snap.variables.is_empty() {
        println!("  Variables:");
        for (key, value) in &snap.variables {
            println!("    {key} = {value}");
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

async fn handle_start(
    definition_id: Uuid,
    business_type: Option<BusinessType>,
    business_id: &str,
    initiator: &str,
    variables: Map<String, Value>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let business_type = match business_type {
        Some(b) => b,
        None => {
            state
                .engine
                .get_definition(definition_id, None)
                .await?
                .with_context(|| format!("Definition {definition_id} not found"))?
                .category
        }
    };

    let id = state
        .engine
        .create_instance(definition_id, business_type, business_id, initiator, variables)
        .await?;
    let snap = state
        .engine
        .get_instance(id)
        .await?
        .with_context(|| format!("Instance {id} vanished after creation"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        println!();
        println!("  {} Started instance {}", style("*").green().bold(), style(id).cyan());
        print_snapshot(&snap);
    }

    flush_notifications(state, json).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Show / list / approvals
// ---------------------------------------------------------------------------

async fn handle_show(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let snap = state
        .engine
        .get_instance(id)
        .await?
        .with_context(|| format!("Instance {id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        print_snapshot(&snap);
    }
    Ok(())
}

async fn handle_list(filter: &InstanceFilter, state: &AppState, json: bool) -> Result<()> {
    let instances = state.engine.list_instances(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!("  No instances match.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Business"),
            Cell::new("Initiator"),
            Cell::new("Status"),
            Cell::new("Waiting on"),
            Cell::new("Created"),
        ]);

    for snap in &instances {
        table.add_row(vec![
            Cell::new(snap.id),
            Cell::new(format!("{} {}", snap.business_type, snap.business_id)),
            Cell::new(&snap.initiator_id),
            status_cell(snap.status),
            Cell::new(snap.frontier.join(", ")),
            Cell::new(snap.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn print_records(records: &[ApprovalRecord]) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Approver"),
            Cell::new("Status"),
            Cell::new("Comment"),
            Cell::new("Acted"),
        ]);

    for record in records {
        let color = match record.status {
            ApprovalStatus::Pending => Color::Yellow,
            ApprovalStatus::Approved => Color::Green,
            ApprovalStatus::Rejected => Color::Red,
            ApprovalStatus::Skipped => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(&record.node_id),
            Cell::new(&record.approver_id),
            Cell::new(record.status).fg(color),
            Cell::new(record.comment.as_deref().unwrap_or("")),
            Cell::new(
                record
                    .acted_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!("{table}");
}

async fn handle_approvals(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let records = state.engine.get_approval_records(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!();
        println!("  No approval records for {id}.");
        println!();
    } else {
        print_records(&records);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Approve / reject / cancel
// ---------------------------------------------------------------------------

async fn handle_decide(
    id: Uuid,
    node: &str,
    approver: &str,
    action: ApprovalAction,
    comment: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let snap = state.engine.approve(id, node, approver, action, comment).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        let verb = match action {
            ApprovalAction::Approve => style("approved").green(),
            ApprovalAction::Reject => style("rejected").red(),
        };
        println!();
        println!("  {} {approver} {verb} on '{node}'", style("*").bold());
        print_snapshot(&snap);
    }

    flush_notifications(state, json).await;
    Ok(())
}

async fn handle_resume(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let snap = state.engine.resume_instance(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        print_snapshot(&snap);
    }

    flush_notifications(state, json).await;
    Ok(())
}

async fn handle_cancel(
    id: Uuid,
    reason: Option<&str>,
    force: bool,
    state: &AppState,
    json: bool,
) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Cancel instance {}? Pending approvals will be skipped.",
                style(id).red().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Kept running.");
            return Ok(());
        }
    }

    let snap = state.engine.cancel_instance(id, reason).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        println!();
        println!("  {} Cancelled instance {}", style("*").yellow().bold(), style(id).cyan());
        println!();
    }
    Ok(())
}

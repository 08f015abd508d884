//! CLI definition subcommands: validate, publish, list, show, deactivate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use uuid::Uuid;

use hrflow_core::workflow::definition::{
    DefinitionError, load_definition_file, serialize_definition_yaml, validate_definition,
};
use hrflow_types::definition::{NodeKind, WorkflowDefinition};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum DefinitionCommand {
    /// Check a YAML or JSON definition file without storing it.
    Validate {
        /// Path to the definition file.
        file: PathBuf,
    },

    /// Publish a definition file as a new active version.
    Publish {
        /// Path to the definition file.
        file: PathBuf,

        /// Publish as the next version of this existing definition.
        #[arg(long)]
        id: Option<Uuid>,
    },

    /// List definitions (latest version of each).
    List,

    /// Show one definition.
    #[command(disable_version_flag = true)]
    Show {
        id: Uuid,

        /// Specific version (default: latest).
        #[arg(long)]
        version: Option<u32>,
    },

    /// Mark every version of a definition inactive.
    Deactivate {
        id: Uuid,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_definition_command(cmd: DefinitionCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        DefinitionCommand::Validate { file } => handle_validate(&file, json),
        DefinitionCommand::Publish { file, id } => handle_publish(&file, id, state, json).await,
        DefinitionCommand::List => handle_list(state, json).await,
        DefinitionCommand::Show { id, version } => handle_show(id, version, state, json).await,
        DefinitionCommand::Deactivate { id, force } => handle_deactivate(id, force, state, json).await,
    }
}

fn load(file: &Path) -> Result<WorkflowDefinition> {
    load_definition_file(file).map_err(|e| match e {
        DefinitionError::Parse(msg) => anyhow::anyhow!("Failed to parse {}: {msg}", file.display()),
        other => anyhow::anyhow!("Failed to load {}: {other}", file.display()),
    })
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let def = load(file)?;
    let result = validate_definition(&def);

    if json {
        let out = serde_json::json!({
            "file": file.display().to_string(),
            "name": def.name,
            "valid": result.is_ok(),
            "error": result.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        match &result {
            Ok(()) => {
                println!();
                println!(
                    "  {} '{}' is valid ({} nodes, {} edges)",
                    style("✓").green().bold(),
                    style(&def.name).cyan(),
                    def.nodes.len(),
                    def.edges.len()
                );
                println!();
            }
            Err(e) => {
                println!();
                println!("  {} '{}' is invalid: {e}", style("✗").red().bold(), def.name);
                println!();
            }
        }
    }

    if let Err(e) = result {
        bail!("Definition validation failed: {e}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

async fn handle_publish(file: &Path, id: Option<Uuid>, state: &AppState, json: bool) -> Result<()> {
    let mut def = load(file)?;
    if let Some(id) = id {
        def.id = id;
    }

    let def = state
        .engine
        .publish_definition(def)
        .await
        .with_context(|| format!("Failed to publish {}", file.display()))?;

    if json {
        let out = serde_json::json!({
            "id": def.id,
            "name": def.name,
            "version": def.version,
            "nodes": def.nodes.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Published '{}' version {}",
            style("*").green().bold(),
            style(&def.name).cyan(),
            def.version
        );
        println!("  ID: {}", def.id);
        println!(
            "  Start an instance: {}",
            style(format!("hrflow instance start {} --business-id <id> --initiator <who>", def.id)).dim()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List / show / deactivate
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let defs = state.engine.list_definitions().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No definitions published.");
        println!("  Publish one with: {}", style("hrflow definition publish <file.yaml>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Category"),
            Cell::new("Version"),
            Cell::new("Approvals"),
            Cell::new("Active"),
        ]);

    for def in &defs {
        let approvals = def
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Approval { .. }))
            .count();
        let active = if def.active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(def.id),
            Cell::new(&def.name),
            Cell::new(def.category),
            Cell::new(def.version),
            Cell::new(approvals),
            active,
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn handle_show(id: Uuid, version: Option<u32>, state: &AppState, json: bool) -> Result<()> {
    let def = state
        .engine
        .get_definition(id, version)
        .await?
        .with_context(|| format!("Definition {id} not found"))?;

    println!("{}", render_definition(&def, json)?);
    Ok(())
}

/// JSON for scripts, otherwise the YAML form `definition publish` accepts.
fn render_definition(def: &WorkflowDefinition, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(def)?)
    } else {
        Ok(serialize_definition_yaml(def)?)
    }
}

async fn handle_deactivate(id: Uuid, force: bool, state: &AppState, json: bool) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Deactivate definition {}? No new instances can start from it.",
                style(id).yellow().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.engine.deactivate_definition(id).await?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "active": false }));
    } else {
        println!();
        println!("  {} Deactivated definition {id}", style("*").yellow().bold());
        println!("  Running instances keep their pinned version.");
        println!();
    }
    Ok(())
}

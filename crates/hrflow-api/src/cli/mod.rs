//! CLI command definitions for the `hrflow` binary.
//!
//! Uses clap derive macros. Commands are grouped by noun
//! (`hrflow definition publish`, `hrflow instance approve`).

pub mod dead_letter;
pub mod definition;
pub mod instance;
pub mod pending;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;

use crate::state::AppState;

/// HR workflow orchestration: approvals, routing, and notifications.
#[derive(Parser)]
#[command(name = "hrflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "HRFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate, publish, and inspect workflow definitions.
    #[command(alias = "def")]
    Definition {
        #[command(subcommand)]
        action: definition::DefinitionCommand,
    },

    /// Start, inspect, approve, and cancel workflow instances.
    #[command(alias = "inst")]
    Instance {
        #[command(subcommand)]
        action: instance::InstanceCommand,
    },

    /// Show running instances waiting on an approver.
    Pending {
        /// Approver id.
        approver: String,
    },

    /// List dead-lettered notifications, or requeue one.
    #[command(name = "dead-letters")]
    DeadLetters {
        /// Idempotency key of a dead letter to requeue.
        #[arg(long)]
        requeue: Option<String>,
    },

    /// Start the REST API server and notification dispatcher.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Commands {
    /// Log filter used when `RUST_LOG` is unset.
    pub fn default_filter(&self, verbose: u8, quiet: bool) -> &'static str {
        match verbose {
            0 if quiet => "error",
            0 if matches!(self, Commands::Serve { .. }) => "info",
            0 => "warn",
            1 => "info,hrflow_core=debug,hrflow_infra=debug,hrflow_api=debug",
            _ => "trace",
        }
    }
}

/// Deliver whatever the command just enqueued. Failures stay in the outbox
/// for the next pass or `hrflow serve`.
pub async fn flush_notifications(state: &AppState, json: bool) {
    match state.dispatcher.run_pending().await {
        Ok(report) => {
            if !json && report.delivered + report.dead_lettered > 0 {
                println!(
                    "  {} notifications delivered: {}, dead-lettered: {}",
                    style("~").dim(),
                    report.delivered,
                    report.dead_lettered
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "notification dispatch pass failed"),
    }
}

//! hrflow CLI and REST API entry point.
//!
//! Binary name: `hrflow`
//!
//! Parses CLI arguments, initializes tracing, opens the database and engine,
//! then dispatches to the command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use hrflow_core::event::bus::spawn_audit_log;
use hrflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use hrflow_types::instance::{InstanceFilter, InstanceStatus};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingOptions {
        json: cli.log_json,
        otel: cli.otel,
        default_filter: Some(cli.command.default_filter(cli.verbose, cli.quiet)),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "hrflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Definition { action } => {
            cli::definition::handle_definition_command(action, &state, cli.json).await?;
        }

        Commands::Instance { action } => {
            cli::instance::handle_instance_command(action, &state, cli.json).await?;
        }

        Commands::Pending { approver } => {
            cli::pending::handle_pending(&approver, &state, cli.json).await?;
        }

        Commands::DeadLetters { requeue } => {
            cli::dead_letter::handle_dead_letters(requeue, &state, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            resume_running(&state).await;

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            let cancel = CancellationToken::new();
            let audit = spawn_audit_log(state.engine.event_bus(), cancel.clone());
            let dispatcher = state.dispatcher.clone().spawn(cancel.clone());

            println!(
                "  {} hrflow API listening on {}",
                console::style("*").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  Data: {}", state.data_dir.display());
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            cancel.cancel();
            if let Err(e) = dispatcher.await {
                tracing::warn!(error = %e, "dispatcher task ended abnormally");
            }
            if let Err(e) = audit.await {
                tracing::warn!(error = %e, "audit log task ended abnormally");
            }

            println!("\n  Server stopped.");
        }

        // Handled before state init.
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Finish transitions a previous process may have left half-applied.
async fn resume_running(state: &AppState) {
    let filter = InstanceFilter {
        status: Some(InstanceStatus::Running),
        ..Default::default()
    };
    let running = match state.engine.list_instances(&filter).await {
        Ok(running) => running,
        Err(e) => {
            tracing::warn!(error = %e, "could not list running instances for recovery");
            return;
        }
    };

    for snap in &running {
        if let Err(e) = state.engine.resume_instance(snap.id).await {
            tracing::warn!(instance_id = %snap.id, error = %e, "recovery failed");
        }
    }
    tracing::info!(count = running.len(), "running instances recovered");
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

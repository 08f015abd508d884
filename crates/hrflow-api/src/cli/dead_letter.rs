//! `hrflow dead-letters`: inspect and requeue notifications that exhausted
//! their retry budget.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::cli::flush_notifications;
use crate::state::AppState;

pub async fn handle_dead_letters(requeue: Option<String>, state: &AppState, json: bool) -> Result<()> {
    match requeue {
        Some(key) => handle_requeue(&key, state, json).await,
        None => handle_list(state, json).await,
    }
}

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let dead = state.engine.list_dead_letters().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&dead)?);
        return Ok(());
    }

    if dead.is_empty() {
        println!();
        println!("  {} No dead-lettered notifications.", style("✓").green().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Key").fg(Color::Cyan),
            Cell::new("Channel"),
            Cell::new("Recipients"),
            Cell::new("Attempts"),
            Cell::new("Last error"),
        ]);

    for d in &dead {
        let recipients: Vec<&str> = d.request.recipients.iter().map(String::as_str).collect();
        table.add_row(vec![
            Cell::new(d.key()),
            Cell::new(d.request.channel),
            Cell::new(recipients.join(", ")),
            Cell::new(d.attempts),
            Cell::new(d.last_error.as_deref().unwrap_or("")).fg(Color::Red),
        ]);
    }

    println!("{table}");
    println!("  Requeue with: {}", style("hrflow dead-letters --requeue <key>").dim());
    Ok(())
}

async fn handle_requeue(key: &str, state: &AppState, json: bool) -> Result<()> {
    state.engine.requeue_dead_letter(key).await?;

    if json {
        println!("{}", serde_json::json!({ "key": key, "requeued": true }));
    } else {
        println!();
        println!("  {} Requeued {}", style("*").green().bold(), style(key).cyan());
    }

    flush_notifications(state, json).await;
    Ok(())
}

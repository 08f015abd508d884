//! `hrflow pending <approver>`: an approver's inbox.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub async fn handle_pending(approver: &str, state: &AppState, json: bool) -> Result<()> {
    let waiting = state.engine.get_pending_approvals(approver).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&waiting)?);
        return Ok(());
    }

    if waiting.is_empty() {
        println!();
        println!("  Nothing waiting on {}.", style(approver).cyan());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Instance").fg(Color::Cyan),
            Cell::new("Business"),
            Cell::new("Initiator"),
            Cell::new("Node"),
            Cell::new("Since"),
        ]);

    for snap in &waiting {
        table.add_row(vec![
            Cell::new(snap.id),
            Cell::new(format!("{} {}", snap.business_type, snap.business_id)),
            Cell::new(&snap.initiator_id),
            Cell::new(snap.frontier.join(", ")),
            Cell::new(snap.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!("{table}");
    println!(
        "  Decide with: {}",
        style("hrflow instance approve <instance> <node> --approver <you>").dim()
    );
    Ok(())
}

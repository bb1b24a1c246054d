//! Checkpoint status dashboard.

use anyhow::{Context, Result};
use console::style;

use skillforge_core::repository::checkpoint::CheckpointRepository;

use crate::state::AppState;

/// Display checkpoint counts per status and the machines holding work.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let ctx = state.op_context();
    let counts = ctx
        .run(state.checkpoints.count_by_status())
        .await
        .context("failed to count checkpoints")?;
    let owners = ctx
        .run(state.checkpoints.list_owning_machines())
        .await
        .context("failed to list owning machines")?;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "machine_id": state.machine_id,
            "checkpoints": counts,
            "total": counts.total(),
            "owning_machines": owners,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Skillforge v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Checkpoints ──").dim());
    println!("  Total:       {}", style(counts.total()).bold());
    println!("  In progress: {}", style(counts.in_progress).yellow());
    println!("  Completed:   {}", style(counts.completed).green());
    if counts.failed > 0 {
        println!("  Failed:      {}", style(counts.failed).red());
    }
    if counts.abandoned > 0 {
        println!("  Abandoned:   {}", style(counts.abandoned).dim());
    }
    println!();

    println!("  {}", style("── Owners ──").dim());
    if owners.is_empty() {
        println!("  {}", style("No machine holds in-progress work.").dim());
    }
    for owner in &owners {
        if *owner == state.machine_id {
            println!("  {owner} {}", style("(this machine)").cyan());
        } else {
            println!("  {owner}");
        }
    }
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Machine:  {}", style(&state.machine_id).dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style(&state.database_url).dim());
    println!(
        "  Retention: {}h",
        style(state.config.recovery.retention_hours).dim()
    );
    println!();

    Ok(())
}

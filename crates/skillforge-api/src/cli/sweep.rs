//! Recovery sweep command.
//!
//! The operator names the dead machines; every other owner is treated as
//! live. With `--watch` the sweep repeats on the configured interval until
//! Ctrl-C.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;

use skillforge_core::checkpoint::{RecoverySweeper, SweepReport, spawn_recovery_task};
use skillforge_core::liveness::StaticLiveness;
use skillforge_infra::sqlite::checkpoint::SqliteCheckpointRepository;

use crate::cli::SweepArgs;
use crate::state::AppState;

/// Retention from the flag, else from config.
fn retention_for(args: &SweepArgs, state: &AppState) -> Duration {
    args.retention_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
        .unwrap_or_else(|| state.config.recovery.retention())
}

fn dead_set(args: &SweepArgs) -> BTreeSet<String> {
    args.dead.iter().cloned().collect()
}

/// Run one sweep, or keep sweeping with `--watch`.
pub async fn sweep(state: &AppState, args: SweepArgs, json: bool) -> Result<()> {
    let retention = retention_for(&args, state);
    let dead = dead_set(&args);
    if dead.contains(&state.machine_id) {
        tracing::warn!(machine_id = %state.machine_id, "marking this machine as dead");
    }

    let sweeper = Arc::new(RecoverySweeper::new(
        state.checkpoints.clone(),
        Arc::new(StaticLiveness::all_live_except(dead)),
        retention,
    ));

    if args.watch {
        return watch(state, sweeper).await;
    }

    let report = sweeper
        .sweep(&state.op_context())
        .await
        .context("recovery sweep failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report, retention);
    Ok(())
}

async fn watch(
    state: &AppState,
    sweeper: Arc<RecoverySweeper<SqliteCheckpointRepository, StaticLiveness>>,
) -> Result<()> {
    if !state.config.recovery.enabled {
        anyhow::bail!("recovery is disabled in config.toml ([recovery] enabled = false)");
    }

    let cancel = CancellationToken::new();
    let interval = state.config.recovery.sweep_interval();

    println!(
        "  {} Sweeping every {}s, press Ctrl-C to stop",
        style("↻").cyan().bold(),
        interval.as_secs()
    );

    let handle = spawn_recovery_task(
        sweeper,
        interval,
        state.config.operation_timeout(),
        cancel.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    cancel.cancel();
    handle.await.context("recovery task panicked")?;
    Ok(())
}

fn print_report(report: &SweepReport, retention: Duration) {
    println!();
    if report.abandoned.is_empty() {
        println!("  {}", style("No in-progress checkpoints of dead machines.").dim());
    }
    for (machine_id, count) in &report.abandoned {
        println!(
            "  {} Abandoned {} checkpoint{} of {}",
            style("◌").yellow().bold(),
            style(count).bold(),
            if *count == 1 { "" } else { "s" },
            style(machine_id).cyan()
        );
    }
    println!(
        "  {} Deleted {} terminal checkpoint{} older than {}h",
        style("✓").green().bold(),
        style(report.cleaned).bold(),
        if report.cleaned == 1 { "" } else { "s" },
        retention.as_secs() / 3600
    );
    if let Some(error) = &report.cleanup_error {
        println!(
            "  {} Cleanup failed: {} (retried on next sweep)",
            style("✗").red().bold(),
            error
        );
    }
    println!();
}

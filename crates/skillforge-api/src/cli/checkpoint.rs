//! Checkpoint inspection commands: list, show, delete.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use skillforge_core::repository::checkpoint::{CheckpointFilter, CheckpointRepository};
use skillforge_types::checkpoint::{CheckpointStatus, PhaseStatus, WorkflowCheckpoint};

use crate::cli::ListArgs;
use crate::state::AppState;

impl From<ListArgs> for CheckpointFilter {
    fn from(args: ListArgs) -> Self {
        Self {
            skill_id: args.skill,
            execution_id: args.execution,
            machine_id: args.machine,
            statuses: args.statuses,
            created_after: args.created_after,
            created_before: args.created_before,
            limit: args.limit,
            offset: args.offset,
        }
    }
}

/// List checkpoints matching the given filters.
pub async fn list_checkpoints(state: &AppState, args: ListArgs, json: bool) -> Result<()> {
    let filter = CheckpointFilter::from(args);
    let checkpoints = state
        .op_context()
        .run(state.checkpoints.list(&filter))
        .await
        .context("failed to list checkpoints")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!();
        println!("  {} No checkpoints found.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Skill").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Progress").fg(Color::White),
        Cell::new("Machine").fg(Color::White),
        Cell::new("Cost").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for cp in &checkpoints {
        table.add_row(vec![
            Cell::new(short_id(&cp.id)).fg(Color::DarkGrey),
            Cell::new(&cp.skill_id).fg(Color::Cyan),
            status_cell(cp.status),
            Cell::new(format!("{}/{}", cp.completed_batch, cp.total_batches)),
            Cell::new(&cp.machine_id),
            Cell::new(format_cost(cp.total_cost_usd)),
            Cell::new(cp.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} checkpoint{}",
        style(checkpoints.len()).bold(),
        if checkpoints.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Show a checkpoint with per-phase results.
pub async fn show_checkpoint(state: &AppState, id: &str, json: bool) -> Result<()> {
    let cp = state
        .op_context()
        .run(state.checkpoints.get(id))
        .await
        .with_context(|| format!("failed to load checkpoint {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&cp)?);
        return Ok(());
    }

    print_summary(&cp);

    if cp.phase_results.is_empty() {
        println!("  {}", style("No phases recorded yet.").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Phase").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Tokens in/out").fg(Color::White),
        Cell::new("Cost").fg(Color::White),
        Cell::new("Output").fg(Color::White),
    ]);

    for (phase_id, result) in &cp.phase_results {
        let status = match result.status {
            PhaseStatus::Completed => Cell::new("completed").fg(Color::Green),
            PhaseStatus::Failed => Cell::new("failed").fg(Color::Red),
            PhaseStatus::Skipped => Cell::new("skipped").fg(Color::DarkGrey),
        };
        let output = match (cp.phase_outputs.get(phase_id), &result.error) {
            (Some(output), _) => truncate(output, 40),
            (None, Some(error)) => truncate(error, 40),
            (None, None) => String::new(),
        };
        let model = if result.cache_hit {
            format!("{}/{} (cached)", result.provider, result.model)
        } else {
            format!("{}/{}", result.provider, result.model)
        };

        table.add_row(vec![
            Cell::new(phase_id).fg(Color::Cyan),
            status,
            Cell::new(model),
            Cell::new(format!("{}/{}", result.input_tokens, result.output_tokens)),
            Cell::new(format_cost(result.cost_usd)),
            Cell::new(output).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

fn print_summary(cp: &WorkflowCheckpoint) {
    println!();
    println!(
        "  {} {} {}",
        style(&cp.skill_name).cyan().bold(),
        style(format!("({})", cp.skill_id)).dim(),
        styled_status(cp.status)
    );
    println!();
    println!("  {}      {}", style("ID").dim(), cp.id);
    println!("  {} {}", style("Execution").dim(), cp.execution_id);
    println!("  {}   {}", style("Attempt").dim(), cp.attempt);
    println!("  {}   {}", style("Machine").dim(), cp.machine_id);
    println!(
        "  {}  {}/{} batches",
        style("Progress").dim(),
        cp.completed_batch,
        cp.total_batches
    );
    println!(
        "  {}    {} in / {} out, {}",
        style("Spend").dim(),
        cp.input_tokens,
        cp.output_tokens,
        format_cost(cp.total_cost_usd)
    );
    println!(
        "  {}   {}",
        style("Created").dim(),
        cp.created_at.to_rfc3339()
    );
    println!(
        "  {}   {}",
        style("Updated").dim(),
        cp.updated_at.to_rfc3339()
    );
    println!(
        "  {}     {}",
        style("Input").dim(),
        truncate(&cp.input, 60)
    );
    println!();
}

/// Delete one checkpoint by ID, or all checkpoints of an execution.
pub async fn delete_checkpoints(
    state: &AppState,
    id: Option<String>,
    execution: Option<String>,
    json: bool,
) -> Result<()> {
    let ctx = state.op_context();
    let (target, deleted) = match (id, execution) {
        (Some(id), _) => {
            ctx.run(state.checkpoints.delete(&id))
                .await
                .with_context(|| format!("failed to delete checkpoint {id}"))?;
            (id, 1)
        }
        (None, Some(execution)) => {
            let count = ctx
                .run(state.checkpoints.delete_by_execution_id(&execution))
                .await
                .with_context(|| format!("failed to delete checkpoints of {execution}"))?;
            (execution, count)
        }
        (None, None) => anyhow::bail!("either a checkpoint ID or --execution is required"),
    };

    tracing::info!(scope = %target, deleted, "deleted checkpoints");

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": deleted, "target": target})
        );
        return Ok(());
    }

    println!(
        "  {} Deleted {} checkpoint{} for {}",
        style("✓").green().bold(),
        style(deleted).bold(),
        if deleted == 1 { "" } else { "s" },
        style(&target).dim()
    );
    Ok(())
}

fn status_cell(status: CheckpointStatus) -> Cell {
    match status {
        CheckpointStatus::InProgress => Cell::new("● in_progress").fg(Color::Yellow),
        CheckpointStatus::Completed => Cell::new("✓ completed").fg(Color::Green),
        CheckpointStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        CheckpointStatus::Abandoned => Cell::new("◌ abandoned").fg(Color::DarkGrey),
    }
}

fn styled_status(status: CheckpointStatus) -> console::StyledObject<&'static str> {
    match status {
        CheckpointStatus::InProgress => style(status.as_str()).yellow(),
        CheckpointStatus::Completed => style(status.as_str()).green(),
        CheckpointStatus::Failed => style(status.as_str()).red(),
        CheckpointStatus::Abandoned => style(status.as_str()).dim(),
    }
}

/// First 8 characters of a checkpoint ID.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_cost(cost_usd: f64) -> String {
    format!("${cost_usd:.4}")
}

/// Truncate to `max` characters on a char boundary, single line.
fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max && !text.contains('\n') {
        return line.to_string();
    }
    let head: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_list_args_become_filter() {
        let after = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let filter = CheckpointFilter::from(ListArgs {
            skill: Some("code-review".to_string()),
            statuses: vec![CheckpointStatus::Abandoned],
            created_after: Some(after),
            limit: Some(10),
            ..Default::default()
        });
        assert_eq!(filter.skill_id.as_deref(), Some("code-review"));
        assert_eq!(filter.statuses, vec![CheckpointStatus::Abandoned]);
        assert_eq!(filter.created_after, Some(after));
        assert_eq!(filter.limit, Some(10));
        assert!(filter.offset.is_none());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer line of text", 10), "a longe...");
        assert_eq!(truncate("first\nsecond", 40), "first...");
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.5), "$0.5000");
    }
}

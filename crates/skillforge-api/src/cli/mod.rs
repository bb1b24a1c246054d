//! CLI command definitions for the `skf` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod checkpoint;
pub mod status;
pub mod sweep;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use skillforge_types::checkpoint::CheckpointStatus;

/// Inspect and recover Skillforge workflow checkpoints.
#[derive(Parser)]
#[command(name = "skf", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log events as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "SKILLFORGE_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List checkpoints, newest-updated first.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show one checkpoint with its phase results.
    Show {
        /// Checkpoint ID.
        id: String,
    },

    /// Delete a checkpoint, or every checkpoint of an execution.
    #[command(alias = "rm")]
    Delete {
        /// Checkpoint ID.
        #[arg(required_unless_present = "execution", conflicts_with = "execution")]
        id: Option<String>,

        /// Delete all checkpoints of this execution.
        #[arg(long)]
        execution: Option<String>,
    },

    /// Checkpoint counts per status and the machines holding work.
    Status,

    /// Abandon checkpoints of dead machines and purge expired ones.
    Sweep(SweepArgs),

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Only checkpoints of this skill.
    #[arg(long)]
    pub skill: Option<String>,

    /// Only checkpoints of this execution.
    #[arg(long)]
    pub execution: Option<String>,

    /// Only checkpoints owned by this machine.
    #[arg(long)]
    pub machine: Option<String>,

    /// Status filter (repeatable): in_progress, completed, failed, abandoned.
    #[arg(long = "status", value_name = "STATUS")]
    pub statuses: Vec<CheckpointStatus>,

    /// Created at or after this RFC 3339 timestamp.
    #[arg(long)]
    pub created_after: Option<DateTime<Utc>>,

    /// Created before this RFC 3339 timestamp.
    #[arg(long)]
    pub created_before: Option<DateTime<Utc>>,

    /// Maximum number of checkpoints.
    #[arg(long)]
    pub limit: Option<i64>,

    /// Checkpoints to skip.
    #[arg(long)]
    pub offset: Option<i64>,
}

#[derive(Args, Debug, Default)]
pub struct SweepArgs {
    /// Machine known to be dead (repeatable). Its in-progress checkpoints are abandoned.
    #[arg(long = "dead", value_name = "MACHINE")]
    pub dead: Vec<String>,

    /// Retention for terminal checkpoints, overriding config.
    #[arg(long)]
    pub retention_hours: Option<u64>,

    /// Keep sweeping on the configured interval until interrupted.
    #[arg(long)]
    pub watch: bool,
}

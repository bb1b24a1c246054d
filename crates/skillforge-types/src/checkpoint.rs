//! Workflow checkpoint domain types.
//!
//! A `WorkflowCheckpoint` is the durable record of how far a skill execution
//! got: which batches finished, what each phase produced and what it cost.
//! The store is the source of truth; engines hold a working copy and
//! re-submit it after every batch.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CheckpointError;

/// Namespace for deterministic checkpoint IDs (UUIDv5).
const CHECKPOINT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_9a3e_2b7d_4e58_a0c4_91d2_73f6_0b85);

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a checkpoint.
///
/// `InProgress` is the only non-terminal state. Allowed edges:
/// `InProgress -> Completed | Failed | Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
    Failed,
    Abandoned,
}

impl CheckpointStatus {
    /// Statuses eligible for retention cleanup.
    pub const TERMINAL: [CheckpointStatus; 3] = [
        CheckpointStatus::Completed,
        CheckpointStatus::Failed,
        CheckpointStatus::Abandoned,
    ];

    pub fn is_terminal(self) -> bool {
        !matches!(self, CheckpointStatus::InProgress)
    }

    /// Whether moving from `self` to `next` follows an allowed edge.
    pub fn can_transition_to(self, next: CheckpointStatus) -> bool {
        matches!(
            (self, next),
            (
                CheckpointStatus::InProgress,
                CheckpointStatus::Completed | CheckpointStatus::Failed | CheckpointStatus::Abandoned
            )
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            "abandoned" => Ok(CheckpointStatus::Abandoned),
            other => Err(format!("invalid checkpoint status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase results
// ---------------------------------------------------------------------------

/// Outcome of a single phase execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    Failed,
    Skipped,
}

/// Snapshot of one phase run against a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Whether the provider served the prompt from its cache.
    #[serde(default)]
    pub cache_hit: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowCheckpoint
// ---------------------------------------------------------------------------

/// Durable progress record for one skill execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Deterministic ID derived from skill, fingerprint and attempt.
    pub id: String,
    pub execution_id: String,
    pub skill_id: String,
    pub skill_name: String,
    /// Raw input payload as submitted by the engine.
    pub input: String,
    /// Stable content hash of `input`; the resume-matching key.
    pub input_fingerprint: String,
    /// Claim generation for this (skill, fingerprint) pair.
    pub attempt: u32,
    pub completed_batch: u32,
    /// Fixed at creation from the skill's phase plan.
    pub total_batches: u32,
    pub phase_results: BTreeMap<String, PhaseResult>,
    pub phase_outputs: BTreeMap<String, String>,
    pub status: CheckpointStatus,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    /// Current (or last) owning machine.
    pub machine_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for starting a fresh checkpoint.
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    pub execution_id: String,
    pub skill_id: String,
    pub skill_name: String,
    pub input: String,
    pub input_fingerprint: String,
    pub attempt: u32,
    pub total_batches: u32,
    pub machine_id: String,
}

impl WorkflowCheckpoint {
    /// Build a new `InProgress` checkpoint with `completed_batch = 0`.
    ///
    /// Fails with `Validation` if the parameters violate entity invariants.
    pub fn new(params: NewCheckpoint) -> Result<Self, CheckpointError> {
        let now = timestamp_now();
        let checkpoint = Self {
            id: checkpoint_id(&params.skill_id, &params.input_fingerprint, params.attempt),
            execution_id: params.execution_id,
            skill_id: params.skill_id,
            skill_name: params.skill_name,
            input: params.input,
            input_fingerprint: params.input_fingerprint,
            attempt: params.attempt,
            completed_batch: 0,
            total_batches: params.total_batches,
            phase_results: BTreeMap::new(),
            phase_outputs: BTreeMap::new(),
            status: CheckpointStatus::InProgress,
            input_tokens: 0,
            output_tokens: 0,
            total_cost_usd: 0.0,
            machine_id: params.machine_id,
            created_at: now,
            updated_at: now,
        };
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Check structural invariants. Stores call this before every write.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.id.trim().is_empty() {
            return Err(CheckpointError::Validation("id must not be empty".to_string()));
        }
        if self.execution_id.trim().is_empty() {
            return Err(CheckpointError::Validation(
                "execution_id must not be empty".to_string(),
            ));
        }
        if self.skill_id.trim().is_empty() {
            return Err(CheckpointError::Validation(
                "skill_id must not be empty".to_string(),
            ));
        }
        if self.completed_batch > self.total_batches {
            return Err(CheckpointError::Validation(format!(
                "completed_batch {} exceeds total_batches {}",
                self.completed_batch, self.total_batches
            )));
        }
        if self.status == CheckpointStatus::InProgress && self.machine_id.trim().is_empty() {
            return Err(CheckpointError::Validation(
                "machine_id is required while in progress".to_string(),
            ));
        }
        if !self.total_cost_usd.is_finite() || self.total_cost_usd < 0.0 {
            return Err(CheckpointError::Validation(format!(
                "total_cost_usd must be a non-negative number, got {}",
                self.total_cost_usd
            )));
        }
        Ok(())
    }

    /// Move to `next`, rejecting any edge outside the lifecycle graph.
    pub fn transition_to(&mut self, next: CheckpointStatus) -> Result<(), CheckpointError> {
        if !self.status.can_transition_to(next) {
            return Err(CheckpointError::Validation(format!(
                "cannot transition checkpoint {} from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = next_timestamp(self.updated_at);
        Ok(())
    }

    /// The 1-based batch an engine should run next.
    pub fn resume_point(&self) -> u32 {
        self.completed_batch + 1
    }

    /// Whether every planned batch has been recorded.
    pub fn all_batches_done(&self) -> bool {
        self.completed_batch == self.total_batches
    }

    /// Output of a previously completed phase, reusable without a provider call.
    pub fn reusable_output(&self, phase_id: &str) -> Option<&str> {
        let result = self.phase_results.get(phase_id)?;
        if result.status != PhaseStatus::Completed {
            return None;
        }
        self.phase_outputs.get(phase_id).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Status summary
// ---------------------------------------------------------------------------

/// Checkpoint counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: CheckpointStatus, count: u64) {
        match status {
            CheckpointStatus::InProgress => self.in_progress += count,
            CheckpointStatus::Completed => self.completed += count,
            CheckpointStatus::Failed => self.failed += count,
            CheckpointStatus::Abandoned => self.abandoned += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.in_progress + self.completed + self.failed + self.abandoned
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Deterministic checkpoint ID for a claim generation.
///
/// Two callers claiming the same (skill, fingerprint, attempt) derive the same
/// ID, so the store's primary key admits only one of them.
pub fn checkpoint_id(skill_id: &str, input_fingerprint: &str, attempt: u32) -> String {
    let name = format!("{skill_id}\u{1f}{input_fingerprint}\u{1f}{attempt}");
    Uuid::new_v5(&CHECKPOINT_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Current time at the microsecond precision persisted by stores.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A timestamp strictly later than `previous`, normally "now".
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = timestamp_now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

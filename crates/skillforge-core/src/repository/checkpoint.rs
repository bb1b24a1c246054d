//! Checkpoint repository trait definition.
//!
//! Defines the storage interface for workflow checkpoints. The infrastructure
//! layer (skillforge-infra) implements this trait with SQLite persistence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use skillforge_types::checkpoint::{CheckpointStatus, StatusCounts, WorkflowCheckpoint};
use skillforge_types::error::CheckpointError;

/// Filter criteria for listing checkpoints.
///
/// Every predicate is optional; an empty `statuses` set matches any status.
/// Results are ordered newest-updated first.
#[derive(Debug, Clone, Default)]
pub struct CheckpointFilter {
    pub skill_id: Option<String>,
    pub execution_id: Option<String>,
    pub machine_id: Option<String>,
    pub statuses: Vec<CheckpointStatus>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<i64>,
    /// Number of results to skip (offset pagination).
    pub offset: Option<i64>,
}

impl CheckpointFilter {
    /// Evaluate the predicates (not pagination) against a checkpoint.
    pub fn matches(&self, checkpoint: &WorkflowCheckpoint) -> bool {
        if let Some(skill_id) = &self.skill_id {
            if &checkpoint.skill_id != skill_id {
                return false;
            }
        }
        if let Some(execution_id) = &self.execution_id {
            if &checkpoint.execution_id != execution_id {
                return false;
            }
        }
        if let Some(machine_id) = &self.machine_id {
            if &checkpoint.machine_id != machine_id {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&checkpoint.status) {
            return false;
        }
        if let Some(after) = self.created_after {
            if checkpoint.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if checkpoint.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Repository trait for checkpoint persistence.
///
/// Every method is a single atomic statement against the store. Sequences of
/// calls (read, then create) are not atomic; callers use the compare-and-claim
/// operations (`create` with a deterministic ID, `claim_ownership`) instead of
/// assuming exclusivity.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointRepository: Send + Sync {
    /// Insert a new checkpoint. `Conflict` if the ID already exists.
    fn create(
        &self,
        checkpoint: &WorkflowCheckpoint,
    ) -> impl std::future::Future<Output = Result<WorkflowCheckpoint, CheckpointError>> + Send;

    /// Get a checkpoint by ID. `NotFound` if absent.
    fn get(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowCheckpoint, CheckpointError>> + Send;

    /// Most recently updated `InProgress` checkpoint for a skill/input pair.
    fn get_latest_in_progress(
        &self,
        skill_id: &str,
        input_fingerprint: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowCheckpoint>, CheckpointError>> + Send;

    /// All checkpoints of an execution, newest-updated first.
    fn get_by_execution_id(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowCheckpoint>, CheckpointError>> + Send;

    /// Replace the mutable fields of an `InProgress` checkpoint.
    ///
    /// Only the owning machine may update. Returns the stored checkpoint with
    /// its advanced `updated_at`. `NotFound` if absent, `Conflict` if already
    /// terminal or owned by another machine, `Validation` for invariant
    /// violations, counter regressions or an `Abandoned` status.
    fn update(
        &self,
        checkpoint: &WorkflowCheckpoint,
    ) -> impl std::future::Future<Output = Result<WorkflowCheckpoint, CheckpointError>> + Send;

    /// Move ownership of an `InProgress` checkpoint from `expected_machine` to
    /// `new_machine`. `Conflict` if the row changed owner or left `InProgress`.
    fn claim_ownership(
        &self,
        id: &str,
        expected_machine: &str,
        new_machine: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowCheckpoint, CheckpointError>> + Send;

    /// Attempt number for the next fresh claim of a skill/input pair:
    /// one past the highest terminal attempt, or 0.
    fn next_attempt(
        &self,
        skill_id: &str,
        input_fingerprint: &str,
    ) -> impl std::future::Future<Output = Result<u32, CheckpointError>> + Send;

    /// List checkpoints matching a filter.
    fn list(
        &self,
        filter: &CheckpointFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowCheckpoint>, CheckpointError>> + Send;

    /// Hard-delete one checkpoint. `NotFound` if absent.
    fn delete(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), CheckpointError>> + Send;

    /// Hard-delete every checkpoint of an execution. Returns the count.
    fn delete_by_execution_id(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, CheckpointError>> + Send;

    /// Mark all `InProgress` checkpoints owned by `machine_id` as `Abandoned`.
    fn mark_abandoned(
        &self,
        machine_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, CheckpointError>> + Send;

    /// Delete terminal checkpoints created more than `older_than` ago.
    fn cleanup(
        &self,
        older_than: Duration,
    ) -> impl std::future::Future<Output = Result<u64, CheckpointError>> + Send;

    /// Distinct owners of `InProgress` checkpoints.
    fn list_owning_machines(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, CheckpointError>> + Send;

    /// Checkpoint counts per status.
    fn count_by_status(
        &self,
    ) -> impl std::future::Future<Output = Result<StatusCounts, CheckpointError>> + Send;
}

// ---------------------------------------------------------------------------
// Shared update guards
// ---------------------------------------------------------------------------

/// Checks an update can run before touching the store.
pub fn check_update_request(incoming: &WorkflowCheckpoint) -> Result<(), CheckpointError> {
    incoming.validate()?;
    if incoming.status == CheckpointStatus::Abandoned {
        return Err(CheckpointError::Validation(
            "abandoned status is written only by the recovery sweeper".to_string(),
        ));
    }
    Ok(())
}

/// Whether `incoming` still carries every phase entry already stored.
///
/// Phase results and outputs may be added or overwritten, never dropped.
pub fn keeps_phase_entries(current: &WorkflowCheckpoint, incoming: &WorkflowCheckpoint) -> bool {
    current
        .phase_results
        .keys()
        .all(|phase| incoming.phase_results.contains_key(phase))
        && current
            .phase_outputs
            .keys()
            .all(|phase| incoming.phase_outputs.contains_key(phase))
}

/// Explain why a guarded update matched no row, given the stored row.
pub fn classify_rejected_update(
    current: &WorkflowCheckpoint,
    incoming: &WorkflowCheckpoint,
) -> CheckpointError {
    if current.status.is_terminal() {
        return CheckpointError::Conflict(format!(
            "checkpoint {} is already {}",
            current.id, current.status
        ));
    }
    if incoming.machine_id != current.machine_id {
        return CheckpointError::Conflict(format!(
            "checkpoint {} is owned by {}, not {}",
            current.id, current.machine_id, incoming.machine_id
        ));
    }
    if incoming.completed_batch > current.total_batches {
        return CheckpointError::Validation(format!(
            "completed_batch {} exceeds stored total_batches {}",
            incoming.completed_batch, current.total_batches
        ));
    }
    if incoming.completed_batch < current.completed_batch {
        return CheckpointError::Validation(format!(
            "completed_batch cannot go back from {} to {}",
            current.completed_batch, incoming.completed_batch
        ));
    }
    if incoming.input_tokens < current.input_tokens
        || incoming.output_tokens < current.output_tokens
        || incoming.total_cost_usd < current.total_cost_usd
    {
        return CheckpointError::Validation(format!(
            "running totals of checkpoint {} cannot decrease",
            current.id
        ));
    }
    if !keeps_phase_entries(current, incoming) {
        return CheckpointError::Validation(format!(
            "update of checkpoint {} drops recorded phase entries",
            current.id
        ));
    }
    CheckpointError::Conflict(format!(
        "checkpoint {} was modified concurrently",
        current.id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use skillforge_types::checkpoint::NewCheckpoint;

    fn checkpoint() -> WorkflowCheckpoint {
        WorkflowCheckpoint::new(NewCheckpoint {
            execution_id: "exec-1".to_string(),
            skill_id: "code-review".to_string(),
            skill_name: "Code Review".to_string(),
            input: "input".to_string(),
            input_fingerprint: "h1".to_string(),
            attempt: 0,
            total_batches: 3,
            machine_id: "m1".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(CheckpointFilter::default().matches(&checkpoint()));
    }

    #[test]
    fn test_filter_predicates() {
        let cp = checkpoint();

        let filter = CheckpointFilter {
            skill_id: Some("other".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&cp));

        let filter = CheckpointFilter {
            statuses: vec![CheckpointStatus::Completed, CheckpointStatus::Failed],
            ..Default::default()
        };
        assert!(!filter.matches(&cp));

        let filter = CheckpointFilter {
            machine_id: Some("m1".to_string()),
            statuses: vec![CheckpointStatus::InProgress],
            ..Default::default()
        };
        assert!(filter.matches(&cp));
    }

    #[test]
    fn test_filter_time_window_bounds() {
        let cp = checkpoint();
        let inclusive = CheckpointFilter {
            created_after: Some(cp.created_at),
            created_before: Some(cp.created_at + ChronoDuration::seconds(1)),
            ..Default::default()
        };
        assert!(inclusive.matches(&cp));

        let exclusive_upper = CheckpointFilter {
            created_before: Some(cp.created_at),
            ..Default::default()
        };
        assert!(!exclusive_upper.matches(&cp));
    }

    #[test]
    fn test_dropping_a_phase_entry_is_validation() {
        let mut current = checkpoint();
        current
            .phase_outputs
            .insert("analysis".to_string(), "out".to_string());
        let mut incoming = current.clone();
        assert!(keeps_phase_entries(&current, &incoming));

        incoming
            .phase_outputs
            .insert("lint".to_string(), "clean".to_string());
        assert!(keeps_phase_entries(&current, &incoming));

        incoming.phase_outputs.remove("analysis");
        assert!(!keeps_phase_entries(&current, &incoming));
        assert!(matches!(
            classify_rejected_update(&current, &incoming),
            CheckpointError::Validation(_)
        ));
    }

    #[test]
    fn test_update_request_rejects_abandoned() {
        let mut cp = checkpoint();
        cp.status = CheckpointStatus::Abandoned;
        assert!(matches!(
            check_update_request(&cp),
            Err(CheckpointError::Validation(_))
        ));
    }

    #[test]
    fn test_classify_rejected_update() {
        let current = checkpoint();

        let mut terminal = current.clone();
        terminal.status = CheckpointStatus::Completed;
        assert!(matches!(
            classify_rejected_update(&terminal, &current),
            CheckpointError::Conflict(_)
        ));

        let mut advanced = current.clone();
        advanced.completed_batch = 2;
        let mut regressed = current.clone();
        regressed.completed_batch = 1;
        assert!(matches!(
            classify_rejected_update(&advanced, &regressed),
            CheckpointError::Validation(_)
        ));

        let mut fewer_tokens = current.clone();
        let mut more_tokens = current.clone();
        more_tokens.input_tokens = 10;
        fewer_tokens.input_tokens = 5;
        assert!(matches!(
            classify_rejected_update(&more_tokens, &fewer_tokens),
            CheckpointError::Validation(_)
        ));

        let mut foreign = current.clone();
        foreign.machine_id = "m2".to_string();
        assert!(matches!(
            classify_rejected_update(&current, &foreign),
            CheckpointError::Conflict(_)
        ));

        let mut grown_plan = current.clone();
        grown_plan.total_batches = 10;
        grown_plan.completed_batch = 5;
        assert!(matches!(
            classify_rejected_update(&current, &grown_plan),
            CheckpointError::Validation(_)
        ));
    }
}

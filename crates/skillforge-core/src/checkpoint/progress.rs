//! Progress advancement for a claimed checkpoint.
//!
//! After every batch the engine hands the tracker what each phase produced.
//! The tracker folds it into the working copy, persists it, and replaces the
//! working copy with what the store accepted.

use std::sync::Arc;

use skillforge_types::checkpoint::{CheckpointStatus, PhaseResult, WorkflowCheckpoint};
use skillforge_types::error::CheckpointError;

use crate::checkpoint::context::OpContext;
use crate::repository::checkpoint::CheckpointRepository;

/// One phase's contribution to a batch.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub phase_id: String,
    pub result: PhaseResult,
    /// Textual output, kept for reuse on resume. Absent for failed phases.
    pub output: Option<String>,
}

/// Everything a finished batch produced.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub phases: Vec<PhaseRecord>,
}

impl BatchOutcome {
    pub fn new(phases: Vec<PhaseRecord>) -> Self {
        Self { phases }
    }

    pub fn input_tokens(&self) -> u64 {
        self.phases.iter().map(|p| p.result.input_tokens).sum()
    }

    pub fn output_tokens(&self) -> u64 {
        self.phases.iter().map(|p| p.result.output_tokens).sum()
    }

    pub fn cost_usd(&self) -> f64 {
        self.phases.iter().map(|p| p.result.cost_usd).sum()
    }
}

/// Terminal outcome an engine may record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Completed,
    Failed,
}

impl From<FinalStatus> for CheckpointStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Completed => CheckpointStatus::Completed,
            FinalStatus::Failed => CheckpointStatus::Failed,
        }
    }
}

/// Fold a batch into a checkpoint without persisting it.
///
/// Phase entries are added or overwritten, never removed. Token and cost
/// totals accumulate even for re-run phases since that spend was real.
pub fn apply_batch(
    checkpoint: &mut WorkflowCheckpoint,
    outcome: BatchOutcome,
) -> Result<(), CheckpointError> {
    if checkpoint.status != CheckpointStatus::InProgress {
        return Err(CheckpointError::Validation(format!(
            "checkpoint {} is {} and cannot advance",
            checkpoint.id, checkpoint.status
        )));
    }
    if checkpoint.all_batches_done() {
        return Err(CheckpointError::Validation(format!(
            "checkpoint {} already recorded all {} batches",
            checkpoint.id, checkpoint.total_batches
        )));
    }

    checkpoint.input_tokens += outcome.input_tokens();
    checkpoint.output_tokens += outcome.output_tokens();
    checkpoint.total_cost_usd += outcome.cost_usd();

    for record in outcome.phases {
        if let Some(output) = record.output {
            checkpoint.phase_outputs.insert(record.phase_id.clone(), output);
        }
        checkpoint.phase_results.insert(record.phase_id, record.result);
    }
    checkpoint.completed_batch += 1;
    Ok(())
}

/// Persists batch progress and terminal transitions.
pub struct ProgressTracker<R> {
    repo: Arc<R>,
}

impl<R: CheckpointRepository> ProgressTracker<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Record a finished batch and persist the checkpoint.
    ///
    /// On error the working copy is left untouched.
    pub async fn record_batch(
        &self,
        ctx: &OpContext,
        checkpoint: &mut WorkflowCheckpoint,
        outcome: BatchOutcome,
    ) -> Result<(), CheckpointError> {
        let mut next = checkpoint.clone();
        apply_batch(&mut next, outcome)?;
        let stored = ctx.run(self.repo.update(&next)).await?;

        tracing::debug!(
            checkpoint_id = %stored.id,
            completed_batch = stored.completed_batch,
            total_batches = stored.total_batches,
            "recorded batch"
        );
        *checkpoint = stored;
        Ok(())
    }

    /// Move the checkpoint to a terminal status.
    pub async fn finalize(
        &self,
        ctx: &OpContext,
        checkpoint: &mut WorkflowCheckpoint,
        status: FinalStatus,
    ) -> Result<(), CheckpointError> {
        let mut next = checkpoint.clone();
        next.transition_to(status.into())?;
        let stored = ctx.run(self.repo.update(&next)).await?;

        tracing::info!(
            checkpoint_id = %stored.id,
            status = %stored.status,
            completed_batch = stored.completed_batch,
            total_cost_usd = stored.total_cost_usd,
            "finalized checkpoint"
        );
        *checkpoint = stored;
        Ok(())
    }

    /// Replace the working copy with the stored row.
    pub async fn refresh(
        &self,
        ctx: &OpContext,
        checkpoint: &mut WorkflowCheckpoint,
    ) -> Result<(), CheckpointError> {
        *checkpoint = ctx.run(self.repo.get(&checkpoint.id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::testing::MemoryCheckpointRepository;
    use skillforge_types::checkpoint::{NewCheckpoint, PhaseStatus, timestamp_now};

    fn checkpoint() -> WorkflowCheckpoint {
        WorkflowCheckpoint::new(NewCheckpoint {
            execution_id: "exec-1".to_string(),
            skill_id: "code-review".to_string(),
            skill_name: "Code Review".to_string(),
            input: "diff".to_string(),
            input_fingerprint: "h1".to_string(),
            attempt: 0,
            total_batches: 2,
            machine_id: "m1".to_string(),
        })
        .unwrap()
    }

    fn record(phase_id: &str, status: PhaseStatus, output: Option<&str>) -> PhaseRecord {
        let now = timestamp_now();
        PhaseRecord {
            phase_id: phase_id.to_string(),
            result: PhaseResult {
                provider: "anthropic".to_string(),
                model: "claude-sonnet".to_string(),
                input_tokens: 100,
                output_tokens: 40,
                cost_usd: 0.25,
                cache_hit: false,
                started_at: now,
                completed_at: now,
                status,
                error: None,
            },
            output: output.map(str::to_string),
        }
    }

    fn setup() -> (
        Arc<MemoryCheckpointRepository>,
        ProgressTracker<MemoryCheckpointRepository>,
        WorkflowCheckpoint,
    ) {
        let repo = Arc::new(MemoryCheckpointRepository::new());
        let cp = checkpoint();
        repo.insert(cp.clone());
        let tracker = ProgressTracker::new(repo.clone());
        (repo, tracker, cp)
    }

    #[test]
    fn test_apply_batch_accumulates() {
        let mut cp = checkpoint();
        let outcome = BatchOutcome::new(vec![
            record("analysis", PhaseStatus::Completed, Some("looks fine")),
            record("lint", PhaseStatus::Failed, None),
        ]);
        apply_batch(&mut cp, outcome).unwrap();

        assert_eq!(cp.completed_batch, 1);
        assert_eq!(cp.input_tokens, 200);
        assert_eq!(cp.output_tokens, 80);
        assert!((cp.total_cost_usd - 0.5).abs() < 1e-9);
        assert_eq!(cp.phase_results.len(), 2);
        assert_eq!(cp.reusable_output("analysis"), Some("looks fine"));
        assert_eq!(cp.reusable_output("lint"), None);
    }

    #[test]
    fn test_apply_batch_rerun_overwrites_but_keeps_spend() {
        let mut cp = checkpoint();
        apply_batch(
            &mut cp,
            BatchOutcome::new(vec![record("analysis", PhaseStatus::Failed, None)]),
        )
        .unwrap();
        apply_batch(
            &mut cp,
            BatchOutcome::new(vec![record("analysis", PhaseStatus::Completed, Some("ok"))]),
        )
        .unwrap();

        assert_eq!(cp.phase_results.len(), 1);
        assert_eq!(cp.phase_results["analysis"].status, PhaseStatus::Completed);
        assert_eq!(cp.input_tokens, 200);
    }

    #[test]
    fn test_apply_batch_rejects_overflow() {
        let mut cp = checkpoint();
        cp.completed_batch = cp.total_batches;
        let err = apply_batch(&mut cp, BatchOutcome::default()).unwrap_err();
        assert!(matches!(err, CheckpointError::Validation(_)));
        assert_eq!(cp.completed_batch, cp.total_batches);
    }

    #[tokio::test]
    async fn test_record_batch_persists_and_advances_updated_at() {
        let (repo, tracker, mut cp) = setup();
        let before = cp.updated_at;

        tracker
            .record_batch(
                &OpContext::background(),
                &mut cp,
                BatchOutcome::new(vec![record("analysis", PhaseStatus::Completed, Some("a"))]),
            )
            .await
            .unwrap();

        assert_eq!(cp.completed_batch, 1);
        assert!(cp.updated_at > before);
        assert_eq!(repo.snapshot(&cp.id).unwrap(), cp);
    }

    #[tokio::test]
    async fn test_update_dropping_recorded_output_is_rejected() {
        let (repo, tracker, mut cp) = setup();
        tracker
            .record_batch(
                &OpContext::background(),
                &mut cp,
                BatchOutcome::new(vec![record("analysis", PhaseStatus::Completed, Some("out"))]),
            )
            .await
            .unwrap();

        let mut wiped = cp.clone();
        wiped.phase_outputs.clear();
        let err = repo.update(&wiped).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Validation(_)));
        assert_eq!(
            repo.snapshot(&cp.id).unwrap().reusable_output("analysis"),
            Some("out")
        );
    }

    #[tokio::test]
    async fn test_finalize_then_record_is_rejected() {
        let (repo, tracker, mut cp) = setup();
        let ctx = OpContext::background();

        tracker
            .finalize(&ctx, &mut cp, FinalStatus::Completed)
            .await
            .unwrap();
        assert_eq!(cp.status, CheckpointStatus::Completed);

        let err = tracker
            .record_batch(&ctx, &mut cp, BatchOutcome::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Validation(_)));

        let err = tracker
            .finalize(&ctx, &mut cp, FinalStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Validation(_)));
        assert_eq!(
            repo.snapshot(&cp.id).unwrap().status,
            CheckpointStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_stale_working_copy_cannot_reopen_terminal_row() {
        let (repo, tracker, mut cp) = setup();
        let ctx = OpContext::background();
        let mut stale = cp.clone();

        tracker
            .finalize(&ctx, &mut cp, FinalStatus::Failed)
            .await
            .unwrap();

        let err = tracker
            .record_batch(&ctx, &mut stale, BatchOutcome::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Conflict(_)));
        assert_eq!(stale.completed_batch, 0);
        assert_eq!(repo.snapshot(&cp.id).unwrap().status, CheckpointStatus::Failed);

        tracker.refresh(&ctx, &mut stale).await.unwrap();
        assert_eq!(stale.status, CheckpointStatus::Failed);
    }
}

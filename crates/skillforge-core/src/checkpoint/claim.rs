//! Resume claim protocol.
//!
//! Before running a skill, an engine asks the claimer for a checkpoint to work
//! on. The claimer resumes a live in-progress checkpoint, takes over one whose
//! owner died, or starts a fresh one. Read-then-create is not atomic, so a
//! fresh claim derives a deterministic checkpoint ID: concurrent claimers of
//! the same (skill, fingerprint) collide on the primary key, the loser sees
//! `Conflict` and re-reads.

use std::sync::Arc;

use skillforge_types::checkpoint::{NewCheckpoint, WorkflowCheckpoint};
use skillforge_types::config::ClaimConfig;
use skillforge_types::error::CheckpointError;
use uuid::Uuid;

use crate::checkpoint::context::OpContext;
use crate::fingerprint::InputFingerprinter;
use crate::liveness::LivenessOracle;
use crate::repository::checkpoint::CheckpointRepository;

/// What an engine wants to run.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub skill_id: String,
    pub skill_name: String,
    pub input: String,
    pub input_fingerprint: String,
    /// Number of batches in the skill's phase plan.
    pub total_batches: u32,
    /// Execution ID used only when a fresh checkpoint is created; a resumed
    /// checkpoint keeps its own.
    pub execution_id: String,
}

impl ClaimRequest {
    /// Build a request, fingerprinting `input` and minting a time-ordered
    /// execution ID.
    pub fn new(
        skill_id: impl Into<String>,
        skill_name: impl Into<String>,
        input: impl Into<String>,
        total_batches: u32,
        fingerprinter: &impl InputFingerprinter,
    ) -> Self {
        let input = input.into();
        Self {
            skill_id: skill_id.into(),
            skill_name: skill_name.into(),
            input_fingerprint: fingerprinter.fingerprint(&input),
            input,
            total_batches,
            execution_id: Uuid::now_v7().to_string(),
        }
    }
}

/// How the claimer obtained the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimKind {
    /// An in-progress checkpoint whose owner is live (or is us).
    Resumed,
    /// An in-progress checkpoint taken over from a dead owner.
    Reclaimed { previous_owner: String },
    /// A brand new checkpoint starting at batch 0.
    Fresh,
}

/// Result of a successful claim.
#[derive(Debug, Clone)]
pub struct Claim {
    pub kind: ClaimKind,
    pub checkpoint: WorkflowCheckpoint,
}

impl Claim {
    /// The 1-based batch the engine should run next.
    pub fn resume_point(&self) -> u32 {
        self.checkpoint.resume_point()
    }
}

/// Runs the claim protocol on behalf of one machine.
pub struct ResumeClaimer<R, L> {
    repo: Arc<R>,
    liveness: Arc<L>,
    machine_id: String,
    max_attempts: u32,
}

impl<R: CheckpointRepository, L: LivenessOracle> ResumeClaimer<R, L> {
    pub fn new(repo: Arc<R>, liveness: Arc<L>, machine_id: impl Into<String>) -> Self {
        Self {
            repo,
            liveness,
            machine_id: machine_id.into(),
            max_attempts: 3,
        }
    }

    /// Number of read/create rounds before a contended claim gives up.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Apply the `[claim]` section of the global config.
    pub fn with_config(self, config: &ClaimConfig) -> Self {
        self.with_max_attempts(config.max_attempts)
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// Claim a checkpoint for `request`.
    ///
    /// `Conflict` from a lost race triggers a re-read; any other error is
    /// returned as-is. Fails with `Conflict` once every round was contended.
    pub async fn claim(
        &self,
        ctx: &OpContext,
        request: &ClaimRequest,
    ) -> Result<Claim, CheckpointError> {
        for round in 1..=self.max_attempts {
            match self.try_claim(ctx, request).await {
                Ok(claim) => {
                    tracing::info!(
                        checkpoint_id = %claim.checkpoint.id,
                        skill_id = %request.skill_id,
                        kind = ?claim.kind,
                        resume_point = claim.resume_point(),
                        "claimed checkpoint"
                    );
                    return Ok(claim);
                }
                Err(CheckpointError::Conflict(reason)) => {
                    tracing::debug!(
                        skill_id = %request.skill_id,
                        round,
                        reason = %reason,
                        "claim lost a race, re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(CheckpointError::Conflict(format!(
            "could not claim skill '{}' after {} contended attempts",
            request.skill_id, self.max_attempts
        )))
    }

    async fn try_claim(
        &self,
        ctx: &OpContext,
        request: &ClaimRequest,
    ) -> Result<Claim, CheckpointError> {
        let existing = ctx
            .run(
                self.repo
                    .get_latest_in_progress(&request.skill_id, &request.input_fingerprint),
            )
            .await?;

        if let Some(checkpoint) = existing {
            return self.resume_or_reclaim(ctx, checkpoint).await;
        }

        let attempt = ctx
            .run(
                self.repo
                    .next_attempt(&request.skill_id, &request.input_fingerprint),
            )
            .await?;
        let checkpoint = WorkflowCheckpoint::new(NewCheckpoint {
            execution_id: request.execution_id.clone(),
            skill_id: request.skill_id.clone(),
            skill_name: request.skill_name.clone(),
            input: request.input.clone(),
            input_fingerprint: request.input_fingerprint.clone(),
            attempt,
            total_batches: request.total_batches,
            machine_id: self.machine_id.clone(),
        })?;
        let created = ctx.run(self.repo.create(&checkpoint)).await?;

        Ok(Claim {
            kind: ClaimKind::Fresh,
            checkpoint: created,
        })
    }

    async fn resume_or_reclaim(
        &self,
        ctx: &OpContext,
        checkpoint: WorkflowCheckpoint,
    ) -> Result<Claim, CheckpointError> {
        let owner_live = checkpoint.machine_id == self.machine_id
            || ctx.run(self.liveness.is_live(&checkpoint.machine_id)).await?;
        if owner_live {
            return Ok(Claim {
                kind: ClaimKind::Resumed,
                checkpoint,
            });
        }

        let previous_owner = checkpoint.machine_id.clone();
        let claimed = ctx
            .run(
                self.repo
                    .claim_ownership(&checkpoint.id, &previous_owner, &self.machine_id),
            )
            .await
            .map_err(|e| match e {
                // Row vanished between read and claim; treat like a lost race.
                CheckpointError::NotFound(reason) => CheckpointError::Conflict(reason),
                other => other,
            })?;

        tracing::info!(
            checkpoint_id = %claimed.id,
            previous_owner = %previous_owner,
            "reclaimed checkpoint from dead owner"
        );

        Ok(Claim {
            kind: ClaimKind::Reclaimed { previous_owner },
            checkpoint: claimed,
        })
    }
}

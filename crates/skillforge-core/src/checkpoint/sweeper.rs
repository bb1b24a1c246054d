//! Recovery sweeper: abandons checkpoints of dead machines and purges old
//! terminal checkpoints.
//!
//! A sweep is idempotent. Abandonment and cleanup are separate statements, so
//! a cleanup failure leaves the abandonment in place and the next sweep
//! simply retries the cleanup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use skillforge_types::error::CheckpointError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::context::OpContext;
use crate::liveness::LivenessOracle;
use crate::repository::checkpoint::CheckpointRepository;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Checkpoints moved to `Abandoned`, per dead machine.
    pub abandoned: BTreeMap<String, u64>,
    /// Terminal checkpoints deleted by retention cleanup.
    pub cleaned: u64,
    /// Set when cleanup failed after abandonment went through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

impl SweepReport {
    pub fn total_abandoned(&self) -> u64 {
        self.abandoned.values().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.cleanup_error.is_none()
    }
}

pub struct RecoverySweeper<R, L> {
    repo: Arc<R>,
    liveness: Arc<L>,
    retention: Duration,
}

impl<R: CheckpointRepository, L: LivenessOracle> RecoverySweeper<R, L> {
    pub fn new(repo: Arc<R>, liveness: Arc<L>, retention: Duration) -> Self {
        Self {
            repo,
            liveness,
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Run one sweep.
    ///
    /// Errors while listing owners or abandoning are returned. A failing
    /// liveness check skips that machine. A failing cleanup is recorded in
    /// the report.
    pub async fn sweep(&self, ctx: &OpContext) -> Result<SweepReport, CheckpointError> {
        let mut report = SweepReport::default();

        let owners = ctx.run(self.repo.list_owning_machines()).await?;
        for machine_id in owners {
            match ctx.run(self.liveness.is_live(&machine_id)).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e @ (CheckpointError::Cancelled | CheckpointError::DeadlineExceeded)) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        machine_id = %machine_id,
                        error = %e,
                        "liveness check failed, skipping machine"
                    );
                    continue;
                }
            }

            let count = ctx.run(self.repo.mark_abandoned(&machine_id)).await?;
            if count > 0 {
                info!(machine_id = %machine_id, count, "abandoned checkpoints of dead machine");
                report.abandoned.insert(machine_id, count);
            }
        }

        match ctx.run(self.repo.cleanup(self.retention)).await {
            Ok(cleaned) => {
                report.cleaned = cleaned;
                if cleaned > 0 {
                    info!(count = cleaned, "deleted expired checkpoints");
                }
            }
            Err(e @ (CheckpointError::Cancelled | CheckpointError::DeadlineExceeded)) => {
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "checkpoint cleanup failed");
                report.cleanup_error = Some(e.to_string());
            }
        }

        Ok(report)
    }
}

/// Spawn the periodic recovery sweep.
///
/// The first sweep runs immediately. Each sweep gets its own deadline of
/// `operation_timeout` and is cancelled together with the task.
#[must_use]
pub fn spawn_recovery_task<R, L>(
    sweeper: Arc<RecoverySweeper<R, L>>,
    interval: Duration,
    operation_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: CheckpointRepository + 'static,
    L: LivenessOracle + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("recovery task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let ctx = OpContext::new(cancel.child_token()).with_timeout(operation_timeout);
                    match sweeper.sweep(&ctx).await {
                        Ok(report) if !report.is_complete() => {
                            warn!(
                                abandoned = report.total_abandoned(),
                                "recovery sweep finished with errors"
                            );
                        }
                        Ok(_) => {}
                        Err(CheckpointError::Cancelled) => break,
                        Err(err) => error!(error = %err, "recovery sweep failed"),
                    }
                }
            }
        }
    })
}

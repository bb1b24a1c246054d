//! Checkpoint lifecycle: claim, advance, finalize, recover.

pub mod claim;
pub mod context;
pub mod progress;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use claim::{Claim, ClaimKind, ClaimRequest, ResumeClaimer};
pub use context::OpContext;
pub use progress::{BatchOutcome, FinalStatus, PhaseRecord, ProgressTracker};
pub use sweeper::{RecoverySweeper, SweepReport, spawn_recovery_task};

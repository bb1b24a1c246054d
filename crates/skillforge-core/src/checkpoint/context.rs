//! Cancellable, deadline-bound context for checkpoint operations.

use std::future::Future;
use std::time::Duration;

use skillforge_types::error::CheckpointError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Carries cancellation and an optional deadline into store calls.
///
/// A dropped store future never commits a partial write: each store
/// operation is a single statement, so aborting it either ran the statement
/// or did not.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Context with no cancellation source and no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Bound every operation run through this context by `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, CheckpointError>
    where
        F: Future<Output = Result<T, CheckpointError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(CheckpointError::Cancelled);
        }

        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(CheckpointError::Cancelled),
                result = fut => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(CheckpointError::DeadlineExceeded)),
            None => guarded.await,
        }
    }
}

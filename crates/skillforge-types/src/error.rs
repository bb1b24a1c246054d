use thiserror::Error;

/// Errors from checkpoint validation, storage and the claim protocol.
///
/// `Unavailable` is the only transient variant; callers own the retry policy.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("invalid checkpoint: {0}")]
    Validation(String),

    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("checkpoint conflict: {0}")]
    Conflict(String),

    #[error("checkpoint storage unavailable: {0}")]
    Unavailable(String),

    #[error("checkpoint operation cancelled")]
    Cancelled,

    #[error("checkpoint operation deadline exceeded")]
    DeadlineExceeded,
}

impl CheckpointError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckpointError::Unavailable(_))
    }
}

/// Errors raised while validating loaded configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

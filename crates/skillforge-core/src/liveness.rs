//! Machine liveness oracle.
//!
//! The claim protocol and the recovery sweeper need to know whether the
//! machine owning an in-progress checkpoint is still running. How that is
//! decided (heartbeats, a cluster registry, a static list) is outside this
//! crate; callers plug in an implementation of `LivenessOracle`.

use std::collections::HashSet;

use skillforge_types::error::CheckpointError;

/// Answers "is machine X live".
pub trait LivenessOracle: Send + Sync {
    fn is_live(
        &self,
        machine_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, CheckpointError>> + Send;
}

/// Oracle backed by a fixed set of machine IDs.
///
/// Used by the operator CLI (`skf sweep --dead m1`) and by tests.
#[derive(Debug, Clone)]
pub enum StaticLiveness {
    /// Every machine is live except the listed ones.
    AllExcept(HashSet<String>),
    /// Only the listed machines are live.
    Only(HashSet<String>),
}

impl StaticLiveness {
    pub fn all_live_except<I, S>(dead: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllExcept(dead.into_iter().map(Into::into).collect())
    }

    pub fn only<I, S>(live: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(live.into_iter().map(Into::into).collect())
    }

    /// Oracle that reports every machine as live.
    pub fn everyone() -> Self {
        Self::AllExcept(HashSet::new())
    }

    fn check(&self, machine_id: &str) -> bool {
        match self {
            Self::AllExcept(dead) => !dead.contains(machine_id),
            Self::Only(live) => live.contains(machine_id),
        }
    }
}

impl LivenessOracle for StaticLiveness {
    async fn is_live(&self, machine_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.check(machine_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_live_except() {
        let oracle = StaticLiveness::all_live_except(["m1"]);
        assert!(!oracle.is_live("m1").await.unwrap());
        assert!(oracle.is_live("m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_only() {
        let oracle = StaticLiveness::only(["m2"]);
        assert!(!oracle.is_live("m1").await.unwrap());
        assert!(oracle.is_live("m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_everyone() {
        assert!(StaticLiveness::everyone().is_live("anything").await.unwrap());
    }
}

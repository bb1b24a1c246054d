//! Global configuration types for Skillforge.
//!
//! `GlobalConfig` represents the top-level `config.toml` controlling machine
//! identity, database location, claim retries and the recovery sweeper.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
///
/// Loaded from `~/.skillforge/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Identity this process claims checkpoints under. Derived from the host
    /// name and process ID when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,

    /// sqlx connection URL. Defaults to `skillforge.db` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Deadline applied to each checkpoint operation.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default)]
    pub claim: ClaimConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Resume claim protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Read/create rounds before a contended claim gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Recovery sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Terminal checkpoints older than this are deleted.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_retention_hours() -> u64 {
    168
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            machine_id: None,
            database_url: None,
            operation_timeout_secs: default_operation_timeout_secs(),
            claim: ClaimConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GlobalConfig {
    /// Reject values that would make the claim loop or sweeper degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "operation_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.claim.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "claim.max_attempts",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.recovery.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "recovery.sweep_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(machine_id) = &self.machine_id {
            if machine_id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "machine_id",
                    reason: "must not be blank".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl RecoveryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

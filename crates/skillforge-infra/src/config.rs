//! Global configuration loader for Skillforge.
//!
//! Reads `config.toml` from the data directory (`~/.skillforge/` in
//! production) and deserializes it into [`GlobalConfig`]. Falls back to
//! defaults when the file is missing, malformed or fails validation.

use std::path::{Path, PathBuf};

use skillforge_types::config::GlobalConfig;

use crate::sqlite::pool::default_database_url;

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file fails to parse or validate, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    let config = match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return GlobalConfig::default();
        }
    };

    if let Err(err) = config.validate() {
        tracing::warn!("Invalid {}: {err}, using defaults", config_path.display());
        return GlobalConfig::default();
    }
    config
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `SKILLFORGE_DATA_DIR` environment variable
/// 2. `~/.skillforge`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SKILLFORGE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".skillforge");
    }

    PathBuf::from(".skillforge")
}

/// Database URL from config, else the default file in `data_dir`.
pub fn resolve_database_url(config: &GlobalConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}

/// Machine identity from config, else `{hostname}-{pid}`.
pub fn resolve_machine_id(config: &GlobalConfig) -> String {
    if let Some(machine_id) = &config.machine_id {
        return machine_id.clone();
    }
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{host}-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.claim.max_attempts, 3);
        assert!(config.machine_id.is_none());
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
machine_id = "worker-7"

[recovery]
retention_hours = 48
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.machine_id.as_deref(), Some("worker-7"));
        assert_eq!(config.recovery.retention_hours, 48);
        assert_eq!(config.recovery.sweep_interval_secs, 300);
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.recovery.retention_hours, 168);
    }

    #[tokio::test]
    async fn load_global_config_rejected_values_return_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "[claim]\nmax_attempts = 0\n",
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.claim.max_attempts, 3);
    }

    #[test]
    fn resolve_database_url_prefers_config() {
        let mut config = GlobalConfig::default();
        let data_dir = Path::new("/data");
        assert_eq!(
            resolve_database_url(&config, data_dir),
            "sqlite:///data/skillforge.db?mode=rwc"
        );

        config.database_url = Some("sqlite::memory:".to_string());
        assert_eq!(resolve_database_url(&config, data_dir), "sqlite::memory:");
    }

    #[test]
    fn resolve_machine_id_prefers_config() {
        let mut config = GlobalConfig::default();
        let derived = resolve_machine_id(&config);
        assert!(derived.ends_with(&format!("-{}", std::process::id())));

        config.machine_id = Some("worker-a".to_string());
        assert_eq!(resolve_machine_id(&config), "worker-a");
    }
}

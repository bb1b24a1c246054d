//! Application state wiring the checkpoint store together.
//!
//! The core services are generic over repository and oracle traits; AppState
//! pins them to the SQLite implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use skillforge_core::checkpoint::OpContext;
use skillforge_infra::config::{
    load_global_config, resolve_data_dir, resolve_database_url, resolve_machine_id,
};
use skillforge_infra::sqlite::checkpoint::SqliteCheckpointRepository;
use skillforge_infra::sqlite::pool::DatabasePool;
use skillforge_types::config::GlobalConfig;

/// Shared state for every `skf` command.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub database_url: String,
    pub config: GlobalConfig,
    pub machine_id: String,
    pub db_pool: DatabasePool,
    pub checkpoints: Arc<SqliteCheckpointRepository>,
}

impl AppState {
    /// Resolve the data directory, load config and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let config = load_global_config(&data_dir).await;
        let database_url = resolve_database_url(&config, &data_dir);
        let machine_id = resolve_machine_id(&config);

        let db_pool = DatabasePool::new(&database_url)
            .await
            .with_context(|| format!("failed to open checkpoint database {database_url}"))?;
        let checkpoints = Arc::new(SqliteCheckpointRepository::new(db_pool.clone()));

        tracing::debug!(
            data_dir = %data_dir.display(),
            machine_id = %machine_id,
            "initialized app state"
        );

        Ok(Self {
            data_dir,
            database_url,
            config,
            machine_id,
            db_pool,
            checkpoints,
        })
    }

    /// Context bounded by the configured operation timeout.
    pub fn op_context(&self) -> OpContext {
        OpContext::background().with_timeout(self.config.operation_timeout())
    }

    pub async fn close(&self) {
        self.db_pool.close().await;
    }
}

//! SQLite workflow checkpoint repository implementation.
//!
//! Implements `CheckpointRepository` from `skillforge-core` using sqlx with
//! split read/write pools. Phase maps are stored as JSON text, timestamps as
//! fixed-width RFC3339 text so `ORDER BY updated_at` is chronological.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use skillforge_core::repository::checkpoint::{
    CheckpointFilter, CheckpointRepository, check_update_request, classify_rejected_update,
};
use skillforge_types::checkpoint::{
    CheckpointStatus, StatusCounts, WorkflowCheckpoint, next_timestamp, timestamp_now,
};
use skillforge_types::error::CheckpointError;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Read a row through the writer so the result reflects the statement
    /// that just ran on it.
    async fn fetch_current(&self, id: &str) -> Result<Option<WorkflowCheckpoint>, CheckpointError> {
        let row = sqlx::query("SELECT * FROM workflow_checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| CheckpointRow::from_row(&r).map_err(corrupt_row)?.into_checkpoint())
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct CheckpointRow {
    id: String,
    execution_id: String,
    skill_id: String,
    skill_name: String,
    input: String,
    input_fingerprint: String,
    attempt: i64,
    completed_batch: i64,
    total_batches: i64,
    phase_results: String,
    phase_outputs: String,
    status: String,
    input_tokens: i64,
    output_tokens: i64,
    total_cost_usd: f64,
    machine_id: String,
    created_at: String,
    updated_at: String,
}

impl CheckpointRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            skill_id: row.try_get("skill_id")?,
            skill_name: row.try_get("skill_name")?,
            input: row.try_get("input")?,
            input_fingerprint: row.try_get("input_fingerprint")?,
            attempt: row.try_get("attempt")?,
            completed_batch: row.try_get("completed_batch")?,
            total_batches: row.try_get("total_batches")?,
            phase_results: row.try_get("phase_results")?,
            phase_outputs: row.try_get("phase_outputs")?,
            status: row.try_get("status")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            total_cost_usd: row.try_get("total_cost_usd")?,
            machine_id: row.try_get("machine_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<WorkflowCheckpoint, CheckpointError> {
        let status: CheckpointStatus = self.status.parse().map_err(CheckpointError::Unavailable)?;
        let phase_results = serde_json::from_str(&self.phase_results)
            .map_err(|e| corrupt_field("phase_results", e))?;
        let phase_outputs = serde_json::from_str(&self.phase_outputs)
            .map_err(|e| corrupt_field("phase_outputs", e))?;

        Ok(WorkflowCheckpoint {
            id: self.id,
            execution_id: self.execution_id,
            skill_id: self.skill_id,
            skill_name: self.skill_name,
            input: self.input,
            input_fingerprint: self.input_fingerprint,
            attempt: u32::try_from(self.attempt).map_err(|e| corrupt_field("attempt", e))?,
            completed_batch: u32::try_from(self.completed_batch)
                .map_err(|e| corrupt_field("completed_batch", e))?,
            total_batches: u32::try_from(self.total_batches)
                .map_err(|e| corrupt_field("total_batches", e))?,
            phase_results,
            phase_outputs,
            status,
            input_tokens: u64::try_from(self.input_tokens)
                .map_err(|e| corrupt_field("input_tokens", e))?,
            output_tokens: u64::try_from(self.output_tokens)
                .map_err(|e| corrupt_field("output_tokens", e))?,
            total_cost_usd: self.total_cost_usd,
            machine_id: self.machine_id,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Column values of a checkpoint, converted for binding.
struct BoundColumns {
    phase_results: String,
    phase_outputs: String,
    input_tokens: i64,
    output_tokens: i64,
}

impl BoundColumns {
    fn from_checkpoint(checkpoint: &WorkflowCheckpoint) -> Result<Self, CheckpointError> {
        Ok(Self {
            phase_results: serde_json::to_string(&checkpoint.phase_results).map_err(|e| {
                CheckpointError::Validation(format!("failed to serialize phase_results: {e}"))
            })?,
            phase_outputs: serde_json::to_string(&checkpoint.phase_outputs).map_err(|e| {
                CheckpointError::Validation(format!("failed to serialize phase_outputs: {e}"))
            })?,
            input_tokens: to_sql_count("input_tokens", checkpoint.input_tokens)?,
            output_tokens: to_sql_count("output_tokens", checkpoint.output_tokens)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt_field("timestamp", e))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_sql_count(field: &str, value: u64) -> Result<i64, CheckpointError> {
    i64::try_from(value)
        .map_err(|_| CheckpointError::Validation(format!("{field} {value} is out of range")))
}

fn corrupt_field(field: &str, e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Unavailable(format!("corrupt checkpoint column {field}: {e}"))
}

fn corrupt_row(e: sqlx::Error) -> CheckpointError {
    CheckpointError::Unavailable(format!("corrupt checkpoint row: {e}"))
}

/// Classify driver errors by kind, never by message text.
fn map_sqlx_error(e: sqlx::Error) -> CheckpointError {
    match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            CheckpointError::Conflict(db_err.message().to_string())
        }
        sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
            CheckpointError::Validation(db_err.message().to_string())
        }
        other => CheckpointError::Unavailable(other.to_string()),
    }
}

fn rows_to_checkpoints(rows: &[SqliteRow]) -> Result<Vec<WorkflowCheckpoint>, CheckpointError> {
    let mut checkpoints = Vec::with_capacity(rows.len());
    for row in rows {
        let checkpoint_row = CheckpointRow::from_row(row).map_err(corrupt_row)?;
        checkpoints.push(checkpoint_row.into_checkpoint()?);
    }
    Ok(checkpoints)
}

// ---------------------------------------------------------------------------
// CheckpointRepository implementation
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn create(
        &self,
        checkpoint: &WorkflowCheckpoint,
    ) -> Result<WorkflowCheckpoint, CheckpointError> {
        checkpoint.validate()?;
        let columns = BoundColumns::from_checkpoint(checkpoint)?;

        sqlx::query(
            r#"INSERT INTO workflow_checkpoints
               (id, execution_id, skill_id, skill_name, input, input_fingerprint, attempt,
                completed_batch, total_batches, phase_results, phase_outputs, status,
                input_tokens, output_tokens, total_cost_usd, machine_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.execution_id)
        .bind(&checkpoint.skill_id)
        .bind(&checkpoint.skill_name)
        .bind(&checkpoint.input)
        .bind(&checkpoint.input_fingerprint)
        .bind(i64::from(checkpoint.attempt))
        .bind(i64::from(checkpoint.completed_batch))
        .bind(i64::from(checkpoint.total_batches))
        .bind(&columns.phase_results)
        .bind(&columns.phase_outputs)
        .bind(checkpoint.status.as_str())
        .bind(columns.input_tokens)
        .bind(columns.output_tokens)
        .bind(checkpoint.total_cost_usd)
        .bind(&checkpoint.machine_id)
        .bind(format_datetime(&checkpoint.created_at))
        .bind(format_datetime(&checkpoint.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            CheckpointError::Conflict(_) => CheckpointError::Conflict(format!(
                "checkpoint {} already exists or skill {} already has a live claim on this input",
                checkpoint.id, checkpoint.skill_id
            )),
            other => other,
        })?;

        tracing::debug!(
            checkpoint_id = %checkpoint.id,
            execution_id = %checkpoint.execution_id,
            skill_id = %checkpoint.skill_id,
            attempt = checkpoint.attempt,
            "created checkpoint"
        );

        let mut stored = checkpoint.clone();
        stored.created_at = stored.created_at.trunc_subsecs(6);
        stored.updated_at = stored.updated_at.trunc_subsecs(6);
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<WorkflowCheckpoint, CheckpointError> {
        let row = sqlx::query("SELECT * FROM workflow_checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => CheckpointRow::from_row(&row)
                .map_err(corrupt_row)?
                .into_checkpoint(),
            None => Err(CheckpointError::NotFound(format!("checkpoint {id}"))),
        }
    }

    async fn get_latest_in_progress(
        &self,
        skill_id: &str,
        input_fingerprint: &str,
    ) -> Result<Option<WorkflowCheckpoint>, CheckpointError> {
        let row = sqlx::query(
            r#"SELECT * FROM workflow_checkpoints
               WHERE skill_id = ? AND input_fingerprint = ? AND status = 'in_progress'
               ORDER BY updated_at DESC, id DESC
               LIMIT 1"#,
        )
        .bind(skill_id)
        .bind(input_fingerprint)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|r| CheckpointRow::from_row(&r).map_err(corrupt_row)?.into_checkpoint())
            .transpose()
    }

    async fn get_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<WorkflowCheckpoint>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_checkpoints WHERE execution_id = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        rows_to_checkpoints(&rows)
    }

    async fn update(
        &self,
        checkpoint: &WorkflowCheckpoint,
    ) -> Result<WorkflowCheckpoint, CheckpointError> {
        check_update_request(checkpoint)?;
        let columns = BoundColumns::from_checkpoint(checkpoint)?;
        let updated_at = format_datetime(&next_timestamp(checkpoint.updated_at));

        // Every guard lives in the WHERE clause so the check and the write
        // are one statement.
        let row = sqlx::query(
            r#"UPDATE workflow_checkpoints
               SET completed_batch = ?, phase_results = ?, phase_outputs = ?, status = ?,
                   input_tokens = ?, output_tokens = ?, total_cost_usd = ?, updated_at = ?
               WHERE id = ?
                 AND status = 'in_progress'
                 AND machine_id = ?
                 AND total_batches >= ?
                 AND completed_batch <= ?
                 AND input_tokens <= ?
                 AND output_tokens <= ?
                 AND total_cost_usd <= ?
                 AND updated_at < ?
                 AND NOT EXISTS (
                     SELECT 1 FROM json_each(workflow_checkpoints.phase_results) AS stored
                     WHERE stored.key NOT IN (SELECT key FROM json_each(?)))
                 AND NOT EXISTS (
                     SELECT 1 FROM json_each(workflow_checkpoints.phase_outputs) AS stored
                     WHERE stored.key NOT IN (SELECT key FROM json_each(?)))
               RETURNING *"#,
        )
        .bind(i64::from(checkpoint.completed_batch))
        .bind(&columns.phase_results)
        .bind(&columns.phase_outputs)
        .bind(checkpoint.status.as_str())
        .bind(columns.input_tokens)
        .bind(columns.output_tokens)
        .bind(checkpoint.total_cost_usd)
        .bind(&updated_at)
        .bind(&checkpoint.id)
        .bind(&checkpoint.machine_id)
        .bind(i64::from(checkpoint.completed_batch))
        .bind(i64::from(checkpoint.completed_batch))
        .bind(columns.input_tokens)
        .bind(columns.output_tokens)
        .bind(checkpoint.total_cost_usd)
        .bind(&updated_at)
        .bind(&columns.phase_results)
        .bind(&columns.phase_outputs)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = row {
            let stored = CheckpointRow::from_row(&row)
                .map_err(corrupt_row)?
                .into_checkpoint()?;
            tracing::debug!(
                checkpoint_id = %stored.id,
                status = %stored.status,
                completed_batch = stored.completed_batch,
                "updated checkpoint"
            );
            return Ok(stored);
        }

        match self.fetch_current(&checkpoint.id).await? {
            Some(current) => Err(classify_rejected_update(&current, checkpoint)),
            None => Err(CheckpointError::NotFound(format!(
                "checkpoint {}",
                checkpoint.id
            ))),
        }
    }

    async fn claim_ownership(
        &self,
        id: &str,
        expected_machine: &str,
        new_machine: &str,
    ) -> Result<WorkflowCheckpoint, CheckpointError> {
        if new_machine.trim().is_empty() {
            return Err(CheckpointError::Validation(
                "new machine_id must not be empty".to_string(),
            ));
        }

        let current = self
            .fetch_current(id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {id}")))?;
        let updated_at = format_datetime(&next_timestamp(current.updated_at));

        // `updated_at < ?` fails the swap if the row was written after the read.
        let row = sqlx::query(
            r#"UPDATE workflow_checkpoints
               SET machine_id = ?, updated_at = ?
               WHERE id = ? AND machine_id = ? AND status = 'in_progress' AND updated_at < ?
               RETURNING *"#,
        )
        .bind(new_machine)
        .bind(&updated_at)
        .bind(id)
        .bind(expected_machine)
        .bind(&updated_at)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => CheckpointRow::from_row(&row)
                .map_err(corrupt_row)?
                .into_checkpoint(),
            None => match self.fetch_current(id).await? {
                Some(current) => Err(CheckpointError::Conflict(format!(
                    "checkpoint {id} is {} and owned by {}, expected {expected_machine}",
                    current.status, current.machine_id
                ))),
                None => Err(CheckpointError::NotFound(format!("checkpoint {id}"))),
            },
        }
    }

    async fn next_attempt(
        &self,
        skill_id: &str,
        input_fingerprint: &str,
    ) -> Result<u32, CheckpointError> {
        let max_attempt: Option<i64> = sqlx::query_scalar(
            r#"SELECT MAX(attempt) FROM workflow_checkpoints
               WHERE skill_id = ? AND input_fingerprint = ? AND status != 'in_progress'"#,
        )
        .bind(skill_id)
        .bind(input_fingerprint)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        match max_attempt {
            Some(attempt) => u32::try_from(attempt + 1).map_err(|e| corrupt_field("attempt", e)),
            None => Ok(0),
        }
    }

    async fn list(
        &self,
        filter: &CheckpointFilter,
    ) -> Result<Vec<WorkflowCheckpoint>, CheckpointError> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM workflow_checkpoints WHERE 1 = 1");

        if let Some(skill_id) = &filter.skill_id {
            qb.push(" AND skill_id = ").push_bind(skill_id.clone());
        }
        if let Some(execution_id) = &filter.execution_id {
            qb.push(" AND execution_id = ").push_bind(execution_id.clone());
        }
        if let Some(machine_id) = &filter.machine_id {
            qb.push(" AND machine_id = ").push_bind(machine_id.clone());
        }
        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(after) = &filter.created_after {
            qb.push(" AND created_at >= ").push_bind(format_datetime(after));
        }
        if let Some(before) = &filter.created_before {
            qb.push(" AND created_at < ").push_bind(format_datetime(before));
        }

        qb.push(" ORDER BY updated_at DESC, id DESC");

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                qb.push(" LIMIT ").push_bind(limit.max(0));
                if let Some(offset) = offset {
                    qb.push(" OFFSET ").push_bind(offset.max(0));
                }
            }
            (None, Some(offset)) => {
                qb.push(" LIMIT -1 OFFSET ").push_bind(offset.max(0));
            }
            (None, None) => {}
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        rows_to_checkpoints(&rows)
    }

    async fn delete(&self, id: &str) -> Result<(), CheckpointError> {
        let result = sqlx::query("DELETE FROM workflow_checkpoints WHERE id = ?")
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::NotFound(format!("checkpoint {id}")));
        }

        tracing::info!(checkpoint_id = %id, "deleted checkpoint");
        Ok(())
    }

    async fn delete_by_execution_id(&self, execution_id: &str) -> Result<u64, CheckpointError> {
        let result = sqlx::query("DELETE FROM workflow_checkpoints WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;

        let count = result.rows_affected();
        tracing::info!(execution_id, count, "deleted checkpoints of execution");
        Ok(count)
    }

    async fn mark_abandoned(&self, machine_id: &str) -> Result<u64, CheckpointError> {
        let latest: Option<String> = sqlx::query_scalar(
            r#"SELECT MAX(updated_at) FROM workflow_checkpoints
               WHERE machine_id = ? AND status = 'in_progress'"#,
        )
        .bind(machine_id)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        let Some(latest) = latest else {
            return Ok(0);
        };
        let abandoned_at = format_datetime(&next_timestamp(parse_datetime(&latest)?));

        // Rows written after the read keep their status until the next sweep.
        let result = sqlx::query(
            r#"UPDATE workflow_checkpoints
               SET status = 'abandoned', updated_at = ?
               WHERE machine_id = ? AND status = 'in_progress' AND updated_at < ?"#,
        )
        .bind(&abandoned_at)
        .bind(machine_id)
        .bind(&abandoned_at)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, CheckpointError> {
        let retention = chrono::Duration::from_std(older_than).map_err(|e| {
            CheckpointError::Validation(format!("retention window out of range: {e}"))
        })?;
        let cutoff = timestamp_now().checked_sub_signed(retention).ok_or_else(|| {
            CheckpointError::Validation("retention window reaches before the epoch".to_string())
        })?;

        let result = sqlx::query(
            "DELETE FROM workflow_checkpoints WHERE status != 'in_progress' AND created_at < ?",
        )
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn list_owning_machines(&self) -> Result<Vec<String>, CheckpointError> {
        sqlx::query_scalar(
            r#"SELECT DISTINCT machine_id FROM workflow_checkpoints
               WHERE status = 'in_progress'
               ORDER BY machine_id"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, CheckpointError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM workflow_checkpoints GROUP BY status",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let status: CheckpointStatus = status.parse().map_err(CheckpointError::Unavailable)?;
            counts.add(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}

//! In-memory `CheckpointRepository` used by the core unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use skillforge_types::checkpoint::{
    CheckpointStatus, StatusCounts, WorkflowCheckpoint, next_timestamp, timestamp_now,
};
use skillforge_types::error::CheckpointError;

use crate::repository::checkpoint::{
    CheckpointFilter, CheckpointRepository, check_update_request, classify_rejected_update,
    keeps_phase_entries,
};

#[derive(Default)]
pub struct MemoryCheckpointRepository {
    rows: Mutex<HashMap<String, WorkflowCheckpoint>>,
    /// Inserted just before the next `create`, simulating a racing claimer.
    rival: Mutex<Option<WorkflowCheckpoint>>,
    fail_cleanup: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, checkpoint: WorkflowCheckpoint) {
        self.rows
            .lock()
            .unwrap()
            .insert(checkpoint.id.clone(), checkpoint);
    }

    pub fn snapshot(&self, id: &str) -> Option<WorkflowCheckpoint> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn race_next_create_with(&self, rival: WorkflowCheckpoint) {
        *self.rival.lock().unwrap() = Some(rival);
    }

    pub fn fail_cleanup(&self, fail: bool) {
        self.fail_cleanup.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CheckpointError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CheckpointError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn newest_first(mut rows: Vec<WorkflowCheckpoint>) -> Vec<WorkflowCheckpoint> {
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        rows
    }
}

impl CheckpointRepository for MemoryCheckpointRepository {
    async fn create(
        &self,
        checkpoint: &WorkflowCheckpoint,
    ) -> Result<WorkflowCheckpoint, CheckpointError> {
        self.check_available()?;
        checkpoint.validate()?;
        let mut rows = self.rows.lock().unwrap();
        if let Some(rival) = self.rival.lock().unwrap().take() {
            rows.insert(rival.id.clone(), rival);
        }
        if rows.contains_key(&checkpoint.id) {
            return Err(CheckpointError::Conflict(format!(
                "checkpoint {} already exists",
                checkpoint.id
            )));
        }
        let live_duplicate = checkpoint.status == CheckpointStatus::InProgress
            && rows.values().any(|c| {
                c.status == CheckpointStatus::InProgress
                    && c.skill_id == checkpoint.skill_id
                    && c.input_fingerprint == checkpoint.input_fingerprint
            });
        if live_duplicate {
            return Err(CheckpointError::Conflict(format!(
                "skill {} already has an in-progress checkpoint for this input",
                checkpoint.skill_id
            )));
        }
        rows.insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(checkpoint.clone())
    }

    async fn get(&self, id: &str) -> Result<WorkflowCheckpoint, CheckpointError> {
        self.check_available()?;
        self.snapshot(id)
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {id}")))
    }

    async fn get_latest_in_progress(
        &self,
        skill_id: &str,
        input_fingerprint: &str,
    ) -> Result<Option<WorkflowCheckpoint>, CheckpointError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap();
        let matching = rows
            .values()
            .filter(|c| {
                c.skill_id == skill_id
                    && c.input_fingerprint == input_fingerprint
                    && c.status == CheckpointStatus::InProgress
            })
            .cloned()
            .collect();
        Ok(Self::newest_first(matching).into_iter().next())
    }

    async fn get_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<WorkflowCheckpoint>, CheckpointError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap();
        let matching = rows
            .values()
            .filter(|c| c.execution_id == execution_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(matching))
    }

    async fn update(
        &self,
        checkpoint: &WorkflowCheckpoint,
    ) -> Result<WorkflowCheckpoint, CheckpointError> {
        self.check_available()?;
        check_update_request(checkpoint)?;
        let mut rows = self.rows.lock().unwrap();
        let current = rows
            .get_mut(&checkpoint.id)
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {}", checkpoint.id)))?;

        let updated_at = next_timestamp(checkpoint.updated_at);
        let accepted = current.status == CheckpointStatus::InProgress
            && current.machine_id == checkpoint.machine_id
            && current.updated_at < updated_at
            && checkpoint.completed_batch <= current.total_batches
            && checkpoint.completed_batch >= current.completed_batch
            && checkpoint.input_tokens >= current.input_tokens
            && checkpoint.output_tokens >= current.output_tokens
            && checkpoint.total_cost_usd >= current.total_cost_usd
            && keeps_phase_entries(current, checkpoint);
        if !accepted {
            return Err(classify_rejected_update(current, checkpoint));
        }

        current.completed_batch = checkpoint.completed_batch;
        current.phase_results = checkpoint.phase_results.clone();
        current.phase_outputs = checkpoint.phase_outputs.clone();
        current.status = checkpoint.status;
        current.input_tokens = checkpoint.input_tokens;
        current.output_tokens = checkpoint.output_tokens;
        current.total_cost_usd = checkpoint.total_cost_usd;
        current.updated_at = updated_at;
        Ok(current.clone())
    }

    async fn claim_ownership(
        &self,
        id: &str,
        expected_machine: &str,
        new_machine: &str,
    ) -> Result<WorkflowCheckpoint, CheckpointError> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap();
        let current = rows
            .get_mut(id)
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {id}")))?;
        if current.status != CheckpointStatus::InProgress || current.machine_id != expected_machine
        {
            return Err(CheckpointError::Conflict(format!(
                "checkpoint {id} is no longer owned by {expected_machine}"
            )));
        }
        current.machine_id = new_machine.to_string();
        current.updated_at = next_timestamp(current.updated_at);
        Ok(current.clone())
    }

    async fn next_attempt(
        &self,
        skill_id: &str,
        input_fingerprint: &str,
    ) -> Result<u32, CheckpointError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|c| {
                c.skill_id == skill_id
                    && c.input_fingerprint == input_fingerprint
                    && c.status.is_terminal()
            })
            .map(|c| c.attempt + 1)
            .max()
            .unwrap_or(0))
    }

    async fn list(
        &self,
        filter: &CheckpointFilter,
    ) -> Result<Vec<WorkflowCheckpoint>, CheckpointError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap();
        let matching = rows.values().filter(|c| filter.matches(c)).cloned().collect();
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(Self::newest_first(matching)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), CheckpointError> {
        self.check_available()?;
        self.rows
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CheckpointError::NotFound(format!("checkpoint {id}")))
    }

    async fn delete_by_execution_id(&self, execution_id: &str) -> Result<u64, CheckpointError> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, c| c.execution_id != execution_id);
        Ok((before - rows.len()) as u64)
    }

    async fn mark_abandoned(&self, machine_id: &str) -> Result<u64, CheckpointError> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for c in rows.values_mut().filter(|c| {
            c.machine_id == machine_id && c.status == CheckpointStatus::InProgress
        }) {
            c.status = CheckpointStatus::Abandoned;
            c.updated_at = next_timestamp(c.updated_at);
            count += 1;
        }
        Ok(count)
    }

    async fn cleanup(&self, older_than: Duration) -> Result<u64, CheckpointError> {
        self.check_available()?;
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(CheckpointError::Unavailable("cleanup failed".to_string()));
        }
        let cutoff = timestamp_now() - chrono::Duration::from_std(older_than).unwrap();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, c| !(c.status.is_terminal() && c.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn list_owning_machines(&self) -> Result<Vec<String>, CheckpointError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap();
        let mut machines: Vec<String> = rows
            .values()
            .filter(|c| c.status == CheckpointStatus::InProgress)
            .map(|c| c.machine_id.clone())
            .collect();
        machines.sort();
        machines.dedup();
        Ok(machines)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, CheckpointError> {
        self.check_available()?;
        let rows = self.rows.lock().unwrap();
        let mut counts = StatusCounts::default();
        for c in rows.values() {
            counts.add(c.status, 1);
        }
        Ok(counts)
    }
}

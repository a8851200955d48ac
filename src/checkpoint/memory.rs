//! In-process checkpoint store.

use super::{rollback_target, CheckpointId, CheckpointRecord, CheckpointState, CheckpointStore};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Checkpoint store that keeps records in memory.
///
/// Useful for tests and short-lived runs that want to inspect what was
/// checkpointed without touching disk.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<Vec<CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CheckpointRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of all records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.lock().clone()
    }

    /// Number of checkpoints still open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().iter().filter(|r| r.is_open()).count()
    }

    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|r| r.state == CheckpointState::Committed)
            .count()
    }

    #[must_use]
    pub fn rolled_back_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|r| matches!(r.state, CheckpointState::RolledBack { .. }))
            .count()
    }

    /// Tags in creation order.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.tag.clone()).collect()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create_checkpoint(
        &self,
        tag: &str,
        payload: serde_json::Value,
    ) -> Result<CheckpointId> {
        let mut records = self.lock();
        let sequence = records.last().map_or(1, |r| r.sequence + 1);
        let record = CheckpointRecord::new(sequence, tag, payload);
        let id = record.id.clone();
        debug!("Opened checkpoint {}", record.summary());
        records.push(record);
        Ok(id)
    }

    async fn commit_checkpoint(&self, id: &CheckpointId) -> Result<()> {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| OrchestratorError::CheckpointNotFound { id: id.to_string() })?;
        record.commit()
    }

    async fn rollback(&self, id: Option<&CheckpointId>, reason: &str) -> Result<()> {
        let mut records = self.lock();
        match rollback_target(&records, id)? {
            Some(idx) => {
                records[idx].roll_back(reason);
                info!("Rolled back {}", records[idx].summary());
            }
            None => debug!("Rollback requested with no open checkpoint: {}", reason),
        }
        Ok(())
    }
}

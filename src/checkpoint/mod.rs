//! Checkpoint contract and reference stores.
//!
//! Loops open a checkpoint before every mutating operation (building a
//! feature, applying a tier of fixes, running a segment of plan groups) and
//! either commit it on success or roll back to it on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────┐
//! │ CheckpointStore  │<────│ NoopCheckpointStore│  (default, no side effects)
//! │  create/commit/  │<────│ MemoryCheckpoint.. │  (in-process, inspectable)
//! │  rollback        │<────│ FileCheckpointStore│  (JSON records on disk)
//! └──────────────────┘     └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use autoforge::checkpoint::{CheckpointStore, MemoryCheckpointStore};
//!
//! let store = MemoryCheckpointStore::new();
//! let id = store.create_checkpoint("feature:login", serde_json::json!({})).await?;
//! // ... mutate ...
//! store.commit_checkpoint(&id).await?;
//! ```

pub mod file;
pub mod memory;

pub use file::{FileCheckpointConfig, FileCheckpointStore};
pub use memory::MemoryCheckpointStore;

use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ============================================================================
// Checkpoint ID
// ============================================================================

/// Unique identifier for a checkpoint.
///
/// Wraps a UUID v4 string for type safety and serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Create a new random checkpoint ID.
    ///
    /// # Example
    ///
    /// ```
    /// use autoforge::checkpoint::CheckpointId;
    ///
    /// let id = CheckpointId::new();
    /// assert!(!id.as_str().is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a checkpoint ID from an existing string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Checkpoint Record
// ============================================================================

/// Lifecycle of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckpointState {
    Open,
    Committed,
    RolledBack { reason: String },
}

/// A stored checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: CheckpointId,
    /// Monotonic creation order within a store
    pub sequence: u64,
    /// Caller-supplied tag (e.g. `feature:login`)
    pub tag: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: CheckpointState,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    /// Create a new open record.
    #[must_use]
    pub fn new(sequence: u64, tag: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: CheckpointId::new(),
            sequence,
            tag: tag.into(),
            payload,
            created_at: Utc::now(),
            state: CheckpointState::Open,
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == CheckpointState::Open
    }

    /// Mark committed. Committing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the checkpoint was already rolled back.
    pub fn commit(&mut self) -> Result<()> {
        match &self.state {
            CheckpointState::Open => {
                self.state = CheckpointState::Committed;
                self.resolved_at = Some(Utc::now());
                Ok(())
            }
            CheckpointState::Committed => Ok(()),
            CheckpointState::RolledBack { .. } => Err(OrchestratorError::checkpoint(format!(
                "cannot commit checkpoint {} after rollback",
                self.id
            ))),
        }
    }

    /// Mark rolled back with a reason.
    pub fn roll_back(&mut self, reason: impl Into<String>) {
        self.state = CheckpointState::RolledBack {
            reason: reason.into(),
        };
        self.resolved_at = Some(Utc::now());
    }

    /// Short human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let state = match &self.state {
            CheckpointState::Open => "open".to_string(),
            CheckpointState::Committed => "committed".to_string(),
            CheckpointState::RolledBack { reason } => format!("rolled back: {}", reason),
        };
        format!(
            "#{} {} [{}] {}",
            self.sequence,
            self.tag,
            state,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Locate the record a rollback applies to.
///
/// With an explicit id, that record; without, the most recent open one.
pub(crate) fn rollback_target(
    records: &[CheckpointRecord],
    id: Option<&CheckpointId>,
) -> Result<Option<usize>> {
    match id {
        Some(id) => records
            .iter()
            .position(|r| &r.id == id)
            .map(Some)
            .ok_or_else(|| OrchestratorError::CheckpointNotFound {
                id: id.to_string(),
            }),
        None => Ok(records.iter().rposition(CheckpointRecord::is_open)),
    }
}

// ============================================================================
// Store Contract
// ============================================================================

/// Checkpoint collaborator contract.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Open a checkpoint before a mutating operation.
    async fn create_checkpoint(&self, tag: &str, payload: serde_json::Value)
        -> Result<CheckpointId>;

    /// Mark the operation guarded by the checkpoint as successful.
    async fn commit_checkpoint(&self, id: &CheckpointId) -> Result<()>;

    /// Roll back to the given checkpoint, or the most recent open one.
    async fn rollback(&self, id: Option<&CheckpointId>, reason: &str) -> Result<()>;
}

/// Store that records nothing. Used when no store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCheckpointStore;

#[async_trait]
impl CheckpointStore for NoopCheckpointStore {
    async fn create_checkpoint(
        &self,
        tag: &str,
        _payload: serde_json::Value,
    ) -> Result<CheckpointId> {
        debug!("noop checkpoint: {}", tag);
        Ok(CheckpointId::new())
    }

    async fn commit_checkpoint(&self, _id: &CheckpointId) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _id: Option<&CheckpointId>, reason: &str) -> Result<()> {
        debug!("noop rollback: {}", reason);
        Ok(())
    }
}

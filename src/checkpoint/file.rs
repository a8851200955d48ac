//! File-backed checkpoint store.
//!
//! Each checkpoint is one JSON record in the storage directory, named by
//! its id. Records are written atomically: serialize to a `.tmp` sibling,
//! `sync_all`, then rename over the target while holding an exclusive
//! `fs2` lock on `.lock` in the same directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use autoforge::checkpoint::{CheckpointStore, FileCheckpointStore};
//!
//! let store = FileCheckpointStore::new(".autoforge/checkpoints")?;
//! let id = store.create_checkpoint("feature:login", serde_json::json!({})).await?;
//! store.commit_checkpoint(&id).await?;
//!
//! for record in store.list()? {
//!     println!("{}", record.summary());
//! }
//! store.prune(10)?;
//! ```

use super::{rollback_target, CheckpointId, CheckpointRecord, CheckpointStore};
use crate::error::{IntoOrchestratorError, OrchestratorError, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".lock";
const TMP_SUFFIX: &str = ".tmp";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the file store.
#[derive(Debug, Clone)]
pub struct FileCheckpointConfig {
    /// Maximum number of resolved checkpoints to retain.
    pub max_checkpoints: usize,

    /// Whether to prune automatically after each new checkpoint.
    pub auto_prune: bool,
}

impl Default for FileCheckpointConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: 50,
            auto_prune: true,
        }
    }
}

impl FileCheckpointConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = max;
        self
    }

    #[must_use]
    pub fn with_auto_prune(mut self, enabled: bool) -> Self {
        self.auto_prune = enabled;
        self
    }
}

// ============================================================================
// File Checkpoint Store
// ============================================================================

#[derive(Debug, Default)]
struct Cache {
    records: Vec<CheckpointRecord>,
    loaded: bool,
}

/// Checkpoint store persisting one JSON file per record.
#[derive(Debug)]
pub struct FileCheckpointStore {
    storage_dir: PathBuf,
    config: FileCheckpointConfig,
    cache: Mutex<Cache>,
}

impl FileCheckpointStore {
    /// Open a store rooted at `storage_dir`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(storage_dir, FileCheckpointConfig::default())
    }

    /// Open a store with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_config(storage_dir: impl AsRef<Path>, config: FileCheckpointConfig) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        if !storage_dir.exists() {
            fs::create_dir_all(&storage_dir).map_err(|e| {
                OrchestratorError::checkpoint(format!(
                    "Failed to create checkpoint directory {}: {}",
                    storage_dir.display(),
                    e
                ))
            })?;
            debug!("Created checkpoint directory: {}", storage_dir.display());
        }

        Ok(Self {
            storage_dir,
            config,
            cache: Mutex::new(Cache::default()),
        })
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn config(&self) -> &FileCheckpointConfig {
        &self.config
    }

    /// All records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be read.
    pub fn list(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.loaded_cache()?.records.clone())
    }

    /// Look up a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be read.
    pub fn get(&self, id: &CheckpointId) -> Result<Option<CheckpointRecord>> {
        Ok(self
            .loaded_cache()?
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned())
    }

    /// The most recently created record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be read.
    pub fn latest(&self) -> Result<Option<CheckpointRecord>> {
        Ok(self.loaded_cache()?.records.last().cloned())
    }

    /// Remove old resolved checkpoints, keeping the `keep` most recent.
    ///
    /// Open checkpoints are never pruned. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a record file cannot be deleted.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut cache = self.loaded_cache()?;
        self.prune_locked(&mut cache, keep)
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded_cache(&self) -> Result<MutexGuard<'_, Cache>> {
        let mut cache = self.lock_cache();
        if !cache.loaded {
            cache.records = self.load_records()?;
            cache.loaded = true;
        }
        Ok(cache)
    }

    fn record_path(&self, id: &CheckpointId) -> PathBuf {
        self.storage_dir.join(format!("{}.json", id))
    }

    fn save_record(&self, record: &CheckpointRecord) -> Result<()> {
        let lock_file = File::create(self.storage_dir.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&lock_file).map_err(|e| {
            OrchestratorError::checkpoint(format!("Failed to acquire checkpoint lock: {}", e))
        })?;

        let path = self.record_path(&record.id);
        let tmp_path = path.with_extension(format!("json{}", TMP_SUFFIX));
        let json = serde_json::to_string_pretty(record)?;

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, &path).into_checkpoint_error()?;

        Ok(())
    }

    fn load_records(&self) -> Result<Vec<CheckpointRecord>> {
        let mut records = Vec::new();
        let entries = fs::read_dir(&self.storage_dir).map_err(|e| {
            OrchestratorError::checkpoint(format!(
                "Failed to read checkpoint directory {}: {}",
                self.storage_dir.display(),
                e
            ))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let parsed = fs::read_to_string(&path)
                .map_err(OrchestratorError::from)
                .and_then(|content| {
                    serde_json::from_str::<CheckpointRecord>(&content).map_err(Into::into)
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }

        records.sort_by_key(|r| r.sequence);
        debug!("Loaded {} checkpoints from disk", records.len());
        Ok(records)
    }

    fn prune_locked(&self, cache: &mut Cache, keep: usize) -> Result<usize> {
        let resolved = cache.records.iter().filter(|r| !r.is_open()).count();
        if resolved <= keep {
            return Ok(0);
        }

        let mut kept = 0;
        let mut to_remove = Vec::new();
        for (idx, record) in cache.records.iter().enumerate().rev() {
            if record.is_open() {
                continue;
            }
            if kept >= keep {
                to_remove.push(idx);
            } else {
                kept += 1;
            }
        }

        // to_remove is descending, so indices stay valid while removing
        for &idx in &to_remove {
            let path = self.record_path(&cache.records[idx].id);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    OrchestratorError::checkpoint(format!(
                        "Failed to delete checkpoint {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
            cache.records.remove(idx);
        }

        info!(
            "Pruned {} checkpoints, {} remaining",
            to_remove.len(),
            cache.records.len()
        );
        Ok(to_remove.len())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn create_checkpoint(
        &self,
        tag: &str,
        payload: serde_json::Value,
    ) -> Result<CheckpointId> {
        let mut cache = self.loaded_cache()?;
        let sequence = cache.records.last().map_or(1, |r| r.sequence + 1);
        let record = CheckpointRecord::new(sequence, tag, payload);
        self.save_record(&record)?;

        let id = record.id.clone();
        debug!("Created checkpoint: {}", record.summary());
        cache.records.push(record);

        if self.config.auto_prune && cache.records.len() > self.config.max_checkpoints {
            self.prune_locked(&mut cache, self.config.max_checkpoints)?;
        }
        Ok(id)
    }

    async fn commit_checkpoint(&self, id: &CheckpointId) -> Result<()> {
        let mut cache = self.loaded_cache()?;
        let record = cache
            .records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| OrchestratorError::CheckpointNotFound { id: id.to_string() })?;
        record.commit()?;
        let snapshot = record.clone();
        self.save_record(&snapshot)
    }

    async fn rollback(&self, id: Option<&CheckpointId>, reason: &str) -> Result<()> {
        let mut cache = self.loaded_cache()?;
        let Some(idx) = rollback_target(&cache.records, id)? else {
            debug!("Rollback requested with no open checkpoint: {}", reason);
            return Ok(());
        };

        cache.records[idx].roll_back(reason);
        let snapshot = cache.records[idx].clone();
        self.save_record(&snapshot)?;
        info!("Rolled back {}", snapshot.summary());
        Ok(())
    }
}

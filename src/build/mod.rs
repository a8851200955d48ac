//! Feature build loop.
//!
//! Repeatedly picks the next queued feature whose dependencies have been
//! built and hands it to the agent registered for its platform:
//!
//! ```text
//!  queue (priority, #deps) ──select ready──> checkpoint "feature:<id>"
//!                                                  │
//!                         resolve agent by platform┤
//!                                                  v
//!                      execute ──> write artifacts ──> commit
//!                          │ error
//!                          └──> rollback, record failure, continue
//! ```
//!
//! A run ends when the queue drains (`success`), the iteration bound is hit,
//! no queued feature is ready (`stalled`), or a stop is requested. Completed
//! feature ids persist across runs so later features can depend on earlier
//! ones.

pub mod feature;
pub mod state;

pub use feature::Feature;
pub use state::{BuildReport, BuildStatus, FeatureFailure};

use crate::checkpoint::{CheckpointStore, NoopCheckpointStore};
use crate::emit::write_artifacts;
use crate::error::{OrchestratorError, Result};
use crate::events::{
    EventBus, InMemoryEventBus, BUILD_COMPLETED, BUILD_FAILED, BUILD_LOOP_COMPLETED, BUILD_STARTED,
};
use crate::graph::dependencies_satisfied;
use crate::registry::AgentRegistry;
use crate::stop::StopHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use state::LoopState;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const STALLED_MESSAGE: &str = "no more features ready";

/// Configuration for the build loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildLoopConfig {
    /// Upper bound on features attempted per run
    pub max_iterations: u32,
    /// Root for relative artifact paths
    pub output_dir: PathBuf,
}

impl Default for BuildLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            output_dir: PathBuf::from("."),
        }
    }
}

impl BuildLoopConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

/// Sequential, dependency-aware feature builder.
pub struct BuildLoop {
    config: BuildLoopConfig,
    agents: Arc<AgentRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    bus: Arc<dyn EventBus>,
    queue: Vec<Feature>,
    completed: HashSet<String>,
    status: BuildStatus,
    stop: StopHandle,
    runs: u64,
}

impl BuildLoop {
    #[must_use]
    pub fn new(config: BuildLoopConfig, agents: Arc<AgentRegistry>) -> Self {
        Self {
            config,
            agents,
            checkpoints: Arc::new(NoopCheckpointStore),
            bus: Arc::new(InMemoryEventBus::with_history_limit(0)),
            queue: Vec::new(),
            completed: HashSet::new(),
            status: BuildStatus::Idle,
            stop: StopHandle::new(),
            runs: 0,
        }
    }

    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BuildLoopConfig {
        &self.config
    }

    /// Status of the current or most recent run.
    #[must_use]
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    /// Handle that asks the loop to stop at the next iteration boundary.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[must_use]
    pub fn queued(&self) -> &[Feature] {
        &self.queue
    }

    #[must_use]
    pub fn completed_ids(&self) -> &HashSet<String> {
        &self.completed
    }

    /// Record a feature as built outside the loop.
    pub fn mark_completed(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.queue.retain(|f| f.id != id);
        self.completed.insert(id);
    }

    /// Add features to the queue.
    ///
    /// Features already queued or completed are skipped. The queue is kept
    /// stably sorted by priority, then by dependency count.
    pub fn enqueue(&mut self, features: impl IntoIterator<Item = Feature>) {
        for feature in features {
            if self.completed.contains(&feature.id) || self.queue.iter().any(|f| f.id == feature.id)
            {
                warn!("Feature '{}' already queued or built, skipping", feature.id);
                continue;
            }
            self.queue.push(feature);
        }
        self.queue.sort_by_key(|f| (f.priority, f.dependencies.len()));
        debug!("{} features queued", self.queue.len());
    }

    /// Run until the queue drains or another terminal condition is reached.
    ///
    /// Agent failures are recorded in the report and never returned as
    /// errors.
    pub async fn run(&mut self) -> BuildReport {
        let started = Instant::now();
        self.runs += 1;
        self.status = BuildStatus::Running;
        let mut state = LoopState::new(self.runs, self.config.max_iterations);
        let mut message = None;

        info!(
            "Build loop {} starting with {} queued features",
            state.run_id,
            self.queue.len()
        );

        let status = loop {
            if self.queue.is_empty() {
                break BuildStatus::Success;
            }
            if self.stop.is_stop_requested() {
                info!("Build loop {} stopped", state.run_id);
                break BuildStatus::Stopped;
            }
            if state.at_bound() {
                warn!(
                    "Build loop {} reached max iterations ({})",
                    state.run_id, state.max_iterations
                );
                break BuildStatus::MaxIterationsReached;
            }

            let Some(idx) = self
                .queue
                .iter()
                .position(|f| dependencies_satisfied(&f.dependencies, &self.completed))
            else {
                warn!(
                    "Build loop {} stalled with {} features waiting",
                    state.run_id,
                    self.queue.len()
                );
                message = Some(STALLED_MESSAGE.to_string());
                break BuildStatus::Stalled;
            };

            let feature = self.queue.remove(idx);
            state.iteration += 1;

            match self.build_feature(&feature, &mut state).await {
                Ok(true) => {
                    self.completed.insert(feature.id);
                }
                Ok(false) => {}
                Err(e) => {
                    // Nothing was mutated; put the feature back where it was
                    warn!("Build loop {} aborted: {}", state.run_id, e);
                    self.queue.insert(idx, feature);
                    message = Some(e.to_string());
                    break BuildStatus::Error;
                }
            }
        };

        self.status = status;
        if status == BuildStatus::Stopped {
            self.stop.reset();
        }
        let report = BuildReport {
            run_id: state.run_id,
            status,
            iterations: state.iteration,
            completed: state.completed,
            failed: state.failed,
            remaining: self.queue.len(),
            artifacts_written: state.artifacts_written,
            hit_iteration_bound: status == BuildStatus::MaxIterationsReached,
            elapsed: started.elapsed(),
            message,
        };

        info!("{}", report.summary());
        self.bus.publish(
            BUILD_LOOP_COMPLETED,
            serde_json::to_value(&report).unwrap_or_else(|_| json!({ "status": status })),
        );
        report
    }

    /// Build one feature under a checkpoint.
    ///
    /// Returns whether the feature was built. Only a checkpoint that cannot
    /// be opened is returned as an error; everything after that is recorded
    /// in `state`.
    async fn build_feature(&self, feature: &Feature, state: &mut LoopState) -> Result<bool> {
        let tag = format!("feature:{}", feature.id);
        let checkpoint = self
            .checkpoints
            .create_checkpoint(
                &tag,
                json!({ "feature": feature.id, "platform": feature.platform, "run": state.run_id }),
            )
            .await?;

        info!(
            "[{}/{}] Building feature '{}' on {}",
            state.iteration, state.max_iterations, feature.id, feature.platform
        );
        self.bus.publish(
            BUILD_STARTED,
            json!({ "feature": feature.id, "platform": feature.platform, "iteration": state.iteration }),
        );

        match self.execute_feature(feature).await {
            Ok(written) => {
                if let Err(e) = self.checkpoints.commit_checkpoint(&checkpoint).await {
                    warn!("Failed to commit checkpoint for '{}': {}", feature.id, e);
                }
                state.artifacts_written += written.len();
                state.completed.push(feature.id.clone());
                self.bus.publish(
                    BUILD_COMPLETED,
                    json!({ "feature": feature.id, "files": written }),
                );
            }
            Err(e) => {
                let error = e.to_string();
                warn!("Feature '{}' failed: {}", feature.id, error);
                if let Err(rollback_err) = self.checkpoints.rollback(Some(&checkpoint), &error).await
                {
                    warn!("Rollback for '{}' failed: {}", feature.id, rollback_err);
                }
                self.bus.publish(
                    BUILD_FAILED,
                    json!({ "feature": feature.id, "error": error }),
                );
                state.failed.push(FeatureFailure {
                    id: feature.id.clone(),
                    error,
                });
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn execute_feature(&self, feature: &Feature) -> Result<Vec<PathBuf>> {
        let agent = self
            .agents
            .resolve(&feature.platform)
            .await?
            .ok_or_else(|| OrchestratorError::unknown_platform(&feature.platform))?;

        let output = agent.execute(&feature.to_request()).await.map_err(|e| {
            OrchestratorError::loop_error(format!("agent '{}' failed: {}", feature.platform, e))
        })?;

        if !output.has_artifacts() {
            debug!(
                "Agent '{}' has no generation capability for '{}'",
                feature.platform, feature.id
            );
            return Ok(Vec::new());
        }
        write_artifacts(&self.config.output_dir, &output.artifacts).await
    }
}

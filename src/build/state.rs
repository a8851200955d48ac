//! Build loop status and reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Build loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Idle,
    Running,
    /// The queue drained
    Success,
    MaxIterationsReached,
    /// Features remain but none has its dependencies met
    Stalled,
    Stopped,
    /// The loop could not guard a mutation and aborted
    Error,
}

impl BuildStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildStatus::Idle | BuildStatus::Running)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Idle => "idle",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::MaxIterationsReached => "max_iterations_reached",
            BuildStatus::Stalled => "stalled",
            BuildStatus::Stopped => "stopped",
            BuildStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A feature that failed to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFailure {
    pub id: String,
    pub error: String,
}

/// Per-run mutable state. Created when a run starts, dropped when it ends.
#[derive(Debug, Clone)]
pub(crate) struct LoopState {
    pub run_id: u64,
    pub iteration: u32,
    pub max_iterations: u32,
    pub completed: Vec<String>,
    pub failed: Vec<FeatureFailure>,
    pub artifacts_written: usize,
}

impl LoopState {
    pub fn new(run_id: u64, max_iterations: u32) -> Self {
        Self {
            run_id,
            iteration: 0,
            max_iterations,
            completed: Vec::new(),
            failed: Vec::new(),
            artifacts_written: 0,
        }
    }

    pub fn at_bound(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// Terminal summary of one build loop run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub run_id: u64,
    pub status: BuildStatus,
    pub iterations: u32,
    pub completed: Vec<String>,
    pub failed: Vec<FeatureFailure>,
    /// Features still queued
    pub remaining: usize,
    pub artifacts_written: usize,
    pub hit_iteration_bound: bool,
    pub elapsed: Duration,
    pub message: Option<String>,
}

impl BuildReport {
    /// One-line summary for terminal output.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "build {}: {} completed, {} failed, {} remaining after {} iterations",
            self.status,
            self.completed.len(),
            self.failed.len(),
            self.remaining,
            self.iterations
        );
        if let Some(message) = &self.message {
            line.push_str(&format!(" ({})", message));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::Idle.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
        assert!(BuildStatus::Stalled.is_terminal());
        assert!(BuildStatus::Success.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&BuildStatus::MaxIterationsReached).unwrap();
        assert_eq!(json, "\"max_iterations_reached\"");
        assert_eq!(BuildStatus::MaxIterationsReached.to_string(), "max_iterations_reached");
    }

    #[test]
    fn test_loop_state_bound() {
        let mut state = LoopState::new(1, 2);
        assert!(!state.at_bound());
        state.iteration = 2;
        assert!(state.at_bound());
    }
}

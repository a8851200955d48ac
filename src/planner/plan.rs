//! Plan types produced by the [`ExecutionPlanner`](super::ExecutionPlanner).

use crate::error::{OrchestratorError, Result};
use crate::graph::{GraphNode, GraphWarning};
use crate::task::{Phase, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Current plan schema version.
pub const PLAN_VERSION: u32 = 1;

// ============================================================================
// Execution Groups & Checkpoints
// ============================================================================

/// A batch of mutually independent, same-phase tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    /// Position in the plan's group list
    pub index: usize,
    pub phase: Phase,
    pub task_ids: Vec<String>,
}

impl ExecutionGroup {
    #[must_use]
    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

/// Why a checkpoint was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// The group ends a phase
    PhaseTransition,
    /// Enough tasks were scheduled since the previous checkpoint
    Periodic,
    /// After the last group
    Final,
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointKind::PhaseTransition => write!(f, "phase-transition"),
            CheckpointKind::Periodic => write!(f, "periodic"),
            CheckpointKind::Final => write!(f, "final"),
        }
    }
}

/// A checkpoint placed after a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCheckpoint {
    /// Index of the group this checkpoint follows
    pub after_group: usize,
    pub kind: CheckpointKind,
    /// Phase of the group this checkpoint follows
    pub phase: Phase,
    /// Total tasks scheduled up to and including that group
    pub tasks_scheduled: usize,
}

// ============================================================================
// Plan
// ============================================================================

/// Creation metadata for a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub created_at: DateTime<Utc>,
    pub task_count: usize,
    pub group_count: usize,
    pub max_concurrency: usize,
    /// Tasks for which no agent could be inferred
    pub unassigned_tasks: Vec<String>,
    pub warnings: Vec<GraphWarning>,
}

/// Outcome of [`Plan::update_task_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Status changed and timestamps were stamped
    Applied,
    /// Status was already the requested one; metadata refreshed only
    Refreshed,
    /// The transition would regress a final status and was dropped
    Ignored,
}

/// A dependency-correct execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub version: u32,
    /// Tasks in topological order
    pub tasks: Vec<Task>,
    pub execution_groups: Vec<ExecutionGroup>,
    pub checkpoints: Vec<PlannedCheckpoint>,
    pub dependency_graph: BTreeMap<String, GraphNode>,
    pub phases: BTreeMap<Phase, Vec<String>>,
    pub estimated_duration_mins: u32,
    pub metadata: PlanMetadata,
}

impl Plan {
    /// Look up a task by id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Look up a task by id, mutably.
    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Ids of tasks whose status is `Completed`.
    #[must_use]
    pub fn completed_ids(&self) -> HashSet<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Count tasks with the given status.
    #[must_use]
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Check whether every task reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// The checkpoint placed after a group, if any.
    #[must_use]
    pub fn checkpoint_after(&self, group_index: usize) -> Option<&PlannedCheckpoint> {
        self.checkpoints.iter().find(|c| c.after_group == group_index)
    }

    /// Update a task's status in place.
    ///
    /// Repeating the current terminal status refreshes the result and
    /// `updated_at` but keeps `completed_at`/`failed_at`. Transitions out of
    /// a final status are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskNotFound`] if the id is absent.
    pub fn update_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<StatusUpdate> {
        let task = self
            .task_mut(task_id)
            .ok_or_else(|| OrchestratorError::task_not_found(task_id))?;
        let now = Utc::now();

        if task.status == status {
            if let Some(result) = result {
                task.result = Some(result);
            }
            task.updated_at = Some(now);
            debug!("Task '{}' already {}, refreshed", task_id, status);
            return Ok(StatusUpdate::Refreshed);
        }

        if !task.status.can_transition_to(status) {
            warn!(
                "Ignoring status change for task '{}': {} -> {}",
                task_id, task.status, status
            );
            return Ok(StatusUpdate::Ignored);
        }

        debug!("Task '{}': {} -> {}", task_id, task.status, status);
        task.status = status;
        task.updated_at = Some(now);
        match status {
            TaskStatus::Completed => task.completed_at = Some(now),
            TaskStatus::Failed => task.failed_at = Some(now),
            _ => {}
        }
        if let Some(result) = result {
            task.result = Some(result);
        }
        Ok(StatusUpdate::Applied)
    }

    /// One-line summary for terminal output.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "plan {} - {} tasks in {} groups, {} checkpoints, ~{} min",
            &self.id[..self.id.len().min(8)],
            self.tasks.len(),
            self.execution_groups.len(),
            self.checkpoints.len(),
            self.estimated_duration_mins
        )
    }
}

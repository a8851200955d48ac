//! Task data model.
//!
//! A [`Task`] is the unit of work the planner schedules. Tasks carry their
//! dependency ids, a lifecycle [`Phase`], an optional assigned agent, and a
//! [`TaskStatus`] that moves through the state machine below.
//!
//! ```text
//! Pending ──> Ready ──> Assigned ──> Running ──> Completed
//!    │          │           │           ├──────> Failed ──(retry)──> Pending
//!    └──────────┴───────────┴───────────┴──────> Skipped | Blocked
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default minutes of work per complexity point.
pub const DEFAULT_MINUTES_PER_COMPLEXITY: u32 = 30;

// ============================================================================
// Phase
// ============================================================================

/// Lifecycle phase of a task.
///
/// Declaration order is execution order; `Ord` follows it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Architecture,
    #[default]
    Implementation,
    Testing,
    Integration,
    Deployment,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 6] = [
        Phase::Setup,
        Phase::Architecture,
        Phase::Implementation,
        Phase::Testing,
        Phase::Integration,
        Phase::Deployment,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Architecture => "architecture",
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
            Phase::Integration => "integration",
            Phase::Deployment => "deployment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task Status
// ============================================================================

/// Current status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet eligible or not yet looked at
    #[default]
    Pending,
    /// All dependencies satisfied
    Ready,
    /// Handed to an agent but not started
    Assigned,
    /// Being executed
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Deliberately not executed
    Skipped,
    /// Cannot run because a dependency failed or was blocked
    Blocked,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl TaskStatus {
    /// Check if this status is terminal.
    ///
    /// # Example
    ///
    /// ```
    /// use autoforge::task::TaskStatus;
    ///
    /// assert!(TaskStatus::Completed.is_terminal());
    /// assert!(!TaskStatus::Running.is_terminal());
    /// ```
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Check if the task is currently handed out.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    /// Check if this status can transition to the target status.
    ///
    /// Non-terminal statuses may move anywhere. `Failed` may be retried
    /// (back to `Pending`/`Ready`). `Completed` and `Skipped` are final.
    ///
    /// # Example
    ///
    /// ```
    /// use autoforge::task::TaskStatus;
    ///
    /// assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
    /// assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
    /// assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Completed | Skipped => false,
            Failed => matches!(target, Pending | Ready),
            _ => true,
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Type tag (e.g. "feature", "bugfix", "test")
    #[serde(default, rename = "type")]
    pub task_type: String,
    /// Priority, lower is more urgent
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Complexity estimate, 1-5
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    /// Ordered, de-duplicated dependency ids
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Category tag used to infer phase and agent
    #[serde(default)]
    pub category: Option<String>,
    /// Lifecycle phase (inferred by the planner when absent)
    #[serde(default)]
    pub phase: Option<Phase>,
    /// Assigned agent name (inferred by the planner when absent)
    #[serde(default)]
    pub agent: Option<String>,
    /// Current status
    #[serde(default)]
    pub status: TaskStatus,
    /// Free-form result payload
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Explicit duration estimate in minutes
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u32 {
    5
}

fn default_complexity() -> u8 {
    2
}

impl Task {
    /// Create a new pending task.
    ///
    /// # Example
    ///
    /// ```
    /// use autoforge::task::Task;
    ///
    /// let task = Task::new("db", "Create schema").with_dependencies(["setup", "setup"]);
    /// assert_eq!(task.dependencies, vec!["setup".to_string()]);
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            task_type: String::new(),
            priority: default_priority(),
            complexity: default_complexity(),
            dependencies: Vec::new(),
            category: None,
            phase: None,
            agent: None,
            status: TaskStatus::Pending,
            result: None,
            estimated_minutes: None,
            updated_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set complexity, clamped to 1-5.
    #[must_use]
    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity.clamp(1, 5);
        self
    }

    /// Set dependencies, keeping first occurrence order and dropping repeats.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.clear();
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn with_estimated_minutes(mut self, minutes: u32) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    /// Normalize fields that may arrive unnormalized from deserialization.
    pub(crate) fn normalize(&mut self) {
        self.complexity = self.complexity.clamp(1, 5);
        let mut seen = Vec::with_capacity(self.dependencies.len());
        for dep in self.dependencies.drain(..) {
            if !seen.contains(&dep) {
                seen.push(dep);
            }
        }
        self.dependencies = seen;
    }

    /// Estimated duration in minutes.
    ///
    /// Uses the explicit estimate if set, otherwise a linear function of
    /// complexity. Saturates instead of overflowing.
    #[must_use]
    pub fn estimated_duration(&self, minutes_per_complexity: u32) -> u32 {
        self.estimated_minutes
            .unwrap_or_else(|| u32::from(self.complexity).saturating_mul(minutes_per_complexity))
    }

    /// The phase, defaulting to implementation when unassigned.
    #[must_use]
    pub fn phase_or_default(&self) -> Phase {
        self.phase.unwrap_or_default()
    }
}

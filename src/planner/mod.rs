//! Execution planning.
//!
//! The [`ExecutionPlanner`] turns a raw task list into a [`Plan`]:
//!
//! ```text
//! tasks ──> DependencyGraph ──cycle check──> topological order
//!                                                 │
//!                      phase + agent inference <──┘
//!                                 │
//!                                 v
//!            execution groups ──> checkpoints ──> duration estimate
//! ```
//!
//! - [`phase`] - lifecycle phase inference
//! - [`agent`] - agent inference from categories
//! - [`plan`] - plan, group, and checkpoint types
//! - [`runner`] - concurrent, group-by-group plan execution

pub mod agent;
pub mod phase;
pub mod plan;
pub mod runner;

pub use agent::{infer_agent, resolve_agent, ARCHITECT_AGENT};
pub use phase::{infer_phase, resolve_phase};
pub use plan::{
    CheckpointKind, ExecutionGroup, Plan, PlanMetadata, PlannedCheckpoint, StatusUpdate,
    PLAN_VERSION,
};
pub use runner::{PlanRunReport, PlanRunner, TaskExecutor, TaskFailure};

use crate::error::{OrchestratorError, Result};
use crate::graph::{dependencies_satisfied, DependencyGraph};
use crate::task::{Phase, Task, TaskStatus, DEFAULT_MINUTES_PER_COMPLEXITY};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// Planner Configuration
// ============================================================================

/// Configuration for plan creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum tasks per execution group.
    pub max_concurrency: usize,

    /// Scheduled tasks between periodic checkpoints.
    pub checkpoint_interval: usize,

    /// Default duration per complexity point, in minutes.
    pub minutes_per_complexity: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            checkpoint_interval: 5,
            minutes_per_complexity: DEFAULT_MINUTES_PER_COMPLEXITY,
        }
    }
}

impl PlannerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum group size.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set periodic checkpoint interval (in tasks).
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

// ============================================================================
// Execution Planner
// ============================================================================

/// Builds and queries execution plans.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlanner {
    config: PlannerConfig,
}

impl ExecutionPlanner {
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Create a plan from a raw task list.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::CircularDependency`] if the tasks form a
    /// cycle (no groups are built), or [`OrchestratorError::PlanIntegrity`]
    /// if grouping stalls.
    ///
    /// # Example
    ///
    /// ```
    /// use autoforge::planner::{ExecutionPlanner, PlannerConfig};
    /// use autoforge::task::Task;
    ///
    /// let planner = ExecutionPlanner::new(PlannerConfig::default());
    /// let plan = planner
    ///     .create_plan(vec![
    ///         Task::new("schema", "Schema").with_category("design"),
    ///         Task::new("api", "API").with_category("backend").with_dependencies(["schema"]),
    ///     ])
    ///     .unwrap();
    /// assert_eq!(plan.execution_groups.len(), 2);
    /// assert_eq!(plan.task("schema").unwrap().agent.as_deref(), Some("architect"));
    /// ```
    pub fn create_plan(&self, tasks: Vec<Task>) -> Result<Plan> {
        let mut tasks = tasks;
        for task in &mut tasks {
            task.normalize();
        }

        let graph = DependencyGraph::build(&tasks);
        graph.ensure_acyclic()?;
        let order = graph.topological_order()?;

        // Later duplicates win, matching the graph
        let mut by_id: HashMap<String, Task> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut ordered: Vec<Task> = order.iter().filter_map(|id| by_id.remove(id)).collect();

        let mut unassigned = Vec::new();
        for task in &mut ordered {
            let phase = resolve_phase(task);
            task.phase = Some(phase);
            task.agent = resolve_agent(task, phase);
            if task.agent.is_none() {
                debug!("No agent inferred for task '{}'", task.id);
                unassigned.push(task.id.clone());
            }
        }

        let groups = self.build_groups(&ordered, &graph)?;
        let checkpoints = self.place_checkpoints(&groups);
        let estimated = self.estimate_duration(&ordered);

        let mut phases: BTreeMap<Phase, Vec<String>> = BTreeMap::new();
        for task in &ordered {
            phases
                .entry(task.phase_or_default())
                .or_default()
                .push(task.id.clone());
        }

        let metadata = PlanMetadata {
            created_at: Utc::now(),
            task_count: ordered.len(),
            group_count: groups.len(),
            max_concurrency: self.config.effective_concurrency(),
            unassigned_tasks: unassigned,
            warnings: graph.warnings().to_vec(),
        };

        let plan = Plan {
            id: uuid::Uuid::new_v4().to_string(),
            version: PLAN_VERSION,
            tasks: ordered,
            execution_groups: groups,
            checkpoints,
            dependency_graph: graph.to_map(),
            phases,
            estimated_duration_mins: estimated,
            metadata,
        };

        info!("Created {}", plan.summary());
        Ok(plan)
    }

    /// Batch tasks into groups of independent, same-phase tasks.
    fn build_groups(&self, tasks: &[Task], graph: &DependencyGraph) -> Result<Vec<ExecutionGroup>> {
        let max = self.config.effective_concurrency();
        let mut groups: Vec<ExecutionGroup> = Vec::new();
        let mut scheduled: HashSet<&str> = HashSet::with_capacity(tasks.len());
        let mut remaining: Vec<&Task> = tasks.iter().collect();

        while !remaining.is_empty() {
            let (ready, rest): (Vec<&Task>, Vec<&Task>) = remaining.into_iter().partition(|t| {
                graph
                    .known_dependencies(&t.id)
                    .all(|dep| scheduled.contains(dep.as_str()))
            });

            if ready.is_empty() {
                let stuck: Vec<String> = rest.iter().map(|t| t.id.clone()).collect();
                warn!("No schedulable tasks while {} remain: {:?}", stuck.len(), stuck);
                return Err(OrchestratorError::PlanIntegrity { remaining: stuck });
            }

            let mut by_phase: BTreeMap<Phase, Vec<&Task>> = BTreeMap::new();
            for task in &ready {
                by_phase.entry(task.phase_or_default()).or_default().push(task);
            }

            for (phase, members) in by_phase {
                for chunk in members.chunks(max) {
                    groups.push(ExecutionGroup {
                        index: groups.len(),
                        phase,
                        task_ids: chunk.iter().map(|t| t.id.clone()).collect(),
                    });
                }
            }

            scheduled.extend(ready.iter().map(|t| t.id.as_str()));
            remaining = rest;
        }

        Ok(groups)
    }

    /// Place phase-transition, periodic, and final checkpoints.
    fn place_checkpoints(&self, groups: &[ExecutionGroup]) -> Vec<PlannedCheckpoint> {
        let interval = self.config.checkpoint_interval.max(1);
        let mut checkpoints = Vec::new();
        let mut since_last = 0usize;
        let mut total = 0usize;

        for (i, group) in groups.iter().enumerate() {
            since_last += group.len();
            total += group.len();

            let kind = match groups.get(i + 1) {
                None => Some(CheckpointKind::Final),
                Some(next) if next.phase != group.phase => Some(CheckpointKind::PhaseTransition),
                Some(_) if since_last >= interval => Some(CheckpointKind::Periodic),
                Some(_) => None,
            };

            if let Some(kind) = kind {
                checkpoints.push(PlannedCheckpoint {
                    after_group: group.index,
                    kind,
                    phase: group.phase,
                    tasks_scheduled: total,
                });
                since_last = 0;
            }
        }

        checkpoints
    }

    /// Sum over phases of the longest task in each phase, saturating at `u32::MAX`.
    fn estimate_duration(&self, tasks: &[Task]) -> u32 {
        let mut per_phase: BTreeMap<Phase, u32> = BTreeMap::new();
        for task in tasks {
            let minutes = task.estimated_duration(self.config.minutes_per_complexity);
            let slot = per_phase.entry(task.phase_or_default()).or_insert(0);
            *slot = (*slot).max(minutes);
        }
        per_phase.values().copied().fold(0, u32::saturating_add)
    }

    /// Tasks ready to run given the completed set.
    ///
    /// Readiness is recomputed from scratch. Tasks already completed,
    /// terminal, or in flight are excluded. At most `max_concurrency` tasks
    /// are returned, ordered by priority ascending.
    #[must_use]
    pub fn next_tasks<'p>(&self, plan: &'p Plan, completed: &HashSet<String>) -> Vec<&'p Task> {
        let mut ready: Vec<&Task> = plan
            .tasks
            .iter()
            .filter(|t| {
                !completed.contains(&t.id)
                    && !t.status.is_terminal()
                    && !t.status.is_in_flight()
                    && dependencies_satisfied(&t.dependencies, completed)
            })
            .collect();

        ready.sort_by_key(|t| t.priority);
        ready.truncate(self.config.effective_concurrency());
        ready
    }

    /// Update a task's status in the plan.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskNotFound`] if the id is absent.
    pub fn update_task_status(
        &self,
        plan: &mut Plan,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<StatusUpdate> {
        plan.update_task_status(task_id, status, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, id).with_dependencies(deps.iter().copied())
    }

    fn planner(max: usize, interval: usize) -> ExecutionPlanner {
        ExecutionPlanner::new(
            PlannerConfig::new()
                .with_max_concurrency(max)
                .with_checkpoint_interval(interval),
        )
    }

    #[test]
    fn test_cycle_fails_plan_creation() {
        let err = planner(3, 5)
            .create_plan(vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])])
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CircularDependency { .. }));
    }

    #[test]
    fn test_groups_respect_concurrency() {
        let tasks = (0..7).map(|i| task(&format!("t{}", i), &[])).collect();
        let plan = planner(3, 100).create_plan(tasks).unwrap();
        let sizes: Vec<usize> = plan.execution_groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_groups_split_by_phase() {
        let plan = planner(5, 100)
            .create_plan(vec![
                task("a", &[]).with_category("setup"),
                task("b", &[]).with_category("backend"),
                task("c", &[]).with_category("setup"),
            ])
            .unwrap();
        assert_eq!(plan.execution_groups.len(), 2);
        assert_eq!(plan.execution_groups[0].phase, Phase::Setup);
        assert_eq!(plan.execution_groups[0].task_ids, vec!["a", "c"]);
        assert_eq!(plan.execution_groups[1].task_ids, vec!["b"]);
    }

    #[test]
    fn test_dependencies_in_earlier_groups() {
        let plan = planner(4, 100)
            .create_plan(vec![
                task("d", &["b", "c"]),
                task("b", &["a"]),
                task("c", &["a"]),
                task("a", &[]),
            ])
            .unwrap();
        let groups: Vec<Vec<String>> = plan
            .execution_groups
            .iter()
            .map(|g| g.task_ids.clone())
            .collect();
        assert_eq!(groups, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_dangling_dependency_is_scheduled_with_warning() {
        let plan = planner(3, 5).create_plan(vec![task("a", &["ghost"])]).unwrap();
        assert_eq!(plan.execution_groups.len(), 1);
        assert_eq!(plan.metadata.warnings.len(), 1);
    }

    #[test]
    fn test_checkpoint_placement() {
        // setup x2, then 4 implementation tasks in groups of 2, interval 3
        let plan = planner(2, 3)
            .create_plan(vec![
                task("s1", &[]).with_category("setup"),
                task("s2", &[]).with_category("setup"),
                task("i1", &["s1"]),
                task("i2", &["s1"]),
                task("i3", &["s2"]),
                task("i4", &["s2"]),
            ])
            .unwrap();

        assert_eq!(plan.execution_groups.len(), 3);
        let kinds: Vec<(usize, CheckpointKind)> = plan
            .checkpoints
            .iter()
            .map(|c| (c.after_group, c.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (0, CheckpointKind::PhaseTransition),
                (2, CheckpointKind::Final),
            ]
        );
    }

    #[test]
    fn test_periodic_checkpoint_resets_counter() {
        let tasks = (0..6).map(|i| task(&format!("t{}", i), &[])).collect();
        let plan = planner(1, 2).create_plan(tasks).unwrap();
        let kinds: Vec<CheckpointKind> = plan.checkpoints.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CheckpointKind::Periodic,
                CheckpointKind::Periodic,
                CheckpointKind::Final,
            ]
        );
        assert_eq!(plan.checkpoints[0].after_group, 1);
        assert_eq!(plan.checkpoints[1].after_group, 3);
        assert_eq!(plan.checkpoints[2].after_group, 5);
    }

    #[test]
    fn test_duration_is_sum_of_phase_maxima() {
        let plan = planner(3, 5)
            .create_plan(vec![
                task("a", &[]).with_category("setup").with_complexity(1),
                task("b", &[]).with_category("setup").with_complexity(3),
                task("c", &[]).with_complexity(2),
            ])
            .unwrap();
        // setup: max(30, 90) = 90, implementation: 60
        assert_eq!(plan.estimated_duration_mins, 150);
    }

    #[test]
    fn test_duration_mixes_explicit_and_complexity_estimates() {
        let plan = planner(3, 5)
            .create_plan(vec![
                task("a", &[]).with_category("setup").with_estimated_minutes(45),
                task("b", &[]).with_category("setup").with_complexity(1),
                task("c", &["a"]).with_complexity(4),
                task("d", &["a"]).with_estimated_minutes(20),
                task("e", &["c", "d"]).with_category("test").with_estimated_minutes(200),
            ])
            .unwrap();
        // setup: max(45, 30), implementation: max(120, 20), testing: 200
        assert_eq!(plan.estimated_duration_mins, 365);
    }

    #[test]
    fn test_duration_saturates_instead_of_overflowing() {
        let plan = planner(3, 5)
            .create_plan(vec![
                Task::new("a", "A")
                    .with_phase(Phase::Setup)
                    .with_estimated_minutes(u32::MAX),
                Task::new("b", "B")
                    .with_phase(Phase::Testing)
                    .with_estimated_minutes(10),
            ])
            .unwrap();
        assert_eq!(plan.estimated_duration_mins, u32::MAX);

        let config = PlannerConfig {
            minutes_per_complexity: u32::MAX,
            ..PlannerConfig::default()
        };
        let plan = ExecutionPlanner::new(config)
            .create_plan(vec![Task::new("c", "C").with_complexity(5)])
            .unwrap();
        assert_eq!(plan.estimated_duration_mins, u32::MAX);
    }

    #[test]
    fn test_phases_map_and_unassigned() {
        let plan = planner(3, 5)
            .create_plan(vec![task("a", &[]).with_category("backend"), task("b", &[])])
            .unwrap();
        assert_eq!(plan.phases[&Phase::Implementation], vec!["a", "b"]);
        assert_eq!(plan.metadata.unassigned_tasks, vec!["b"]);
        assert_eq!(plan.task("a").unwrap().agent.as_deref(), Some("backend-developer"));
    }

    #[test]
    fn test_next_tasks_orders_by_priority_and_caps() {
        let plan = planner(2, 5)
            .create_plan(vec![
                task("low", &[]).with_priority(9),
                task("high", &[]).with_priority(1),
                task("mid", &[]).with_priority(5),
                task("blocked", &["low"]).with_priority(0),
            ])
            .unwrap();
        let next: Vec<&str> = planner(2, 5)
            .next_tasks(&plan, &HashSet::new())
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(next, vec!["high", "mid"]);
    }

    #[test]
    fn test_next_tasks_after_completion() {
        let planner = planner(3, 5);
        let plan = planner
            .create_plan(vec![task("a", &[]), task("b", &["a"])])
            .unwrap();
        let completed: HashSet<String> = ["a".to_string()].into_iter().collect();
        let next: Vec<&str> = planner
            .next_tasks(&plan, &completed)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(next, vec!["b"]);
    }

    #[test]
    fn test_update_task_status_idempotent_completion() {
        let planner = planner(3, 5);
        let mut plan = planner.create_plan(vec![task("a", &[])]).unwrap();

        let first = planner
            .update_task_status(&mut plan, "a", TaskStatus::Completed, None)
            .unwrap();
        assert_eq!(first, StatusUpdate::Applied);
        let stamped = plan.task("a").unwrap().completed_at;
        assert!(stamped.is_some());

        let second = planner
            .update_task_status(
                &mut plan,
                "a",
                TaskStatus::Completed,
                Some(serde_json::json!({"lines": 10})),
            )
            .unwrap();
        assert_eq!(second, StatusUpdate::Refreshed);
        assert_eq!(plan.task("a").unwrap().completed_at, stamped);
        assert_eq!(plan.task("a").unwrap().status, TaskStatus::Completed);
        assert!(plan.task("a").unwrap().result.is_some());
    }

    #[test]
    fn test_update_task_status_does_not_regress() {
        let planner = planner(3, 5);
        let mut plan = planner.create_plan(vec![task("a", &[])]).unwrap();
        planner
            .update_task_status(&mut plan, "a", TaskStatus::Completed, None)
            .unwrap();
        let outcome = planner
            .update_task_status(&mut plan, "a", TaskStatus::Running, None)
            .unwrap();
        assert_eq!(outcome, StatusUpdate::Ignored);
        assert_eq!(plan.task("a").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_update_task_status_unknown_task() {
        let planner = planner(3, 5);
        let mut plan = planner.create_plan(vec![task("a", &[])]).unwrap();
        let err = planner
            .update_task_status(&mut plan, "zzz", TaskStatus::Running, None)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskNotFound { .. }));
    }

    #[test]
    fn test_failed_stamp_and_retry() {
        let planner = planner(3, 5);
        let mut plan = planner.create_plan(vec![task("a", &[])]).unwrap();
        planner
            .update_task_status(&mut plan, "a", TaskStatus::Failed, None)
            .unwrap();
        assert!(plan.task("a").unwrap().failed_at.is_some());
        let retry = planner
            .update_task_status(&mut plan, "a", TaskStatus::Pending, None)
            .unwrap();
        assert_eq!(retry, StatusUpdate::Applied);
    }

    #[test]
    fn test_empty_task_list() {
        let plan = planner(3, 5).create_plan(Vec::new()).unwrap();
        assert!(plan.execution_groups.is_empty());
        assert!(plan.checkpoints.is_empty());
        assert_eq!(plan.estimated_duration_mins, 0);
    }
}

//! Group-by-group plan execution.
//!
//! The runner walks a [`Plan`]'s execution groups in order. Every task in a
//! group is dispatched onto its own tokio task and the whole group is joined
//! before the next one starts:
//!
//! ```text
//! group 0 ──spawn──> [t1] [t2] [t3] ──join──> commit? ──> group 1 ...
//!                      │ fail
//!                      └──> rollback, dependents become Blocked
//! ```
//!
//! Checkpoints follow the plan's placement: one is opened before the first
//! group after the previous checkpoint and committed after the group that
//! carries the planned checkpoint. A group with a failed task rolls back the
//! open checkpoint instead.

use super::plan::Plan;
use crate::checkpoint::{CheckpointId, CheckpointStore};
use crate::planner::ExecutionGroup;
use crate::stop::StopHandle;
use crate::task::{Task, TaskStatus};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Executes a single planned task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task and return its result payload.
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value>;
}

/// A task that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of [`PlanRunner::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanRunReport {
    pub completed: Vec<String>,
    pub failed: Vec<TaskFailure>,
    pub blocked: Vec<String>,
    pub groups_run: usize,
    pub checkpoints_committed: usize,
    pub rollbacks: usize,
    /// A stop was requested before every group ran
    pub stopped: bool,
    pub elapsed: Duration,
}

impl PlanRunReport {
    /// True when nothing failed, nothing was blocked and the run was not stopped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && !self.stopped
    }
}

/// Runs a plan against a [`TaskExecutor`].
pub struct PlanRunner {
    checkpoints: Arc<dyn CheckpointStore>,
    stop: StopHandle,
}

impl PlanRunner {
    #[must_use]
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            checkpoints,
            stop: StopHandle::new(),
        }
    }

    /// Share an externally owned stop handle.
    #[must_use]
    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Execute the plan, mutating task statuses in place.
    ///
    /// Never fails: executor errors and panics are recorded per task, and
    /// checkpoint store errors are logged.
    pub async fn run(&self, plan: &mut Plan, executor: Arc<dyn TaskExecutor>) -> PlanRunReport {
        let started = Instant::now();
        let mut report = PlanRunReport::default();
        let known: HashSet<String> = plan.tasks.iter().map(|t| t.id.clone()).collect();
        let groups = plan.execution_groups.clone();
        let mut open: Option<CheckpointId> = None;

        info!("Running {}", plan.summary());

        for group in &groups {
            if self.stop.is_stop_requested() {
                info!("Stop requested before group {}", group.index);
                report.stopped = true;
                break;
            }

            if open.is_none() {
                open = self.open_checkpoint(plan, group).await;
            }

            let dispatch = Self::prepare_group(plan, group, &known, &mut report);
            let group_failed = Self::dispatch_group(plan, dispatch, &executor, &mut report).await;
            report.groups_run += 1;

            if group_failed {
                if let Some(id) = open.take() {
                    let reason = format!("group {} had failures", group.index);
                    match self.checkpoints.rollback(Some(&id), &reason).await {
                        Ok(()) => report.rollbacks += 1,
                        Err(e) => warn!("Rollback of checkpoint {} failed: {}", id, e),
                    }
                }
            } else if plan.checkpoint_after(group.index).is_some() {
                if let Some(id) = open.take() {
                    self.commit(&id, &mut report).await;
                }
            }
        }

        if let Some(id) = open.take() {
            self.commit(&id, &mut report).await;
        }

        report.elapsed = started.elapsed();
        info!(
            "Plan run finished: {} completed, {} failed, {} blocked in {:?}",
            report.completed.len(),
            report.failed.len(),
            report.blocked.len(),
            report.elapsed
        );
        report
    }

    /// Mark each dispatchable task in flight and block the rest.
    fn prepare_group(
        plan: &mut Plan,
        group: &ExecutionGroup,
        known: &HashSet<String>,
        report: &mut PlanRunReport,
    ) -> Vec<Task> {
        let mut dispatch = Vec::new();
        for id in &group.task_ids {
            let Some(task) = plan.task(id) else { continue };
            if task.status.is_terminal() || task.status == TaskStatus::Blocked {
                debug!("Skipping task '{}' ({})", id, task.status);
                continue;
            }

            let deps_completed = task
                .dependencies
                .iter()
                .filter(|d| known.contains(d.as_str()))
                .all(|d| plan.task(d).is_some_and(|t| t.status == TaskStatus::Completed));

            if !deps_completed {
                warn!("Blocking task '{}': a dependency did not complete", id);
                Self::mark(plan, id, TaskStatus::Blocked, None);
                report.blocked.push(id.clone());
                continue;
            }

            Self::mark(plan, id, TaskStatus::Assigned, None);
            Self::mark(plan, id, TaskStatus::Running, None);
            if let Some(task) = plan.task(id) {
                dispatch.push(task.clone());
            }
        }
        dispatch
    }

    /// Spawn every task, join them all, and record outcomes.
    ///
    /// Returns whether any task failed.
    async fn dispatch_group(
        plan: &mut Plan,
        dispatch: Vec<Task>,
        executor: &Arc<dyn TaskExecutor>,
        report: &mut PlanRunReport,
    ) -> bool {
        let (ids, handles): (Vec<String>, Vec<_>) = dispatch
            .into_iter()
            .map(|task| {
                let executor = Arc::clone(executor);
                let id = task.id.clone();
                (id, tokio::spawn(async move { executor.execute(&task).await }))
            })
            .unzip();

        let results = join_all(handles).await;

        let mut failed = false;
        for (id, joined) in ids.into_iter().zip(results) {
            let outcome = joined
                .unwrap_or_else(|e| Err(anyhow::anyhow!("Task '{}' panicked: {}", id, e)));
            match outcome {
                Ok(value) => {
                    Self::mark(plan, &id, TaskStatus::Completed, Some(value));
                    report.completed.push(id);
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!("Task '{}' failed: {}", id, error);
                    Self::mark(
                        plan,
                        &id,
                        TaskStatus::Failed,
                        Some(serde_json::json!({ "error": error })),
                    );
                    report.failed.push(TaskFailure { id, error });
                    failed = true;
                }
            }
        }
        failed
    }

    async fn open_checkpoint(&self, plan: &Plan, group: &ExecutionGroup) -> Option<CheckpointId> {
        let tag = format!("plan:{}:group:{}", plan.id, group.index);
        let payload = serde_json::json!({
            "plan": plan.id,
            "group": group.index,
            "phase": group.phase,
            "tasks": group.task_ids,
        });
        match self.checkpoints.create_checkpoint(&tag, payload).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to open checkpoint {}: {}", tag, e);
                None
            }
        }
    }

    async fn commit(&self, id: &CheckpointId, report: &mut PlanRunReport) {
        match self.checkpoints.commit_checkpoint(id).await {
            Ok(()) => report.checkpoints_committed += 1,
            Err(e) => warn!("Commit of checkpoint {} failed: {}", id, e),
        }
    }

    fn mark(plan: &mut Plan, id: &str, status: TaskStatus, result: Option<serde_json::Value>) {
        if let Err(e) = plan.update_task_status(id, status, result) {
            warn!("Status update for '{}' failed: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointState, MemoryCheckpointStore};
    use crate::planner::{ExecutionPlanner, PlannerConfig};
    use crate::testing::mocks::MockTaskExecutor;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, id).with_dependencies(deps.iter().copied())
    }

    fn plan_for(tasks: Vec<Task>, max: usize, interval: usize) -> Plan {
        ExecutionPlanner::new(
            PlannerConfig::new()
                .with_max_concurrency(max)
                .with_checkpoint_interval(interval),
        )
        .create_plan(tasks)
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_completes_every_task_in_order() {
        let mut plan = plan_for(
            vec![task("a", &[]), task("b", &["a"]), task("c", &["a"]), task("d", &["b", "c"])],
            3,
            5,
        );
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = Arc::new(MockTaskExecutor::new());

        let report = PlanRunner::new(store.clone())
            .run(&mut plan, executor.clone())
            .await;

        assert!(report.is_success());
        assert_eq!(report.completed.len(), 4);
        assert_eq!(report.groups_run, plan.execution_groups.len());
        assert!(plan.is_finished());

        let order = executor.executed();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));

        assert_eq!(store.open_count(), 0);
        assert_eq!(report.checkpoints_committed, store.committed_count());
    }

    #[tokio::test]
    async fn test_failed_task_blocks_dependents_and_rolls_back() {
        let mut plan = plan_for(
            vec![task("a", &[]), task("b", &["a"]), task("c", &["b"]), task("x", &[])],
            2,
            1,
        );
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = Arc::new(MockTaskExecutor::new().with_failure("a", "compile error"));

        let report = PlanRunner::new(store.clone()).run(&mut plan, executor).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "a");
        assert!(report.failed[0].error.contains("compile error"));
        assert_eq!(report.blocked, vec!["b".to_string(), "c".to_string()]);
        assert!(report.completed.contains(&"x".to_string()));
        assert_eq!(plan.task("b").unwrap().status, TaskStatus::Blocked);
        assert_eq!(plan.task("a").unwrap().status, TaskStatus::Failed);
        assert!(plan.task("a").unwrap().failed_at.is_some());
        assert_eq!(report.rollbacks, 1);
        assert!(store
            .records()
            .iter()
            .any(|r| matches!(r.state, CheckpointState::RolledBack { .. })));
    }

    #[tokio::test]
    async fn test_panicking_task_is_failed() {
        let mut plan = plan_for(vec![task("a", &[]), task("b", &[])], 2, 5);
        let executor = Arc::new(MockTaskExecutor::new().with_panic("b"));

        let report = PlanRunner::new(Arc::new(MemoryCheckpointStore::new()))
            .run(&mut plan, executor)
            .await;

        assert_eq!(report.completed, vec!["a".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("panicked"));
        assert_eq!(plan.task("b").unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_result_is_stored_on_task() {
        let mut plan = plan_for(vec![task("a", &[])], 1, 5);
        let executor = Arc::new(
            MockTaskExecutor::new().with_result("a", serde_json::json!({"files": 3})),
        );

        PlanRunner::new(Arc::new(MemoryCheckpointStore::new()))
            .run(&mut plan, executor)
            .await;

        let a = plan.task("a").unwrap();
        assert_eq!(a.status, TaskStatus::Completed);
        assert_eq!(a.result, Some(serde_json::json!({"files": 3})));
        assert!(a.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stop_before_run_dispatches_nothing() {
        let mut plan = plan_for(vec![task("a", &[]), task("b", &["a"])], 2, 5);
        let executor = Arc::new(MockTaskExecutor::new());
        let runner = PlanRunner::new(Arc::new(MemoryCheckpointStore::new()));
        runner.stop_handle().request_stop();

        let report = runner.run(&mut plan, executor.clone()).await;

        assert!(report.stopped);
        assert_eq!(report.groups_run, 0);
        assert!(executor.executed().is_empty());
        assert_eq!(plan.count_with_status(TaskStatus::Pending), 2);
    }

    #[tokio::test]
    async fn test_already_completed_tasks_are_skipped() {
        let mut plan = plan_for(vec![task("a", &[]), task("b", &["a"])], 2, 5);
        plan.update_task_status("a", TaskStatus::Completed, None).unwrap();
        let executor = Arc::new(MockTaskExecutor::new());

        let report = PlanRunner::new(Arc::new(MemoryCheckpointStore::new()))
            .run(&mut plan, executor.clone())
            .await;

        assert_eq!(executor.executed(), vec!["b".to_string()]);
        assert_eq!(report.completed, vec!["b".to_string()]);
    }
}

//! Integration tests for graph analysis and plan creation

use autoforge::graph::DependencyGraph;
use autoforge::planner::CheckpointKind;
use autoforge::testing::{assert_groups_valid, assert_topological, fixtures};
use autoforge::{
    ExecutionPlanner, GraphWarning, OrchestratorError, Phase, PlannerConfig, Task, TaskStatus,
};
use std::collections::HashSet;

fn planner(max: usize) -> ExecutionPlanner {
    ExecutionPlanner::new(PlannerConfig::new().with_max_concurrency(max))
}

#[test]
fn test_every_fixture_satisfies_group_guarantees() {
    for max in 1..=4 {
        for tasks in [
            fixtures::chain(12),
            fixtures::fan_out(9),
            fixtures::diamond(),
            fixtures::web_app(),
        ] {
            let plan = planner(max).create_plan(tasks).unwrap();
            assert_topological(&plan);
            assert_groups_valid(&plan, max);
        }
    }
}

#[test]
fn test_fan_out_is_split_by_concurrency() {
    let plan = planner(2).create_plan(fixtures::fan_out(5)).unwrap();

    assert_eq!(plan.execution_groups.len(), 4);
    assert_eq!(plan.execution_groups[0].task_ids, vec!["root".to_string()]);
    let leaves: usize = plan.execution_groups[1..].iter().map(|g| g.len()).sum();
    assert_eq!(leaves, 5);
}

#[test]
fn test_chain_runs_one_task_per_group() {
    let plan = planner(3).create_plan(fixtures::chain(4)).unwrap();

    assert_eq!(plan.execution_groups.len(), 4);
    let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t0", "t1", "t2", "t3"]);
}

#[test]
fn test_last_group_always_checkpointed() {
    for tasks in [fixtures::chain(7), fixtures::web_app(), fixtures::diamond()] {
        let plan = planner(3).create_plan(tasks).unwrap();
        let last = plan.execution_groups.len() - 1;
        let checkpoint = plan.checkpoint_after(last).expect("final checkpoint");
        assert_eq!(checkpoint.tasks_scheduled, plan.tasks.len());
    }
}

#[test]
fn test_phase_changes_get_checkpoints() {
    let plan = planner(3).create_plan(fixtures::web_app()).unwrap();

    for pair in plan.execution_groups.windows(2) {
        if pair[0].phase != pair[1].phase {
            assert!(
                plan.checkpoint_after(pair[0].index).is_some(),
                "no checkpoint between {} and {}",
                pair[0].phase,
                pair[1].phase
            );
        }
    }
    assert!(plan
        .checkpoints
        .iter()
        .any(|c| c.kind == CheckpointKind::PhaseTransition));
}

#[test]
fn test_phases_are_inferred_from_categories() {
    let plan = planner(3).create_plan(fixtures::web_app()).unwrap();

    assert_eq!(plan.task("setup").unwrap().phase, Some(Phase::Setup));
    assert_eq!(plan.task("api").unwrap().phase, Some(Phase::Implementation));
    assert_eq!(plan.task("e2e").unwrap().phase, Some(Phase::Testing));
    assert_eq!(plan.task("wire").unwrap().phase, Some(Phase::Integration));
    assert_eq!(plan.task("ship").unwrap().phase, Some(Phase::Deployment));
}

#[test]
fn test_cycle_is_rejected_with_members() {
    let err = planner(3).create_plan(fixtures::cycle()).unwrap_err();

    match &err {
        OrchestratorError::CircularDependency { cycle } => {
            let members: HashSet<&str> = cycle.iter().map(String::as_str).collect();
            assert!(members.contains("a") && members.contains("b") && members.contains("c"));
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
    assert!(err.is_fatal());
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let graph = DependencyGraph::build(&[fixtures::task("a", &["a"])]);
    assert!(graph.find_cycle().is_some());
}

#[test]
fn test_dangling_dependency_warns_but_plans() {
    let tasks = vec![fixtures::task("a", &[]), fixtures::task("b", &["a", "ghost"])];
    let plan = planner(3).create_plan(tasks).unwrap();

    assert!(plan.metadata.warnings.contains(&GraphWarning::DanglingDependency {
        task: "b".to_string(),
        dependency: "ghost".to_string(),
    }));
    assert_eq!(plan.tasks.len(), 2);
}

#[test]
fn test_next_tasks_follows_completion() {
    let planner = planner(3);
    let mut plan = planner.create_plan(fixtures::diamond()).unwrap();

    let first: Vec<&str> = planner
        .next_tasks(&plan, &HashSet::new())
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(first, vec!["a"]);

    planner
        .update_task_status(&mut plan, "a", TaskStatus::Completed, None)
        .unwrap();
    let mut second: Vec<String> = planner
        .next_tasks(&plan, &plan.completed_ids())
        .iter()
        .map(|t| t.id.clone())
        .collect();
    second.sort();
    assert_eq!(second, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn test_next_tasks_never_returns_task_with_dangling_dependency() {
    let planner = planner(3);
    let plan = planner
        .create_plan(vec![fixtures::task("a", &["ghost"])])
        .unwrap();

    assert!(planner.next_tasks(&plan, &HashSet::new()).is_empty());
}

#[test]
fn test_update_unknown_task_errors() {
    let planner = planner(3);
    let mut plan = planner.create_plan(fixtures::diamond()).unwrap();

    let err = planner
        .update_task_status(&mut plan, "missing", TaskStatus::Running, None)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::TaskNotFound { .. }));
}

#[test]
fn test_plan_json_round_trips() {
    let plan = planner(2).create_plan(fixtures::web_app()).unwrap();
    let json = serde_json::to_string(&plan).unwrap();
    let restored: autoforge::Plan = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.id, plan.id);
    assert_eq!(restored.execution_groups, plan.execution_groups);
    assert_eq!(restored.checkpoints, plan.checkpoints);
}

#[test]
fn test_large_chain_plans() {
    let tasks: Vec<Task> = fixtures::chain(500);
    let plan = planner(3).create_plan(tasks).unwrap();
    assert_eq!(plan.execution_groups.len(), 500);
}

#[test]
fn test_duration_uses_explicit_estimates_per_phase() {
    let tasks = vec![
        Task::new("setup", "Scaffold")
            .with_category("setup")
            .with_estimated_minutes(15),
        Task::new("api", "API")
            .with_dependencies(["setup"])
            .with_complexity(3),
        Task::new("ui", "UI")
            .with_dependencies(["setup"])
            .with_estimated_minutes(240),
        Task::new("e2e", "E2E")
            .with_category("test")
            .with_dependencies(["api", "ui"])
            .with_complexity(1),
    ];
    let plan = planner(3).create_plan(tasks).unwrap();

    // setup 15 + implementation max(90, 240) + testing 30
    assert_eq!(plan.estimated_duration_mins, 285);
}

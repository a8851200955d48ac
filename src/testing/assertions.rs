//! Plan-shape assertions.

use crate::planner::Plan;
use std::collections::HashMap;

/// Assert that `plan.tasks` is a valid linearization of its dependencies.
///
/// # Panics
///
/// Panics if a task precedes one of its known dependencies.
pub fn assert_topological(plan: &Plan) {
    let position: HashMap<&str, usize> = plan
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    for (i, task) in plan.tasks.iter().enumerate() {
        for dep in &task.dependencies {
            if let Some(&dep_pos) = position.get(dep.as_str()) {
                assert!(
                    dep_pos < i,
                    "Task '{}' at {} precedes its dependency '{}' at {}",
                    task.id,
                    i,
                    dep,
                    dep_pos
                );
            }
        }
    }
}

/// Assert every execution-group guarantee.
///
/// Each task appears in exactly one group, groups are non-empty, hold at
/// most `max_concurrency` members of a single phase, contain no internal
/// edges, and every known dependency sits in a strictly earlier group.
///
/// # Panics
///
/// Panics with the first violated guarantee.
pub fn assert_groups_valid(plan: &Plan, max_concurrency: usize) {
    let mut group_of: HashMap<&str, usize> = HashMap::new();
    for group in &plan.execution_groups {
        assert!(!group.is_empty(), "Group {} is empty", group.index);
        assert!(
            group.len() <= max_concurrency,
            "Group {} has {} members (max {})",
            group.index,
            group.len(),
            max_concurrency
        );
        for id in &group.task_ids {
            let prev = group_of.insert(id.as_str(), group.index);
            assert!(prev.is_none(), "Task '{}' scheduled twice", id);
            let task = plan
                .task(id)
                .unwrap_or_else(|| panic!("Group {} names unknown task '{}'", group.index, id));
            assert_eq!(
                task.phase_or_default(),
                group.phase,
                "Task '{}' phase differs from group {}",
                id,
                group.index
            );
        }
    }

    assert_eq!(
        group_of.len(),
        plan.tasks.len(),
        "Not every task was scheduled"
    );

    for task in &plan.tasks {
        let own = group_of[task.id.as_str()];
        for dep in &task.dependencies {
            if let Some(&dep_group) = group_of.get(dep.as_str()) {
                assert!(
                    dep_group < own,
                    "Task '{}' (group {}) depends on '{}' (group {})",
                    task.id,
                    own,
                    dep,
                    dep_group
                );
            }
        }
    }
}

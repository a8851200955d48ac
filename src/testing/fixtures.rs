//! Reusable task and feature sets.

use crate::build::Feature;
use crate::fix::{FailureReport, TestFailure};
use crate::task::{Phase, Task};

/// Shorthand for a task with dependencies.
#[must_use]
pub fn task(id: &str, deps: &[&str]) -> Task {
    Task::new(id, format!("Task {}", id)).with_dependencies(deps.iter().copied())
}

/// Shorthand for a web feature with dependencies.
#[must_use]
pub fn feature(id: &str, deps: &[&str]) -> Feature {
    Feature::new(id, format!("Feature {}", id), "web").with_dependencies(deps.iter().copied())
}

/// `t0 <- t1 <- ... <- t{n-1}`.
#[must_use]
pub fn chain(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| {
            let deps: Vec<String> = if i == 0 {
                Vec::new()
            } else {
                vec![format!("t{}", i - 1)]
            };
            Task::new(format!("t{}", i), format!("Step {}", i)).with_dependencies(deps)
        })
        .collect()
}

/// One root with `n` independent dependents.
#[must_use]
pub fn fan_out(n: usize) -> Vec<Task> {
    let mut tasks = vec![task("root", &[])];
    tasks.extend((0..n).map(|i| task(&format!("leaf{}", i), &["root"])));
    tasks
}

/// `a <- {b, c} <- d`.
#[must_use]
pub fn diamond() -> Vec<Task> {
    vec![
        task("a", &[]),
        task("b", &["a"]),
        task("c", &["a"]),
        task("d", &["b", "c"]),
    ]
}

/// `a -> b -> c -> a`.
#[must_use]
pub fn cycle() -> Vec<Task> {
    vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])]
}

/// A small application spanning every phase.
#[must_use]
pub fn web_app() -> Vec<Task> {
    vec![
        Task::new("setup", "Scaffold workspace")
            .with_category("setup")
            .with_complexity(1),
        Task::new("schema", "Design data schema")
            .with_category("architecture")
            .with_dependencies(["setup"])
            .with_complexity(3),
        Task::new("api", "Users API")
            .with_category("backend")
            .with_dependencies(["schema"])
            .with_priority(1)
            .with_complexity(4),
        Task::new("ui", "Users page")
            .with_category("frontend")
            .with_dependencies(["schema"])
            .with_priority(2)
            .with_complexity(3),
        Task::new("e2e", "End-to-end tests")
            .with_category("test")
            .with_dependencies(["api", "ui"])
            .with_complexity(2),
        Task::new("wire", "Connect UI to API")
            .with_phase(Phase::Integration)
            .with_dependencies(["e2e"]),
        Task::new("ship", "Deploy to staging")
            .with_category("deploy")
            .with_dependencies(["wire"])
            .with_complexity(1),
    ]
}

/// `1:[]`, `2:[1]`, `3:[99]`; feature 3 can never become ready.
#[must_use]
pub fn features_with_dangling_dependency() -> Vec<Feature> {
    vec![feature("1", &[]), feature("2", &["1"]), feature("3", &["99"])]
}

/// A failure report with one failure per test name.
#[must_use]
pub fn failure_report(platform: &str, tests: &[&str]) -> FailureReport {
    FailureReport::new(
        platform,
        tests
            .iter()
            .map(|t| TestFailure::new(*t, format!("{} failed", t)))
            .collect(),
    )
    .with_output(tests.iter().map(|t| format!("FAIL {}", t)).collect::<Vec<_>>().join("\n"))
}

//! Lifecycle phase inference.

use crate::task::{Phase, Task};

/// Keywords per phase, checked in lifecycle order. Matched as whole words.
const PHASE_KEYWORDS: &[(Phase, &[&str])] = &[
    (
        Phase::Setup,
        &[
            "setup",
            "init",
            "initialize",
            "initialization",
            "scaffold",
            "scaffolding",
            "bootstrap",
            "config",
            "configuration",
            "environment",
        ],
    ),
    (
        Phase::Architecture,
        &["architecture", "design", "schema", "model", "interface"],
    ),
    (
        Phase::Implementation,
        &["implementation", "implement", "feature", "develop", "development"],
    ),
    (
        Phase::Testing,
        &["test", "tests", "testing", "qa", "verification", "validate", "validation"],
    ),
    (
        Phase::Integration,
        &["integration", "integrate", "wiring", "connect"],
    ),
    (
        Phase::Deployment,
        &["deploy", "deployment", "release", "publish", "ship", "infrastructure"],
    ),
];

/// Infer a phase from the task's category and type.
///
/// The category and type are split into lowercase words. The first phase
/// (in lifecycle order) with a keyword equal to one of those words wins.
/// Falls back to [`Phase::Implementation`].
///
/// # Example
///
/// ```
/// use autoforge::planner::infer_phase;
/// use autoforge::task::{Phase, Task};
///
/// let task = Task::new("t", "Deploy").with_category("deployment");
/// assert_eq!(infer_phase(&task), Phase::Deployment);
/// assert_eq!(infer_phase(&Task::new("u", "Misc")), Phase::Implementation);
/// ```
#[must_use]
pub fn infer_phase(task: &Task) -> Phase {
    let haystack = format!(
        "{} {}",
        task.category.as_deref().unwrap_or_default(),
        task.task_type
    )
    .to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    PHASE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
        .map(|(phase, _)| *phase)
        .unwrap_or(Phase::Implementation)
}

/// The explicit phase if present, otherwise the inferred one.
#[must_use]
pub fn resolve_phase(task: &Task) -> Phase {
    task.phase.unwrap_or_else(|| infer_phase(task))
}

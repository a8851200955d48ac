//! Agent inference from task categories.

use crate::task::{Phase, Task};

/// Agent assigned to architecture-phase tasks with no keyword match.
pub const ARCHITECT_AGENT: &str = "architect";

/// Category keyword to agent name, checked in order.
pub const CATEGORY_AGENTS: &[(&str, &str)] = &[
    ("backend", "backend-developer"),
    ("frontend", "frontend-developer"),
    ("test", "test-engineer"),
    ("doc", "documentation-writer"),
    ("deploy", "devops-engineer"),
    ("security", "security-auditor"),
];

fn match_keyword(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase();
    CATEGORY_AGENTS
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, agent)| *agent)
}

/// Infer an agent for a task in the given phase.
///
/// Matches the category first, then the type. Architecture tasks with no
/// match go to [`ARCHITECT_AGENT`]; everything else stays unassigned.
///
/// # Example
///
/// ```
/// use autoforge::planner::infer_agent;
/// use autoforge::task::{Phase, Task};
///
/// let task = Task::new("t", "API").with_category("backend");
/// assert_eq!(infer_agent(&task, Phase::Implementation).as_deref(), Some("backend-developer"));
/// assert_eq!(infer_agent(&Task::new("u", "?"), Phase::Implementation), None);
/// ```
#[must_use]
pub fn infer_agent(task: &Task, phase: Phase) -> Option<String> {
    task.category
        .as_deref()
        .and_then(match_keyword)
        .or_else(|| match_keyword(&task.task_type))
        .or((phase == Phase::Architecture).then_some(ARCHITECT_AGENT))
        .map(str::to_string)
}

/// The explicit agent if present, otherwise the inferred one.
#[must_use]
pub fn resolve_agent(task: &Task, phase: Phase) -> Option<String> {
    task.agent.clone().or_else(|| infer_agent(task, phase))
}

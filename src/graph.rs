//! Dependency graph, cycle detection, and topological ordering.
//!
//! The graph maps each task id to its dependencies and dependents. Edges
//! point from a task to the tasks it depends on.
//!
//! # Example
//!
//! ```
//! use autoforge::graph::DependencyGraph;
//! use autoforge::task::Task;
//!
//! let tasks = vec![
//!     Task::new("api", "API").with_dependencies(["schema"]),
//!     Task::new("schema", "Schema"),
//! ];
//! let graph = DependencyGraph::build(&tasks);
//! assert_eq!(graph.topological_order().unwrap(), vec!["schema", "api"]);
//! ```

use crate::error::{OrchestratorError, Result};
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::warn;

// ============================================================================
// Warnings
// ============================================================================

/// Non-fatal integrity problems found while building the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GraphWarning {
    /// A dependency id that matches no task
    DanglingDependency { task: String, dependency: String },
    /// Two tasks share an id; the later one wins
    DuplicateTask { task: String },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphWarning::DanglingDependency { task, dependency } => {
                write!(f, "dangling-dependency: '{}' depends on unknown '{}'", task, dependency)
            }
            GraphWarning::DuplicateTask { task } => {
                write!(f, "duplicate-task: '{}' appears more than once", task)
            }
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Adjacency entry for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Directed dependency graph over a task set.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Task ids in input order
    order: Vec<String>,
    nodes: HashMap<String, GraphNode>,
    warnings: Vec<GraphWarning>,
}

impl DependencyGraph {
    /// Build the graph from a task list.
    ///
    /// Unknown dependency ids are recorded as [`GraphWarning::DanglingDependency`]
    /// and logged; they never fail the build.
    #[must_use]
    pub fn build(tasks: &[Task]) -> Self {
        let mut graph = Self::default();

        for task in tasks {
            if graph.nodes.contains_key(&task.id) {
                warn!("Duplicate task id '{}' in task list", task.id);
                graph.warnings.push(GraphWarning::DuplicateTask {
                    task: task.id.clone(),
                });
            } else {
                graph.order.push(task.id.clone());
            }
            graph.nodes.insert(
                task.id.clone(),
                GraphNode {
                    dependencies: task.dependencies.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for id in &graph.order {
            let deps = graph.nodes[id].dependencies.clone();
            for dep in deps {
                match graph.nodes.get_mut(&dep) {
                    Some(node) => {
                        if !node.dependents.contains(id) {
                            node.dependents.push(id.clone());
                        }
                    }
                    None => {
                        warn!("Task '{}' depends on unknown task '{}'", id, dep);
                        graph.warnings.push(GraphWarning::DanglingDependency {
                            task: id.clone(),
                            dependency: dep,
                        });
                    }
                }
            }
        }

        graph
    }

    /// Number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Integrity warnings collected during build.
    #[must_use]
    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }

    /// Declared dependencies of a task (including dangling ones).
    #[must_use]
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Dependencies of a task that exist in the graph.
    pub fn known_dependencies<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a String> + 'a {
        self.dependencies(id)
            .iter()
            .filter(move |dep| self.nodes.contains_key(dep.as_str()))
    }

    /// Tasks that directly depend on the given task.
    #[must_use]
    pub fn dependents(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Check whether an edge exists between two tasks in either direction.
    #[must_use]
    pub fn has_edge_between(&self, a: &str, b: &str) -> bool {
        self.dependencies(a).iter().any(|d| d == b) || self.dependencies(b).iter().any(|d| d == a)
    }

    /// All tasks that transitively depend on the given task, in BFS order.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut out = Vec::new();

        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(current) {
                if seen.insert(dependent.as_str()) {
                    out.push(dependent.clone());
                    queue.push_back(dependent.as_str());
                }
            }
        }
        out
    }

    /// Find a dependency cycle, if any.
    ///
    /// Uses a depth-first traversal with three-state marking. Returns the
    /// cycle as a path that starts and ends with the same id.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.nodes.len());
        let mut path: Vec<&str> = Vec::new();

        for id in &self.order {
            if let Some(cycle) = self.visit_for_cycle(id, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit_for_cycle<'a>(
        &'a self,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }

        // Dangling ids have no node and cannot be part of a cycle
        let node = self.nodes.get(id)?;

        marks.insert(id, Mark::Visiting);
        path.push(id);
        for dep in &node.dependencies {
            if let Some(cycle) = self.visit_for_cycle(dep, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        None
    }

    /// Fail with [`OrchestratorError::CircularDependency`] if the graph has a cycle.
    ///
    /// # Errors
    ///
    /// Returns the detected cycle path.
    pub fn ensure_acyclic(&self) -> Result<()> {
        match self.find_cycle() {
            Some(cycle) => Err(OrchestratorError::CircularDependency { cycle }),
            None => Ok(()),
        }
    }

    /// Produce a topological order of task ids.
    ///
    /// Post-order DFS over tasks in input order, visiting dependencies in
    /// declared order, so unconstrained tasks keep their relative input order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::CircularDependency`] if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.ensure_acyclic()?;

        let mut visited: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut out = Vec::with_capacity(self.order.len());
        for id in &self.order {
            self.emit_post_order(id, &mut visited, &mut out);
        }
        Ok(out)
    }

    fn emit_post_order<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<String>,
    ) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !visited.insert(id) {
            return;
        }
        for dep in &node.dependencies {
            self.emit_post_order(dep, visited, out);
        }
        out.push(id.to_string());
    }

    /// Serializable adjacency map, keyed by task id.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, GraphNode> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect()
    }
}

/// Readiness test shared by the planner and the build loop.
///
/// True iff every dependency id is in the completed set.
///
/// # Example
///
/// ```
/// use autoforge::graph::dependencies_satisfied;
/// use std::collections::HashSet;
///
/// let completed: HashSet<String> = ["a".to_string()].into_iter().collect();
/// assert!(dependencies_satisfied(&["a"], &completed));
/// assert!(!dependencies_satisfied(&["a", "b"], &completed));
/// ```
#[must_use]
pub fn dependencies_satisfied<S: AsRef<str>>(deps: &[S], completed: &HashSet<String>) -> bool {
    deps.iter().all(|dep| completed.contains(dep.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, id).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_build_registers_dependents() {
        let graph = DependencyGraph::build(&[task("a", &[]), task("b", &["a"]), task("c", &["a"])]);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependents("a"), &["b".to_string(), "c".to_string()]);
        assert_eq!(graph.dependencies("b"), &["a".to_string()]);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_dangling_dependency_is_warning() {
        let graph = DependencyGraph::build(&[task("a", &["ghost"])]);
        assert_eq!(
            graph.warnings(),
            &[GraphWarning::DanglingDependency {
                task: "a".into(),
                dependency: "ghost".into()
            }]
        );
        assert_eq!(graph.topological_order().unwrap(), vec!["a"]);
        assert_eq!(graph.known_dependencies("a").count(), 0);
    }

    #[test]
    fn test_duplicate_task_warning() {
        let graph = DependencyGraph::build(&[task("a", &[]), task("a", &[])]);
        assert_eq!(graph.len(), 1);
        assert!(matches!(graph.warnings()[0], GraphWarning::DuplicateTask { .. }));
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let graph = DependencyGraph::build(&[task("a", &["c"]), task("b", &["a"]), task("c", &["b"])]);
        let cycle = graph.find_cycle().expect("cycle");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);

        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, OrchestratorError::CircularDependency { .. }));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let graph = DependencyGraph::build(&[task("a", &["a"])]);
        assert_eq!(graph.find_cycle(), Some(vec!["a".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_diamond_is_not_cycle() {
        let graph = DependencyGraph::build(&[
            task("d", &["b", "c"]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("a", &[]),
        ]);
        assert!(graph.find_cycle().is_none());
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_topological_order_is_stable_for_independent_tasks() {
        let graph = DependencyGraph::build(&[task("z", &[]), task("m", &[]), task("a", &[])]);
        assert_eq!(graph.topological_order().unwrap(), vec!["z", "m", "a"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = DependencyGraph::build(&[
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
        ]);
        assert_eq!(graph.transitive_dependents("a"), vec!["b", "c"]);
        assert!(graph.transitive_dependents("d").is_empty());
    }

    #[test]
    fn test_has_edge_between() {
        let graph = DependencyGraph::build(&[task("a", &[]), task("b", &["a"]), task("c", &[])]);
        assert!(graph.has_edge_between("a", "b"));
        assert!(graph.has_edge_between("b", "a"));
        assert!(!graph.has_edge_between("a", "c"));
    }

    #[test]
    fn test_dependencies_satisfied() {
        let completed: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let none: [&str; 0] = [];
        assert!(dependencies_satisfied(&none, &completed));
        assert!(dependencies_satisfied(&["a", "b"], &completed));
        assert!(!dependencies_satisfied(&["a", "99"], &completed));
    }

    #[test]
    fn test_to_map_serializes() {
        let graph = DependencyGraph::build(&[task("a", &[]), task("b", &["a"])]);
        let json = serde_json::to_value(graph.to_map()).unwrap();
        assert_eq!(json["a"]["dependents"][0], "b");
        assert_eq!(json["b"]["dependencies"][0], "a");
    }
}

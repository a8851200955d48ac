//! Mock collaborators with controllable behavior.
//!
//! Each mock records its calls behind an `Arc`, so a clone kept by the test
//! observes calls made through the copy handed to the code under test.

use crate::checkpoint::{CheckpointId, CheckpointStore};
use crate::error::OrchestratorError;
use crate::fix::{AppliedFix, PatternFixOutcome, PatternFixer, TestFailure};
use crate::planner::TaskExecutor;
use crate::registry::{Agent, AgentOutput, AgentRequest, Artifact};
use crate::task::Task;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

fn record<T>(log: &Mutex<Vec<T>>, item: T) {
    log.lock().unwrap_or_else(PoisonError::into_inner).push(item);
}

fn snapshot<T: Clone>(log: &Mutex<Vec<T>>) -> Vec<T> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

// ============================================================================
// Mock Agent
// ============================================================================

/// Mock [`Agent`] returning canned artifacts or an error.
///
/// # Example
///
/// ```rust,ignore
/// let agent = MockAgent::new().with_artifact("screen", "src/login.tsx", "export {}");
/// registry.register_agent("web", Arc::new(agent.clone()));
/// // ... run the build loop ...
/// assert_eq!(agent.call_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockAgent {
    output: AgentOutput,
    error: Option<String>,
    requests: Arc<Mutex<Vec<AgentRequest>>>,
}

impl MockAgent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a generated file to every response.
    #[must_use]
    pub fn with_artifact(mut self, component: &str, path: &str, code: &str) -> Self {
        self.output
            .artifacts
            .insert(component.to_string(), Artifact::new(path, code));
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.output.result = result;
        self
    }

    /// Configure the mock to fail every request.
    #[must_use]
    pub fn with_failure(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<AgentRequest> {
        snapshot(&self.requests)
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn execute(&self, request: &AgentRequest) -> Result<AgentOutput> {
        record(&self.requests, request.clone());
        if let Some(ref error) = self.error {
            bail!("{}", error)
        }
        Ok(self.output.clone())
    }
}

// ============================================================================
// Mock Pattern Fixer
// ============================================================================

#[derive(Debug, Clone, Default)]
enum Resolution {
    #[default]
    Nothing,
    Everything,
    Tests(HashSet<String>),
}

/// Mock tier-1 [`PatternFixer`].
///
/// Resolves nothing by default.
#[derive(Debug, Clone, Default)]
pub struct MockPatternFixer {
    resolution: Resolution,
    suggestions: Vec<String>,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockPatternFixer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every failure it is given.
    #[must_use]
    pub fn resolve_all(mut self) -> Self {
        self.resolution = Resolution::Everything;
        self
    }

    /// Resolve only failures whose test name is listed.
    #[must_use]
    pub fn resolve_tests<I, S>(mut self, tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolution = Resolution::Tests(tests.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    /// Configure the mock to fail every call.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Number of times `fix` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn resolves(&self, failure: &TestFailure) -> bool {
        match &self.resolution {
            Resolution::Nothing => false,
            Resolution::Everything => true,
            Resolution::Tests(tests) => tests.contains(&failure.test),
        }
    }
}

#[async_trait]
impl PatternFixer for MockPatternFixer {
    async fn fix(&self, _output: &str, failures: &[TestFailure]) -> Result<PatternFixOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.error {
            bail!("{}", error)
        }

        let (fixed, remaining): (Vec<&TestFailure>, Vec<&TestFailure>) =
            failures.iter().partition(|f| self.resolves(f));
        Ok(PatternFixOutcome {
            fixes: fixed
                .into_iter()
                .map(|f| AppliedFix::new(&f.test, format!("patched {}", f.test)))
                .collect(),
            remaining: remaining.into_iter().cloned().collect(),
            suggestions: self.suggestions.clone(),
        })
    }
}

// ============================================================================
// Mock Task Executor
// ============================================================================

/// Mock [`TaskExecutor`] with per-task outcomes.
///
/// Tasks without a configured outcome succeed with `{"task": <id>}`.
#[derive(Debug, Clone, Default)]
pub struct MockTaskExecutor {
    results: HashMap<String, serde_json::Value>,
    failures: HashMap<String, String>,
    panics: HashSet<String>,
    delay: Option<Duration>,
    executed: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockTaskExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(mut self, id: &str, result: serde_json::Value) -> Self {
        self.results.insert(id.to_string(), result);
        self
    }

    #[must_use]
    pub fn with_failure(mut self, id: &str, error: &str) -> Self {
        self.failures.insert(id.to_string(), error.to_string());
        self
    }

    /// Make the task panic inside its spawned future.
    #[must_use]
    pub fn with_panic(mut self, id: &str) -> Self {
        self.panics.insert(id.to_string());
        self
    }

    /// Sleep before finishing each task.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Task ids in the order execution started.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        snapshot(&self.executed)
    }

    /// Highest number of tasks observed running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for MockTaskExecutor {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value> {
        record(&self.executed, task.id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(&task.id) {
            panic!("mock panic in task {}", task.id);
        }
        if let Some(error) = self.failures.get(&task.id) {
            bail!("{}", error)
        }
        Ok(self
            .results
            .get(&task.id)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "task": task.id })))
    }
}

// ============================================================================
// Failing Checkpoint Store
// ============================================================================

/// [`CheckpointStore`] whose every operation fails, counting the attempts.
#[derive(Debug, Clone, Default)]
pub struct FailingCheckpointStore {
    attempts: Arc<AtomicUsize>,
}

impl FailingCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store operations attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self, operation: &str) -> OrchestratorError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        OrchestratorError::checkpoint(format!("{} failed: disk full", operation))
    }
}

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn create_checkpoint(
        &self,
        _tag: &str,
        _payload: serde_json::Value,
    ) -> crate::error::Result<CheckpointId> {
        Err(self.fail("create"))
    }

    async fn commit_checkpoint(&self, _id: &CheckpointId) -> crate::error::Result<()> {
        Err(self.fail("commit"))
    }

    async fn rollback(
        &self,
        _id: Option<&CheckpointId>,
        _reason: &str,
    ) -> crate::error::Result<()> {
        Err(self.fail("rollback"))
    }
}

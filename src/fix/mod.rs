//! Tiered auto-fix loop.
//!
//! Each failing test report advances one iteration:
//!
//! ```text
//! FailureReport ──> checkpoint "autofix:<loop>:<iter>"
//!                        │
//!                        v
//!                tier 1: PatternFixer ──all fixed──> success
//!                        │ remaining
//!                        v
//!                tier 2: matchers ──> group by handler ──> autofix.requested
//!                        │
//!                        v
//!                   partial_fix (await next report)
//! ```
//!
//! The loop stays active across reports until tier 1 clears everything,
//! `tests.completed` arrives, the iteration bound is exceeded, or a tier
//! errors.

pub mod routing;
pub mod severity;
pub mod types;

pub use routing::{route_failures, RoutedFailure, Tier2Dispatch};
pub use severity::{classify, Severity};
pub use types::{
    AppliedFix, FailureReport, NoopPatternFixer, PatternFixOutcome, PatternFixer, TestFailure,
};

use crate::checkpoint::{CheckpointId, CheckpointStore, NoopCheckpointStore};
use crate::events::{EventBus, InMemoryEventBus, AUTOFIX_LOOP_COMPLETED, AUTOFIX_REQUESTED};
use crate::registry::MatcherRegistry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the fix loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixLoopConfig {
    /// Reports handled per loop before giving up
    pub max_iterations: u32,
    /// Tier-2 handler when no matcher claims a failure
    pub default_handler: String,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            default_handler: "general-fixer".to_string(),
        }
    }
}

impl FixLoopConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    #[must_use]
    pub fn with_default_handler(mut self, handler: impl Into<String>) -> Self {
        self.default_handler = handler.into();
        self
    }
}

// ============================================================================
// Status & Reports
// ============================================================================

/// Outcome of one fix iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Success,
    PartialFix,
    MaxIterationsReached,
    Error,
}

impl FixStatus {
    /// Whether the loop ended with this status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FixStatus::PartialFix)
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FixStatus::Success => "success",
            FixStatus::PartialFix => "partial_fix",
            FixStatus::MaxIterationsReached => "max_iterations_reached",
            FixStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What happened in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub reported: usize,
    pub tier1_fixed: usize,
    pub tier2_handlers: Vec<String>,
}

/// Result of [`AutoFixLoop::handle_failure`] and friends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub loop_id: u64,
    pub status: FixStatus,
    pub iteration: u32,
    /// Tier-1 fixes across the loop so far
    pub fixes_applied: Vec<AppliedFix>,
    /// Tier-2 groups dispatched this iteration
    pub dispatches: Vec<Tier2Dispatch>,
    /// Failures still unresolved
    pub remaining: usize,
    pub suggestions: Vec<String>,
    pub history: Vec<IterationRecord>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl FixReport {
    /// One-line summary for terminal output.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "autofix loop {} {} at iteration {}: {} fixed, {} remaining, {} handler(s) dispatched",
            self.loop_id,
            self.status,
            self.iteration,
            self.fixes_applied.len(),
            self.remaining,
            self.dispatches.len()
        )
    }
}

// ============================================================================
// Loop State
// ============================================================================

#[derive(Debug)]
struct FixLoopState {
    loop_id: u64,
    iteration: u32,
    started: Instant,
    fixes_applied: Vec<AppliedFix>,
    history: Vec<IterationRecord>,
    /// Outstanding tier-2 dispatches per handler
    pending: HashMap<String, usize>,
    remaining: usize,
}

impl FixLoopState {
    fn new(loop_id: u64) -> Self {
        Self {
            loop_id,
            iteration: 0,
            started: Instant::now(),
            fixes_applied: Vec::new(),
            history: Vec::new(),
            pending: HashMap::new(),
            remaining: 0,
        }
    }

    fn report(
        &self,
        status: FixStatus,
        dispatches: Vec<Tier2Dispatch>,
        suggestions: Vec<String>,
        error: Option<String>,
    ) -> FixReport {
        FixReport {
            loop_id: self.loop_id,
            status,
            iteration: self.iteration,
            fixes_applied: self.fixes_applied.clone(),
            dispatches,
            remaining: self.remaining,
            suggestions,
            history: self.history.clone(),
            elapsed: self.started.elapsed(),
            error,
        }
    }
}

// ============================================================================
// Auto-Fix Loop
// ============================================================================

/// Bounded two-tier failure recovery.
pub struct AutoFixLoop {
    config: FixLoopConfig,
    fixer: Arc<dyn PatternFixer>,
    matchers: Arc<MatcherRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    bus: Arc<dyn EventBus>,
    active: Option<FixLoopState>,
    last_loop_id: u64,
}

impl AutoFixLoop {
    #[must_use]
    pub fn new(
        config: FixLoopConfig,
        fixer: Arc<dyn PatternFixer>,
        matchers: Arc<MatcherRegistry>,
    ) -> Self {
        Self {
            config,
            fixer,
            matchers,
            checkpoints: Arc::new(NoopCheckpointStore),
            bus: Arc::new(InMemoryEventBus::with_history_limit(0)),
            active: None,
            last_loop_id: 0,
        }
    }

    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn config(&self) -> &FixLoopConfig {
        &self.config
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_loop_id(&self) -> Option<u64> {
        self.active.as_ref().map(|s| s.loop_id)
    }

    /// Outstanding tier-2 dispatches for a handler in the active loop.
    #[must_use]
    pub fn pending_dispatches(&self, handler: &str) -> usize {
        self.active
            .as_ref()
            .and_then(|s| s.pending.get(handler).copied())
            .unwrap_or(0)
    }

    /// Handle one failing test report.
    ///
    /// Starts a loop if none is active. Never returns an error: fixer
    /// failures end the loop with [`FixStatus::Error`].
    pub async fn handle_failure(&mut self, report: FailureReport) -> FixReport {
        let mut state = match self.active.take() {
            Some(state) => state,
            None => {
                self.last_loop_id += 1;
                info!("Starting autofix loop {}", self.last_loop_id);
                FixLoopState::new(self.last_loop_id)
            }
        };
        state.remaining = report.failures.len();

        // `iteration` counts tier-1 runs
        if state.iteration >= self.config.max_iterations {
            warn!(
                "Autofix loop {} exceeded {} iterations with {} failures left",
                state.loop_id, self.config.max_iterations, state.remaining
            );
            return self.finish(&state, FixStatus::MaxIterationsReached, None);
        }
        state.iteration += 1;

        let tag = format!("autofix:{}:{}", state.loop_id, state.iteration);
        let checkpoint = match self
            .checkpoints
            .create_checkpoint(
                &tag,
                json!({ "platform": report.platform, "failures": report.failures.len() }),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                let error = e.to_string();
                warn!("Autofix loop {} could not checkpoint: {}", state.loop_id, error);
                return self.finish(&state, FixStatus::Error, Some(error));
            }
        };

        debug!(
            "Autofix loop {} iteration {}: {} failures",
            state.loop_id, state.iteration, state.remaining
        );

        let outcome = match self.fixer.fix(&report.output, &report.failures).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = format!("tier 1 fixer failed: {}", e);
                warn!("Autofix loop {}: {}", state.loop_id, error);
                self.rollback(&checkpoint, &error).await;
                return self.finish(&state, FixStatus::Error, Some(error));
            }
        };

        let tier1_fixed = outcome.fixes.len();
        state.fixes_applied.extend(outcome.fixes);
        state.remaining = outcome.remaining.len();

        if outcome.remaining.is_empty() {
            state.history.push(IterationRecord {
                iteration: state.iteration,
                reported: report.failures.len(),
                tier1_fixed,
                tier2_handlers: Vec::new(),
            });
            self.commit(&checkpoint).await;
            info!("Autofix loop {}: tier 1 resolved every failure", state.loop_id);
            return self.finish(&state, FixStatus::Success, None);
        }

        let dispatches = route_failures(
            &outcome.remaining,
            &self.matchers,
            &report.platform,
            &self.config.default_handler,
        );
        for dispatch in &dispatches {
            info!(
                "Autofix loop {}: {} failure(s) to {} (max severity {})",
                state.loop_id,
                dispatch.failures.len(),
                dispatch.handler,
                dispatch.max_severity()
            );
            self.bus.publish(
                AUTOFIX_REQUESTED,
                json!({
                    "loop_id": state.loop_id,
                    "iteration": state.iteration,
                    "platform": report.platform,
                    "handler": dispatch.handler,
                    "failures": dispatch.failures,
                }),
            );
            *state.pending.entry(dispatch.handler.clone()).or_insert(0) += 1;
        }

        state.history.push(IterationRecord {
            iteration: state.iteration,
            reported: report.failures.len(),
            tier1_fixed,
            tier2_handlers: dispatches.iter().map(|d| d.handler.clone()).collect(),
        });
        self.commit(&checkpoint).await;

        let result = state.report(FixStatus::PartialFix, dispatches, outcome.suggestions, None);
        debug!("{}", result.summary());
        self.active = Some(state);
        result
    }

    /// Finish the active loop as successful. Called when tests pass.
    ///
    /// Returns `None` when no loop is active.
    pub fn complete(&mut self) -> Option<FixReport> {
        let mut state = self.active.take()?;
        state.remaining = 0;
        info!("Autofix loop {} completed: tests passing", state.loop_id);
        Some(self.finish(&state, FixStatus::Success, None))
    }

    /// Note that a tier-2 handler finished. Returns its remaining pending count.
    pub fn record_agent_completion(&mut self, handler: &str) -> usize {
        let Some(state) = self.active.as_mut() else {
            debug!("Agent '{}' completed with no active autofix loop", handler);
            return 0;
        };
        match state.pending.get_mut(handler) {
            Some(count) => {
                *count = count.saturating_sub(1);
                debug!("Handler '{}' has {} dispatch(es) pending", handler, count);
                *count
            }
            None => {
                debug!("Handler '{}' had no pending dispatches", handler);
                0
            }
        }
    }

    fn finish(&self, state: &FixLoopState, status: FixStatus, error: Option<String>) -> FixReport {
        let report = state.report(status, Vec::new(), Vec::new(), error);
        info!("{}", report.summary());
        self.bus.publish(
            AUTOFIX_LOOP_COMPLETED,
            serde_json::to_value(&report)
                .unwrap_or_else(|_| json!({ "loop_id": report.loop_id, "status": status })),
        );
        report
    }

    async fn commit(&self, id: &CheckpointId) {
        if let Err(e) = self.checkpoints.commit_checkpoint(id).await {
            warn!("Failed to commit autofix checkpoint {}: {}", id, e);
        }
    }

    async fn rollback(&self, id: &CheckpointId, reason: &str) {
        if let Err(e) = self.checkpoints.rollback(Some(id), reason).await {
            warn!("Failed to roll back autofix checkpoint {}: {}", id, e);
        }
    }
}

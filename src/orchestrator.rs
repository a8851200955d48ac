//! Top-level wiring of registries, bus, checkpoint store and loops.
//!
//! ```text
//!   EventBus ──tests.failed────────┐
//!            ──tests.completed─────┤  attach() -> mpsc -> run()/process()
//!            ──agent.completed─────┤
//!            ──code.generated──────┘
//!                                   │
//!             ┌─────────────────────┼─────────────────────┐
//!             v                     v                     v
//!      AutoFixLoop (Mutex)    BuildLoop (Mutex)     emit::write_artifacts
//! ```
//!
//! Each loop sits behind a `tokio::sync::Mutex`, so signals for the same
//! loop are handled strictly one after another.

use crate::build::{BuildLoop, BuildReport, Feature};
use crate::checkpoint::CheckpointStore;
use crate::config::OrchestratorConfig;
use crate::emit::write_artifacts;
use crate::error::Result;
use crate::events::{
    EventBus, InMemoryEventBus, Subscription, AGENT_COMPLETED, CODE_GENERATED, INBOUND_SIGNALS,
    TESTS_COMPLETED, TESTS_FAILED,
};
use crate::fix::{AutoFixLoop, FailureReport, FixReport, NoopPatternFixer, PatternFixer};
use crate::planner::{ExecutionPlanner, Plan, PlanRunReport, PlanRunner, TaskExecutor};
use crate::registry::{AgentRegistry, Artifact, MatcherRegistry};
use crate::task::Task;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// Signals
// ============================================================================

/// An inbound signal decoded from the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    TestsCompleted,
    TestsFailed(FailureReport),
    AgentCompleted { handler: String },
    CodeGenerated { artifacts: BTreeMap<String, Artifact> },
}

#[derive(Deserialize)]
struct AgentCompletedPayload {
    #[serde(alias = "agent")]
    handler: String,
}

#[derive(Deserialize)]
struct CodeGeneratedPayload {
    artifacts: BTreeMap<String, Artifact>,
}

impl Signal {
    /// Decode a bus event. Returns `Ok(None)` for events the core ignores.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when the payload does not match the event.
    pub fn from_event(event: &str, payload: &serde_json::Value) -> Result<Option<Self>> {
        let signal = match event {
            TESTS_COMPLETED => Signal::TestsCompleted,
            TESTS_FAILED => Signal::TestsFailed(FailureReport::deserialize(payload)?),
            AGENT_COMPLETED => Signal::AgentCompleted {
                handler: AgentCompletedPayload::deserialize(payload)?.handler,
            },
            CODE_GENERATED => Signal::CodeGenerated {
                artifacts: CodeGeneratedPayload::deserialize(payload)?.artifacts,
            },
            _ => return Ok(None),
        };
        Ok(Some(signal))
    }
}

/// What handling a signal produced.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    /// A fix iteration ran
    Fix(FixReport),
    /// Tests passed; carries the finished loop if one was active
    FixCompleted(Option<FixReport>),
    /// A tier-2 handler finished
    AgentRecorded { handler: String, pending: usize },
    /// Generated code was written
    CodeWritten(Vec<PathBuf>),
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an [`Orchestrator`] from configuration and collaborators.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    project_dir: PathBuf,
    bus: Option<Arc<dyn EventBus>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    fixer: Option<Arc<dyn PatternFixer>>,
    agents: Option<Arc<AgentRegistry>>,
    matchers: Option<Arc<MatcherRegistry>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(config: OrchestratorConfig, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
            bus: None,
            checkpoints: None,
            fixer: None,
            agents: None,
            matchers: None,
        }
    }

    #[must_use]
    pub fn event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the store derived from `[checkpoints]`.
    #[must_use]
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    #[must_use]
    pub fn pattern_fixer(mut self, fixer: Arc<dyn PatternFixer>) -> Self {
        self.fixer = Some(fixer);
        self
    }

    #[must_use]
    pub fn agents(mut self, agents: Arc<AgentRegistry>) -> Self {
        self.agents = Some(agents);
        self
    }

    #[must_use]
    pub fn matchers(mut self, matchers: Arc<MatcherRegistry>) -> Self {
        self.matchers = Some(matchers);
        self
    }

    /// Validate configuration and wire everything together.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration or when the file checkpoint
    /// store cannot be opened.
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let checkpoints = match self.checkpoints {
            Some(store) => store,
            None => self.config.checkpoint_store(&self.project_dir)?,
        };
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(InMemoryEventBus::new()));
        let fixer = self.fixer.unwrap_or_else(|| Arc::new(NoopPatternFixer));
        let agents = self.agents.unwrap_or_default();
        let matchers = self.matchers.unwrap_or_default();

        let build_config = self.config.resolved_build(&self.project_dir);
        let output_dir = build_config.output_dir.clone();
        let build = BuildLoop::new(build_config, Arc::clone(&agents))
            .with_checkpoints(Arc::clone(&checkpoints))
            .with_event_bus(Arc::clone(&bus));
        let fix = AutoFixLoop::new(self.config.fix.clone(), fixer, Arc::clone(&matchers))
            .with_checkpoints(Arc::clone(&checkpoints))
            .with_event_bus(Arc::clone(&bus));

        Ok(Orchestrator {
            planner: ExecutionPlanner::new(self.config.planner.clone()),
            agents,
            matchers,
            bus,
            checkpoints,
            build: Mutex::new(build),
            fix: Mutex::new(fix),
            output_dir,
            subscriptions: std::sync::Mutex::new(Vec::new()),
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Owns the collaborators and routes signals to the loops.
pub struct Orchestrator {
    planner: ExecutionPlanner,
    agents: Arc<AgentRegistry>,
    matchers: Arc<MatcherRegistry>,
    bus: Arc<dyn EventBus>,
    checkpoints: Arc<dyn CheckpointStore>,
    build: Mutex<BuildLoop>,
    fix: Mutex<AutoFixLoop>,
    output_dir: PathBuf,
    subscriptions: std::sync::Mutex<Vec<Subscription>>,
}

impl Orchestrator {
    /// Build from configuration with default collaborators.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorBuilder::build`].
    pub fn new(config: OrchestratorConfig, project_dir: &Path) -> Result<Self> {
        OrchestratorBuilder::new(config, project_dir).build()
    }

    #[must_use]
    pub fn builder(config: OrchestratorConfig, project_dir: impl Into<PathBuf>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, project_dir)
    }

    #[must_use]
    pub fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    /// Registry new agents can be added to at any time.
    #[must_use]
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    #[must_use]
    pub fn matchers(&self) -> &Arc<MatcherRegistry> {
        &self.matchers
    }

    #[must_use]
    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    /// Create a plan with the configured planner.
    ///
    /// # Errors
    ///
    /// Returns the planner's cycle or integrity error.
    pub fn plan(&self, tasks: Vec<Task>) -> Result<Plan> {
        self.planner.create_plan(tasks)
    }

    /// Execute a plan group by group.
    pub async fn run_plan(&self, plan: &mut Plan, executor: Arc<dyn TaskExecutor>) -> PlanRunReport {
        PlanRunner::new(Arc::clone(&self.checkpoints))
            .run(plan, executor)
            .await
    }

    // ------------------------------------------------------------------------
    // Build loop
    // ------------------------------------------------------------------------

    pub async fn enqueue_features(&self, features: Vec<Feature>) {
        self.build.lock().await.enqueue(features);
    }

    pub async fn run_build(&self) -> BuildReport {
        self.build.lock().await.run().await
    }

    // ------------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------------

    /// Subscribe to the inbound signals and forward them to a channel.
    ///
    /// Payloads that fail to decode are logged and dropped. Feed the
    /// receiver to [`run`](Self::run).
    pub fn attach(&self) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for event in INBOUND_SIGNALS {
            let tx = tx.clone();
            let handler = Arc::new(move |payload: &serde_json::Value| {
                match Signal::from_event(event, payload) {
                    Ok(Some(signal)) => {
                        if tx.send(signal).is_err() {
                            debug!("Signal receiver dropped; ignoring {}", event);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping malformed {} payload: {}", event, e),
                }
            });
            subscriptions.push(self.bus.subscribe(event, "orchestrator", handler));
        }
        info!("Orchestrator attached to {} signals", INBOUND_SIGNALS.len());
        rx
    }

    /// Remove every subscription made by [`attach`](Self::attach).
    pub fn detach(&self) {
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    /// Handle signals until every sender is gone.
    pub async fn run(&self, mut signals: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = signals.recv().await {
            if let Err(e) = self.process(signal).await {
                warn!("Signal handling failed: {}", e);
            }
        }
        debug!("Signal channel closed");
    }

    /// Route one signal to the loop that owns it.
    ///
    /// # Errors
    ///
    /// Only code emission can fail; loop outcomes are reported, not returned
    /// as errors.
    pub async fn process(&self, signal: Signal) -> Result<SignalOutcome> {
        match signal {
            Signal::TestsFailed(report) => {
                let report = self.fix.lock().await.handle_failure(report).await;
                Ok(SignalOutcome::Fix(report))
            }
            Signal::TestsCompleted => {
                let report = self.fix.lock().await.complete();
                Ok(SignalOutcome::FixCompleted(report))
            }
            Signal::AgentCompleted { handler } => {
                let pending = self.fix.lock().await.record_agent_completion(&handler);
                Ok(SignalOutcome::AgentRecorded { handler, pending })
            }
            Signal::CodeGenerated { artifacts } => {
                let written = write_artifacts(&self.output_dir, &artifacts).await?;
                info!("Wrote {} generated file(s)", written.len());
                Ok(SignalOutcome::CodeWritten(written))
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.detach();
    }
}

//! autoforge - autonomous build and fix orchestration
//!
//! Turns a set of dependent tasks into a dependency-correct execution plan,
//! drives platform agents through a feature build loop, and repairs failing
//! tests with a tiered auto-fix loop. Every mutation is wrapped in a
//! checkpoint that is committed on success and rolled back on failure.
//!
//! # Architecture
//!
//! ```text
//!   tasks ──> graph::DependencyGraph ──> planner::ExecutionPlanner ──> Plan
//!                                                                       │
//!                                                    planner::PlanRunner┘
//!
//!   features ──> build::BuildLoop ──> registry::AgentRegistry ──> emit
//!
//!   tests.failed ──> fix::AutoFixLoop ──tier 1──> PatternFixer
//!                                     └─tier 2──> MatcherRegistry ──> autofix.requested
//!
//!   all loops ──> checkpoint::CheckpointStore     events::EventBus <── orchestrator
//! ```
//!
//! - [`graph`] - Dependency graph, cycle detection and integrity warnings
//! - [`planner`] - Execution plans, readiness queries and the group runner
//! - [`build`] - Feature build loop
//! - [`fix`] - Tiered auto-fix loop
//! - [`orchestrator`] - Wiring of loops to inbound bus signals
//! - [`checkpoint`] - Checkpoint stores (in-memory and file-backed)
//! - [`config`] - `autoforge.toml` loading and validation
//! - [`error`] - Error types and classification
//! - [`testing`] - Mocks, fixtures and plan assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use autoforge::{ExecutionPlanner, PlannerConfig};
//! use autoforge::testing::fixtures;
//!
//! let planner = ExecutionPlanner::new(PlannerConfig::new().with_max_concurrency(2));
//! let plan = planner.create_plan(fixtures::web_app())?;
//! println!("{}", plan.summary());
//!
//! let ready = planner.next_tasks(&plan, &plan.completed_ids());
//! ```

pub mod build;
pub mod checkpoint;
pub mod config;
pub mod emit;
pub mod error;
pub mod events;
pub mod fix;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod stop;
pub mod task;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoOrchestratorError, OrchestratorError, Result};

pub use config::{CheckpointSettings, ConfigSource, OrchestratorConfig};

pub use task::{Phase, Task, TaskStatus};

pub use graph::{DependencyGraph, GraphWarning};

pub use planner::{
    ExecutionGroup, ExecutionPlanner, Plan, PlanRunReport, PlanRunner, PlannerConfig,
    TaskExecutor,
};

pub use build::{BuildLoop, BuildLoopConfig, BuildReport, BuildStatus, Feature};

pub use fix::{
    AutoFixLoop, FailureReport, FixLoopConfig, FixReport, FixStatus, PatternFixer, TestFailure,
};

pub use checkpoint::{
    CheckpointId, CheckpointRecord, CheckpointState, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};

pub use events::{EventBus, InMemoryEventBus, Subscription};

pub use registry::{Agent, AgentOutput, AgentRegistry, AgentRequest, Artifact, MatcherRegistry};

pub use orchestrator::{Orchestrator, OrchestratorBuilder, Signal, SignalOutcome};

pub use stop::StopHandle;

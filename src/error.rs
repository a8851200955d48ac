//! Custom error types for autoforge.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the orchestrator.
//!
//! Only plan-level errors ([`OrchestratorError::CircularDependency`] and
//! [`OrchestratorError::PlanIntegrity`]) propagate to callers of the
//! planner. Loop-level failures are caught at the loop boundary and turned
//! into report entries.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Graph / Planner Errors
    // =========================================================================
    /// The task graph contains a cycle
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Grouping found no ready task while tasks remained
    #[error("Plan integrity violation: {} task(s) could not be scheduled ({})", remaining.len(), remaining.join(", "))]
    PlanIntegrity { remaining: Vec<String> },

    /// Task id not present in the plan
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// No agent registered for a feature's platform
    #[error("Unknown platform: no agent registered for '{platform}'")]
    UnknownPlatform { platform: String },

    /// An agent loader failed
    #[error("Failed to load agent '{name}': {message}")]
    AgentLoad { name: String, message: String },

    /// Loop execution failed
    #[error("Loop execution error: {message}")]
    Loop { message: String },

    // =========================================================================
    // Checkpoint Errors
    // =========================================================================
    /// Checkpoint store operation failed
    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },

    /// Checkpoint id unknown to the store
    #[error("Checkpoint not found: {id}")]
    CheckpointNotFound { id: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML parse error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a loop error
    pub fn loop_error(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    /// Create a checkpoint error
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Create a task-not-found error
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    /// Create an unknown-platform error
    pub fn unknown_platform(platform: impl Into<String>) -> Self {
        Self::UnknownPlatform {
            platform: platform.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable (the enclosing loop may continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownPlatform { .. }
                | Self::AgentLoad { .. }
                | Self::Loop { .. }
                | Self::Checkpoint { .. }
                | Self::CheckpointNotFound { .. }
        )
    }

    /// Check if this error is fatal (must abort before any task runs)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CircularDependency { .. }
                | Self::PlanIntegrity { .. }
                | Self::Config { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CircularDependency { .. } => 3,
            Self::PlanIntegrity { .. } => 4,
            Self::TaskNotFound { .. } => 5,
            Self::UnknownPlatform { .. } | Self::AgentLoad { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::Toml(_) => 7,
            _ => 1,
        }
    }
}

/// Type alias for orchestrator results
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Extension trait for converting foreign errors into [`OrchestratorError`]
pub trait IntoOrchestratorError<T> {
    fn into_config_error(self) -> Result<T>;
    fn into_loop_error(self) -> Result<T>;
    fn into_checkpoint_error(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoOrchestratorError<T> for std::result::Result<T, E> {
    fn into_config_error(self) -> Result<T> {
        self.map_err(|e| OrchestratorError::config(e.into().to_string()))
    }

    fn into_loop_error(self) -> Result<T> {
        self.map_err(|e| OrchestratorError::loop_error(e.into().to_string()))
    }

    fn into_checkpoint_error(self) -> Result<T> {
        self.map_err(|e| OrchestratorError::checkpoint(e.into().to_string()))
    }
}

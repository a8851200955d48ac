//! Orchestrator configuration.
//!
//! Settings are read from `autoforge.toml` in the project directory, falling
//! back to the user config (`<config_dir>/autoforge/config.toml`) and then to
//! built-in defaults. Every section and field is optional.
//!
//! ```toml
//! [planner]
//! max_concurrency = 3
//! checkpoint_interval = 5
//! minutes_per_complexity = 30
//!
//! [build]
//! max_iterations = 100
//! output_dir = "."
//!
//! [fix]
//! max_iterations = 5
//! default_handler = "general-fixer"
//!
//! [checkpoints]
//! enabled = true
//! dir = ".autoforge/checkpoints"
//! max_checkpoints = 50
//! ```

use crate::build::BuildLoopConfig;
use crate::checkpoint::{CheckpointStore, FileCheckpointConfig, FileCheckpointStore, NoopCheckpointStore};
use crate::error::{OrchestratorError, Result};
use crate::fix::FixLoopConfig;
use crate::planner::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Project configuration file name.
pub const CONFIG_FILE: &str = "autoforge.toml";

/// Checkpoint persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// Persist checkpoints to disk; when false a no-op store is used
    pub enabled: bool,
    /// Relative paths resolve against the project directory
    pub dir: PathBuf,
    pub max_checkpoints: usize,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".autoforge/checkpoints"),
            max_checkpoints: 50,
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Project(PathBuf),
    User(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Project(path) => write!(f, "project ({})", path.display()),
            ConfigSource::User(path) => write!(f, "user ({})", path.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub planner: PlannerConfig,
    pub build: BuildLoopConfig,
    pub fix: FixLoopConfig,
    pub checkpoints: CheckpointSettings,
}

impl OrchestratorConfig {
    /// Load and validate configuration for a project directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or
    /// parsed, or if validation fails.
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_with_source(project_dir).map(|(config, _)| config)
    }

    /// Like [`load`](Self::load), also reporting which file was used.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with_source(project_dir: &Path) -> Result<(Self, ConfigSource)> {
        let project_path = Self::project_path(project_dir);
        if project_path.exists() {
            let config = Self::from_file(&project_path)?;
            return Ok((config, ConfigSource::Project(project_path)));
        }

        if let Some(user_path) = Self::user_path().filter(|p| p.exists()) {
            let config = Self::from_file(&user_path)?;
            return Ok((config, ConfigSource::User(user_path)));
        }

        debug!("No configuration file found, using defaults");
        Ok((Self::default(), ConfigSource::Defaults))
    }

    /// Parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a config error naming the file on read, parse or validation
    /// failure.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config_with_path(format!("cannot read: {}", e), path.to_path_buf())
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            OrchestratorError::Toml(parse) => OrchestratorError::config_with_path(
                format!("invalid TOML: {}", parse),
                path.to_path_buf(),
            ),
            other => other,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Toml`] on malformed input and
    /// [`OrchestratorError::InvalidConfig`] on out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    ///
    /// # Errors
    ///
    /// Returns a config error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::config(format!("cannot serialize: {}", e)))
    }

    #[must_use]
    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_FILE)
    }

    /// Per-user fallback config path, when the platform has a config dir.
    #[must_use]
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autoforge").join("config.toml"))
    }

    /// Reject values that would make the planner or loops unable to progress.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.planner.max_concurrency == 0 {
            return Err(OrchestratorError::invalid_config(
                "planner.max_concurrency",
                "must be at least 1",
            ));
        }
        if self.planner.checkpoint_interval == 0 {
            return Err(OrchestratorError::invalid_config(
                "planner.checkpoint_interval",
                "must be at least 1",
            ));
        }
        if self.build.max_iterations == 0 {
            return Err(OrchestratorError::invalid_config(
                "build.max_iterations",
                "must be at least 1",
            ));
        }
        if self.fix.max_iterations == 0 {
            return Err(OrchestratorError::invalid_config(
                "fix.max_iterations",
                "must be at least 1",
            ));
        }
        if self.fix.default_handler.trim().is_empty() {
            return Err(OrchestratorError::invalid_config(
                "fix.default_handler",
                "must not be empty",
            ));
        }
        if self.checkpoints.enabled && self.checkpoints.max_checkpoints == 0 {
            return Err(OrchestratorError::invalid_config(
                "checkpoints.max_checkpoints",
                "must be at least 1 when checkpoints are enabled",
            ));
        }
        Ok(())
    }

    /// Checkpoint directory resolved against the project directory.
    #[must_use]
    pub fn checkpoint_dir(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.checkpoints.dir)
    }

    /// Build configuration with `output_dir` resolved against the project directory.
    #[must_use]
    pub fn resolved_build(&self, project_dir: &Path) -> BuildLoopConfig {
        let mut build = self.build.clone();
        build.output_dir = resolve(project_dir, &build.output_dir);
        build
    }

    /// The checkpoint store these settings describe.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be created.
    pub fn checkpoint_store(&self, project_dir: &Path) -> Result<Arc<dyn CheckpointStore>> {
        if !self.checkpoints.enabled {
            return Ok(Arc::new(NoopCheckpointStore));
        }
        let store = FileCheckpointStore::with_config(
            self.checkpoint_dir(project_dir),
            FileCheckpointConfig::new().with_max_checkpoints(self.checkpoints.max_checkpoints),
        )?;
        Ok(Arc::new(store))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

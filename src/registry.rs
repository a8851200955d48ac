//! Agent and matcher registries.
//!
//! Both registries are explicit objects owned by the orchestrator and
//! injected into the loops. They only grow, and are internally synchronized
//! so new entries can be registered while a loop is running.

use crate::error::{OrchestratorError, Result};
use crate::fix::TestFailure;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

// ============================================================================
// Agent Contract
// ============================================================================

/// Work handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub platform: String,
    /// Free-form feature specification
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    /// Absent when the component produced no source
    #[serde(default)]
    pub code: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: Some(code.into()),
        }
    }

    /// An entry that declares a path but carries no code.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            code: None,
        }
    }
}

/// What an agent returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Component name to artifact
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl AgentOutput {
    #[must_use]
    pub fn with_artifact(mut self, component: impl Into<String>, artifact: Artifact) -> Self {
        self.artifacts.insert(component.into(), artifact);
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = result;
        self
    }

    /// False for agents with no generation capability.
    #[must_use]
    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

/// A unit of work capable of handling one feature or fix request.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, request: &AgentRequest) -> anyhow::Result<AgentOutput>;
}

type Generator = dyn Fn(&AgentRequest) -> anyhow::Result<BTreeMap<String, Artifact>> + Send + Sync;

/// Adapter turning a synchronous code generator into an [`Agent`].
pub struct FnAgent {
    generate: Box<Generator>,
}

impl FnAgent {
    pub fn new<F>(generate: F) -> Self
    where
        F: Fn(&AgentRequest) -> anyhow::Result<BTreeMap<String, Artifact>> + Send + Sync + 'static,
    {
        Self {
            generate: Box::new(generate),
        }
    }
}

#[async_trait]
impl Agent for FnAgent {
    async fn execute(&self, request: &AgentRequest) -> anyhow::Result<AgentOutput> {
        let artifacts = (self.generate)(request)?;
        Ok(AgentOutput {
            artifacts,
            result: serde_json::Value::Null,
        })
    }
}

impl fmt::Debug for FnAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnAgent")
    }
}

// ============================================================================
// Agent Registry
// ============================================================================

/// Deferred agent construction, run on first resolution.
pub type AgentLoader =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn Agent>>> + Send + Sync>;

/// Name-to-agent lookup with lazy loaders.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    loaders: RwLock<HashMap<String, AgentLoader>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready agent under `name`.
    ///
    /// A later registration under the same name replaces the earlier one and
    /// logs a warning. Returns whether an agent was replaced.
    pub fn register_agent(&self, name: impl Into<String>, agent: Arc<dyn Agent>) -> bool {
        let name = name.into();
        let previous = self
            .agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), agent);
        if previous.is_some() {
            warn!(name = %name, "agent re-registered; replacing previous registration");
        } else {
            debug!(name = %name, "registered agent");
        }
        previous.is_some()
    }

    /// Register a code generator closure, wrapped in [`FnAgent`].
    pub fn register_generator<F>(&self, name: impl Into<String>, generate: F) -> bool
    where
        F: Fn(&AgentRequest) -> anyhow::Result<BTreeMap<String, Artifact>> + Send + Sync + 'static,
    {
        self.register_agent(name, Arc::new(FnAgent::new(generate)))
    }

    /// Register a loader that builds the agent on first use.
    ///
    /// Replaces any loader or agent already registered under `name`, with a
    /// warning. Returns whether something was replaced.
    pub fn register_agent_loader<F, Fut>(&self, name: impl Into<String>, loader: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Arc<dyn Agent>>> + Send + 'static,
    {
        let name = name.into();
        let loader: AgentLoader = Arc::new(move || Box::pin(loader()));
        let replaced_loader = self
            .loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), loader)
            .is_some();
        // a cached agent would shadow the new loader
        let evicted_agent = self
            .agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name)
            .is_some();

        let replaced = replaced_loader || evicted_agent;
        if replaced {
            warn!(name = %name, "agent loader re-registered; replacing previous registration");
        } else {
            debug!(name = %name, "registered agent loader");
        }
        replaced
    }

    /// Resolve an agent, running and caching its loader if needed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AgentLoad`] when a loader fails.
    pub async fn resolve(&self, name: &str) -> Result<Option<Arc<dyn Agent>>> {
        let cached = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let loader = self
            .loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        let Some(loader) = loader else {
            return Ok(None);
        };

        let agent = loader().await.map_err(|e| OrchestratorError::AgentLoad {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        info!(name = %name, "loaded agent");

        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let cached = agents.entry(name.to_string()).or_insert(agent);
        Ok(Some(Arc::clone(cached)))
    }

    /// Whether an agent or loader exists under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
            || self
                .loaders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(name)
    }

    /// Sorted names of agents and loaders.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.extend(
            self.loaders
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        names.sort();
        names.dedup();
        names
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("names", &self.names())
            .finish()
    }
}

// ============================================================================
// Matcher Registry
// ============================================================================

/// Routes a failure on a platform to a handler name.
pub type Matcher = Arc<dyn Fn(&TestFailure, &str) -> Option<String> + Send + Sync>;

/// Ordered failure matchers.
#[derive(Default)]
pub struct MatcherRegistry {
    matchers: RwLock<Vec<Matcher>>,
}

impl MatcherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a matcher. Earlier matchers take precedence.
    pub fn register_matcher<F>(&self, matcher: F)
    where
        F: Fn(&TestFailure, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.matchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(matcher));
    }

    /// First handler claimed by a matcher, if any.
    #[must_use]
    pub fn match_failure(&self, failure: &TestFailure, platform: &str) -> Option<String> {
        let matchers: Vec<Matcher> = self
            .matchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        matchers.iter().find_map(|m| m(failure, platform))
    }

    /// Handler for a failure, falling back to `default_handler`.
    #[must_use]
    pub fn route(&self, failure: &TestFailure, platform: &str, default_handler: &str) -> String {
        self.match_failure(failure, platform)
            .unwrap_or_else(|| default_handler.to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherRegistry")
            .field("matchers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(platform: &str) -> AgentRequest {
        AgentRequest {
            id: "1".to_string(),
            name: "login".to_string(),
            description: String::new(),
            platform: platform.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_fn_agent_wraps_generator() {
        let registry = AgentRegistry::new();
        registry.register_generator("web", |req| {
            let mut out = BTreeMap::new();
            out.insert(
                "page".to_string(),
                Artifact::new(format!("src/{}.tsx", req.name), "export {}"),
            );
            Ok(out)
        });

        let agent = registry.resolve("web").await.unwrap().unwrap();
        let output = agent.execute(&request("web")).await.unwrap();
        assert!(output.has_artifacts());
        assert_eq!(output.artifacts["page"].path, PathBuf::from("src/login.tsx"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_none() {
        let registry = AgentRegistry::new();
        assert!(registry.resolve("ios").await.unwrap().is_none());
        assert!(!registry.contains("ios"));
    }

    #[tokio::test]
    async fn test_loader_runs_once_and_is_cached() {
        let registry = AgentRegistry::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        registry.register_agent_loader("api", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let agent: Arc<dyn Agent> = Arc::new(FnAgent::new(|_| Ok(BTreeMap::new())));
                Ok(agent)
            }
        });
        assert!(registry.contains("api"));

        registry.resolve("api").await.unwrap().unwrap();
        registry.resolve("api").await.unwrap().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.names(), vec!["api".to_string()]);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_and_reports() {
        let registry = AgentRegistry::new();
        let first: Arc<dyn Agent> = Arc::new(FnAgent::new(|_| Ok(BTreeMap::new())));
        let second: Arc<dyn Agent> = Arc::new(FnAgent::new(|_| {
            let mut out = BTreeMap::new();
            out.insert("page".to_string(), Artifact::new("src/page.tsx", "export {}"));
            Ok(out)
        }));

        assert!(!registry.register_agent("web", first));
        assert!(registry.register_agent("web", second));
        assert_eq!(registry.names(), vec!["web".to_string()]);

        let agent = registry.resolve("web").await.unwrap().unwrap();
        let output = agent.execute(&request("web")).await.unwrap();
        assert!(output.has_artifacts());
    }

    #[tokio::test]
    async fn test_new_loader_replaces_cached_agent() {
        let registry = AgentRegistry::new();
        assert!(!registry.register_agent_loader("api", || async {
            let agent: Arc<dyn Agent> = Arc::new(FnAgent::new(|_| Ok(BTreeMap::new())));
            Ok(agent)
        }));
        registry.resolve("api").await.unwrap().unwrap();

        assert!(registry.register_agent_loader("api", || async {
            Err::<Arc<dyn Agent>, _>(anyhow::anyhow!("replacement loader ran"))
        }));

        let err = registry.resolve("api").await.err().unwrap();
        assert!(err.to_string().contains("replacement loader ran"));
    }

    #[tokio::test]
    async fn test_failing_loader_is_agent_load_error() {
        let registry = AgentRegistry::new();
        registry.register_agent_loader("broken", || async {
            Err::<Arc<dyn Agent>, _>(anyhow::anyhow!("missing toolchain"))
        });

        let err = registry.resolve("broken").await.err().unwrap();
        assert!(matches!(err, OrchestratorError::AgentLoad { .. }));
        assert!(err.to_string().contains("missing toolchain"));
    }

    #[test]
    fn test_matchers_first_match_wins() {
        let matchers = MatcherRegistry::new();
        matchers.register_matcher(|f, _| f.test.contains("auth").then(|| "auth-fixer".to_string()));
        matchers.register_matcher(|f, _| f.test.contains("login").then(|| "ui-fixer".to_string()));
        matchers.register_matcher(|_, platform| {
            (platform == "ios").then(|| "ios-fixer".to_string())
        });

        let auth_login = TestFailure::new("auth login flow", "boom");
        let login = TestFailure::new("login screen", "boom");
        let other = TestFailure::new("cart total", "boom");

        assert_eq!(matchers.route(&auth_login, "web", "general-fixer"), "auth-fixer");
        assert_eq!(matchers.route(&login, "web", "general-fixer"), "ui-fixer");
        assert_eq!(matchers.route(&other, "ios", "general-fixer"), "ios-fixer");
        assert_eq!(matchers.route(&other, "web", "general-fixer"), "general-fixer");
        assert_eq!(matchers.len(), 3);
    }
}

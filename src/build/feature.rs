//! Feature work items.

use crate::registry::AgentRequest;
use serde::{Deserialize, Serialize};

fn default_priority() -> u32 {
    5
}

/// A feature request handled by the build loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Agent registry key that builds this feature
    pub platform: String,
    /// Lower is more urgent
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form feature specification handed to the agent
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Feature {
    pub fn new(id: impl Into<String>, name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            platform: platform.into(),
            priority: default_priority(),
            dependencies: Vec::new(),
            spec: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set dependencies, dropping repeats while keeping first-seen order.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.clear();
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    #[must_use]
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Request handed to the platform agent.
    #[must_use]
    pub fn to_request(&self) -> AgentRequest {
        AgentRequest {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            platform: self.platform.clone(),
            payload: self.spec.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_deduplicated() {
        let f = Feature::new("3", "checkout", "web").with_dependencies(["1", "2", "1"]);
        assert_eq!(f.dependencies, vec!["1", "2"]);
    }

    #[test]
    fn test_deserialize_defaults() {
        let f: Feature =
            serde_json::from_str(r#"{"id":"1","name":"login","platform":"ios"}"#).unwrap();
        assert_eq!(f.priority, 5);
        assert!(f.dependencies.is_empty());
        assert!(f.spec.is_null());
    }

    #[test]
    fn test_to_request_carries_spec() {
        let f = Feature::new("1", "login", "web").with_spec(serde_json::json!({"oauth": true}));
        let req = f.to_request();
        assert_eq!(req.platform, "web");
        assert_eq!(req.payload["oauth"], true);
    }
}

//! Failure reports and the tier-1 fixer contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single failing test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TestFailure {
    pub fn new(test: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            message: message.into(),
            file: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// All descriptive text, used for keyword classification.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        [
            Some(self.test.as_str()),
            Some(self.message.as_str()),
            self.file.as_deref(),
            self.category.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{} ({}): {}", self.test, file, self.message),
            None => write!(f, "{}: {}", self.test, self.message),
        }
    }
}

/// Trigger for the fix loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub failures: Vec<TestFailure>,
    /// Raw test runner output
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub platform: String,
}

impl FailureReport {
    pub fn new(platform: impl Into<String>, failures: Vec<TestFailure>) -> Self {
        Self {
            failures,
            output: String::new(),
            platform: platform.into(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// A fix applied by tier 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFix {
    /// Test the fix targeted
    pub test: String,
    pub description: String,
}

impl AppliedFix {
    pub fn new(test: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            description: description.into(),
        }
    }
}

/// What tier 1 managed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFixOutcome {
    pub fixes: Vec<AppliedFix>,
    /// Failures tier 1 could not resolve
    pub remaining: Vec<TestFailure>,
    pub suggestions: Vec<String>,
}

impl PatternFixOutcome {
    /// Outcome where nothing was fixed.
    #[must_use]
    pub fn unresolved(failures: &[TestFailure]) -> Self {
        Self {
            fixes: Vec::new(),
            remaining: failures.to_vec(),
            suggestions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Tier-1 pattern-based fixer.
#[async_trait]
pub trait PatternFixer: Send + Sync {
    async fn fix(&self, output: &str, failures: &[TestFailure])
        -> anyhow::Result<PatternFixOutcome>;
}

/// Fixer that resolves nothing, sending every failure to tier 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPatternFixer;

#[async_trait]
impl PatternFixer for NoopPatternFixer {
    async fn fix(
        &self,
        _output: &str,
        failures: &[TestFailure],
    ) -> anyhow::Result<PatternFixOutcome> {
        Ok(PatternFixOutcome::unresolved(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_includes_optional_fields() {
        let failure = TestFailure::new("checkout total", "expected 10")
            .with_file("src/payment.rs")
            .with_category("billing");
        let text = failure.searchable_text();
        assert!(text.contains("checkout total"));
        assert!(text.contains("src/payment.rs"));
        assert!(text.contains("billing"));
    }

    #[test]
    fn test_display() {
        let failure = TestFailure::new("t", "boom").with_file("a.rs");
        assert_eq!(failure.to_string(), "t (a.rs): boom");
    }

    #[test]
    fn test_report_deserializes_with_defaults() {
        let report: FailureReport =
            serde_json::from_str(r#"{"failures":[{"test":"a","message":"b"}]}"#).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.platform.is_empty());
    }

    #[tokio::test]
    async fn test_noop_fixer_leaves_everything() {
        let failures = vec![TestFailure::new("a", "b")];
        let outcome = NoopPatternFixer.fix("", &failures).await.unwrap();
        assert!(!outcome.is_resolved());
        assert_eq!(outcome.remaining, failures);
    }
}

//! Keyword-based failure severity.

use super::types::TestFailure;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// How urgently a failure needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Checked in order; first match wins.
const SEVERITY_PATTERNS: &[(Severity, &str)] = &[
    (Severity::Critical, r"(?i)security|auth|payment"),
    (Severity::High, r"(?i)core|data"),
    (Severity::Medium, r"(?i)feature|component"),
];

static SEVERITY_RULES: LazyLock<Vec<(Severity, Regex)>> = LazyLock::new(|| {
    SEVERITY_PATTERNS
        .iter()
        .filter_map(|(severity, pattern)| Regex::new(pattern).ok().map(|re| (*severity, re)))
        .collect()
});

/// Classify a failure by the terms in its test name, message, file and category.
#[must_use]
pub fn classify(failure: &TestFailure) -> Severity {
    let text = failure.searchable_text();
    SEVERITY_RULES
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map_or(Severity::Low, |(severity, _)| *severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(SEVERITY_RULES.len(), SEVERITY_PATTERNS.len());
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(
            classify(&TestFailure::new("OAuth login", "core data mismatch")),
            Severity::Critical
        );
        assert_eq!(
            classify(&TestFailure::new("sync", "Data layer returned null")),
            Severity::High
        );
        assert_eq!(
            classify(&TestFailure::new("Button component renders", "snapshot")),
            Severity::Medium
        );
        assert_eq!(classify(&TestFailure::new("padding", "off by one")), Severity::Low);
    }

    #[test]
    fn test_file_and_category_count() {
        let failure = TestFailure::new("total", "expected 10").with_file("src/payment/cart.rs");
        assert_eq!(classify(&failure), Severity::Critical);

        let failure = TestFailure::new("total", "expected 10").with_category("feature");
        assert_eq!(classify(&failure), Severity::Medium);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.to_string(), "high");
    }
}

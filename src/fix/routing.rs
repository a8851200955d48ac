//! Tier-2 routing: failures to domain handlers.

use super::severity::{classify, Severity};
use super::types::TestFailure;
use crate::registry::MatcherRegistry;
use serde::{Deserialize, Serialize};

/// A failure annotated with its severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedFailure {
    #[serde(flatten)]
    pub failure: TestFailure,
    pub severity: Severity,
}

/// The failures sent to one handler in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier2Dispatch {
    pub handler: String,
    pub failures: Vec<RoutedFailure>,
}

impl Tier2Dispatch {
    /// Highest severity in the group.
    #[must_use]
    pub fn max_severity(&self) -> Severity {
        self.failures
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Low)
    }
}

/// Route each failure to exactly one handler and group by handler.
///
/// Groups appear in the order their handler was first chosen.
#[must_use]
pub fn route_failures(
    failures: &[TestFailure],
    matchers: &MatcherRegistry,
    platform: &str,
    default_handler: &str,
) -> Vec<Tier2Dispatch> {
    let mut dispatches: Vec<Tier2Dispatch> = Vec::new();
    for failure in failures {
        let handler = matchers.route(failure, platform, default_handler);
        let routed = RoutedFailure {
            severity: classify(failure),
            failure: failure.clone(),
        };
        match dispatches.iter_mut().find(|d| d.handler == handler) {
            Some(dispatch) => dispatch.failures.push(routed),
            None => dispatches.push(Tier2Dispatch {
                handler,
                failures: vec![routed],
            }),
        }
    }
    dispatches
}

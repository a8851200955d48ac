//! Integration tests for the tiered auto-fix loop

use autoforge::events::{AUTOFIX_LOOP_COMPLETED, AUTOFIX_REQUESTED};
use autoforge::fix::{FixLoopConfig, Severity};
use autoforge::testing::{fixtures, MockPatternFixer};
use autoforge::{
    AutoFixLoop, FixStatus, InMemoryEventBus, MatcherRegistry, MemoryCheckpointStore,
};
use std::sync::Arc;

fn matchers() -> Arc<MatcherRegistry> {
    let matchers = Arc::new(MatcherRegistry::new());
    matchers.register_matcher(|failure, _platform| {
        failure
            .test
            .contains("auth")
            .then(|| "auth-fixer".to_string())
    });
    matchers
}

#[tokio::test]
async fn test_tiered_fix_flow_end_to_end() {
    let fixer = Arc::new(
        MockPatternFixer::new()
            .resolve_tests(["lint_format"])
            .with_suggestion("pin the date library"),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let mut fix = AutoFixLoop::new(FixLoopConfig::new(), fixer.clone(), matchers())
        .with_checkpoints(store.clone())
        .with_event_bus(bus.clone());

    let report = fix
        .handle_failure(fixtures::failure_report(
            "web",
            &["lint_format", "login_auth", "widget_render"],
        ))
        .await;

    assert_eq!(report.status, FixStatus::PartialFix);
    assert_eq!(report.fixes_applied.len(), 1);
    assert_eq!(report.remaining, 2);
    assert_eq!(report.suggestions, vec!["pin the date library".to_string()]);

    let handlers: Vec<&str> = report.dispatches.iter().map(|d| d.handler.as_str()).collect();
    assert_eq!(handlers, vec!["auth-fixer", "general-fixer"]);
    assert_eq!(report.dispatches[0].max_severity(), Severity::Critical);
    assert_eq!(bus.published_named(AUTOFIX_REQUESTED).len(), 2);
    assert_eq!(store.committed_count(), 1);

    assert_eq!(fix.record_agent_completion("auth-fixer"), 0);
    assert_eq!(fix.pending_dispatches("general-fixer"), 1);

    let done = fix.complete().expect("active loop");
    assert_eq!(done.status, FixStatus::Success);
    assert!(!fix.is_active());
    assert_eq!(bus.published_named(AUTOFIX_LOOP_COMPLETED).len(), 1);
}

#[tokio::test]
async fn test_iteration_bound_ends_the_loop() {
    let fixer = Arc::new(MockPatternFixer::new());
    let mut fix = AutoFixLoop::new(
        FixLoopConfig::new().with_max_iterations(2),
        fixer.clone(),
        Arc::new(MatcherRegistry::new()),
    );

    for _ in 0..2 {
        let report = fix
            .handle_failure(fixtures::failure_report("web", &["flaky"]))
            .await;
        assert_eq!(report.status, FixStatus::PartialFix);
    }
    let report = fix
        .handle_failure(fixtures::failure_report("web", &["flaky"]))
        .await;

    assert_eq!(report.status, FixStatus::MaxIterationsReached);
    assert_eq!(report.iteration, 2);
    assert_eq!(fixer.call_count(), 2);
    assert!(!fix.is_active());
}

#[tokio::test]
async fn test_tier_one_error_rolls_back() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut fix = AutoFixLoop::new(
        FixLoopConfig::new(),
        Arc::new(MockPatternFixer::new().with_error("fixer crashed")),
        Arc::new(MatcherRegistry::new()),
    )
    .with_checkpoints(store.clone());

    let report = fix
        .handle_failure(fixtures::failure_report("web", &["a"]))
        .await;

    assert_eq!(report.status, FixStatus::Error);
    assert!(report.error.unwrap().contains("fixer crashed"));
    assert_eq!(store.rolled_back_count(), 1);
    assert_eq!(store.committed_count(), 0);
}

#[tokio::test]
async fn test_full_resolution_succeeds_in_one_iteration() {
    let mut fix = AutoFixLoop::new(
        FixLoopConfig::new(),
        Arc::new(MockPatternFixer::new().resolve_all()),
        matchers(),
    );

    let report = fix
        .handle_failure(fixtures::failure_report("ios", &["a", "b"]))
        .await;

    assert_eq!(report.status, FixStatus::Success);
    assert_eq!(report.iteration, 1);
    assert!(report.dispatches.is_empty());
    assert!(!fix.is_active());
}

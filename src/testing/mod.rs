//! Testing infrastructure for autoforge.
//!
//! Mocks, fixtures and assertions for exercising the planner and loops
//! without real agents, fixers or executors.
//!
//! - **Mocks**: collaborator doubles with controllable behavior
//! - **Fixtures**: ready-made task, feature and failure sets
//! - **Assertions**: plan-shape checks shared by unit and integration tests
//!
//! # Example
//!
//! ```rust,ignore
//! use autoforge::testing::{fixtures, assert_groups_valid, MockTaskExecutor};
//!
//! let plan = planner.create_plan(fixtures::diamond())?;
//! assert_groups_valid(&plan, 3);
//!
//! let executor = MockTaskExecutor::new().with_failure("b", "boom");
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::{PatternFixer, TestFailure};
    use crate::planner::{ExecutionPlanner, PlannerConfig, TaskExecutor};
    use crate::registry::{Agent, AgentRequest};
    use crate::task::Task;

    // =========================================================================
    // Mock Agent Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_agent_records_requests() {
        let agent = MockAgent::new().with_artifact("page", "src/page.tsx", "x");
        let request = fixtures::feature("1", &[]).to_request();

        let output = agent.clone().execute(&request).await.unwrap();
        assert!(output.has_artifacts());
        // Clones share the request log
        agent.execute(&request).await.unwrap();
        assert_eq!(agent.call_count(), 2);
        assert_eq!(agent.requests()[0].id, "1");
    }

    #[tokio::test]
    async fn test_mock_agent_failure() {
        let agent = MockAgent::new().with_failure("Agent crashed");
        let request = AgentRequest {
            id: "1".to_string(),
            name: "x".to_string(),
            description: String::new(),
            platform: "web".to_string(),
            payload: serde_json::Value::Null,
        };
        let result = agent.execute(&request).await;
        assert!(result.unwrap_err().to_string().contains("Agent crashed"));
    }

    // =========================================================================
    // Mock Pattern Fixer Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_fixer_partial_resolution() {
        let fixer = MockPatternFixer::new().resolve_tests(["a"]);
        let failures = vec![TestFailure::new("a", "x"), TestFailure::new("b", "y")];

        let outcome = fixer.fix("", &failures).await.unwrap();

        assert_eq!(outcome.fixes.len(), 1);
        assert_eq!(outcome.remaining, vec![TestFailure::new("b", "y")]);
        assert_eq!(fixer.call_count(), 1);
    }

    // =========================================================================
    // Mock Task Executor Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_executor_outcomes() {
        let executor = MockTaskExecutor::new()
            .with_result("a", serde_json::json!(1))
            .with_failure("b", "nope");

        assert_eq!(
            executor.execute(&Task::new("a", "a")).await.unwrap(),
            serde_json::json!(1)
        );
        assert!(executor.execute(&Task::new("b", "b")).await.is_err());
        assert_eq!(
            executor.execute(&Task::new("c", "c")).await.unwrap()["task"],
            "c"
        );
        assert_eq!(executor.executed(), vec!["a", "b", "c"]);
    }

    // =========================================================================
    // Fixture & Assertion Tests
    // =========================================================================

    #[test]
    fn test_fixtures_plan_cleanly() {
        let planner = ExecutionPlanner::new(PlannerConfig::new().with_max_concurrency(2));
        for tasks in [
            fixtures::chain(6),
            fixtures::fan_out(5),
            fixtures::diamond(),
            fixtures::web_app(),
        ] {
            let plan = planner.create_plan(tasks).unwrap();
            assert_topological(&plan);
            assert_groups_valid(&plan, 2);
        }
    }

    #[test]
    fn test_cycle_fixture_rejected() {
        let planner = ExecutionPlanner::new(PlannerConfig::default());
        assert!(planner.create_plan(fixtures::cycle()).is_err());
    }

    #[test]
    #[should_panic(expected = "has 3 members")]
    fn test_assert_groups_valid_catches_oversized_group() {
        let planner = ExecutionPlanner::new(PlannerConfig::new().with_max_concurrency(3));
        let plan = planner.create_plan(fixtures::fan_out(3)).unwrap();
        assert_groups_valid(&plan, 2);
    }
}

//! Publish/subscribe signals exchanged with the outside world.
//!
//! The core only depends on the two-method [`EventBus`] trait. The
//! [`InMemoryEventBus`] delivers synchronously to registered handlers and
//! keeps a bounded history of what was published, which is enough for the
//! CLI and tests.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

// ============================================================================
// Signal Names
// ============================================================================

/// Inbound: a test run passed.
pub const TESTS_COMPLETED: &str = "tests.completed";
/// Inbound: a test run produced failures.
pub const TESTS_FAILED: &str = "tests.failed";
/// Inbound: a dispatched agent finished.
pub const AGENT_COMPLETED: &str = "agent.completed";
/// Inbound: generated code is ready to be written.
pub const CODE_GENERATED: &str = "code.generated";

/// Outbound: a feature build started.
pub const BUILD_STARTED: &str = "build.started";
/// Outbound: a feature build succeeded.
pub const BUILD_COMPLETED: &str = "build.completed";
/// Outbound: a feature build failed.
pub const BUILD_FAILED: &str = "build.failed";
/// Outbound: a tier-2 handler was asked to fix failures.
pub const AUTOFIX_REQUESTED: &str = "autofix.requested";
/// Outbound: the build loop reached a terminal status.
pub const BUILD_LOOP_COMPLETED: &str = "build_loop.completed";
/// Outbound: the fix loop reached a terminal status.
pub const AUTOFIX_LOOP_COMPLETED: &str = "autofix_loop.completed";

/// Signals the orchestrator listens for.
pub const INBOUND_SIGNALS: [&str; 4] = [TESTS_COMPLETED, TESTS_FAILED, AGENT_COMPLETED, CODE_GENERATED];

// ============================================================================
// Bus Contract
// ============================================================================

/// Callback invoked with a published payload.
pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    event: String,
    subscriber: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` when unsubscribed.
    pub fn new(
        event: impl Into<String>,
        subscriber: impl Into<String>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            event: event.into(),
            subscriber: subscriber.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[must_use]
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    /// Remove the handler from the bus.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}

/// Publish/subscribe transport.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &str, payload: serde_json::Value);

    fn subscribe(&self, event: &str, subscriber: &str, handler: EventHandler) -> Subscription;
}

// ============================================================================
// In-Memory Bus
// ============================================================================

/// Default number of published events retained.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// A published event as recorded in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

struct Handler {
    key: u64,
    event: String,
    subscriber: String,
    callback: EventHandler,
}

#[derive(Default)]
struct BusState {
    handlers: Vec<Handler>,
    history: VecDeque<PublishedEvent>,
    next_key: u64,
}

/// Synchronous in-process bus.
///
/// Cloning is cheap; clones share handlers and history.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<BusState>>,
    history_limit: usize,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusState::default())),
            history_limit: limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded history, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.lock().history.iter().cloned().collect()
    }

    /// Recorded payloads for one event name.
    #[must_use]
    pub fn published_named(&self, event: &str) -> Vec<serde_json::Value> {
        self.lock()
            .history
            .iter()
            .filter(|e| e.event == event)
            .map(|e| e.payload.clone())
            .collect()
    }

    #[must_use]
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.lock().handlers.iter().filter(|h| h.event == event).count()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: &str, payload: serde_json::Value) {
        let targets: Vec<EventHandler> = {
            let mut state = self.lock();
            if self.history_limit > 0 {
                if state.history.len() == self.history_limit {
                    state.history.pop_front();
                }
                state.history.push_back(PublishedEvent {
                    event: event.to_string(),
                    payload: payload.clone(),
                });
            }
            state
                .handlers
                .iter()
                .filter(|h| h.event == event)
                .map(|h| Arc::clone(&h.callback))
                .collect()
        };

        debug!("Published {} to {} handler(s)", event, targets.len());
        // Handlers run outside the lock so they may publish in turn
        for handler in targets {
            handler(&payload);
        }
    }

    fn subscribe(&self, event: &str, subscriber: &str, handler: EventHandler) -> Subscription {
        let key = {
            let mut state = self.lock();
            let key = state.next_key;
            state.next_key += 1;
            state.handlers.push(Handler {
                key,
                event: event.to_string(),
                subscriber: subscriber.to_string(),
                callback: handler,
            });
            key
        };
        trace!("{} subscribed to {}", subscriber, event);

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(event, subscriber, move || {
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                state.handlers.retain(|h| h.key != key);
                trace!("handler {} removed", key);
            }
        })
    }
}

impl fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let subscribers: Vec<String> = state
            .handlers
            .iter()
            .map(|h| format!("{}@{}", h.subscriber, h.event))
            .collect();
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &subscribers)
            .field("history", &state.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, EventHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_publish_reaches_matching_subscribers_only() {
        let bus = InMemoryEventBus::new();
        let (hits, handler) = counter();
        let _sub = bus.subscribe(TESTS_FAILED, "fix-loop", handler);

        bus.publish(TESTS_FAILED, json!({"failures": []}));
        bus.publish(TESTS_COMPLETED, json!({}));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_named(TESTS_FAILED).len(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let bus = InMemoryEventBus::new();
        let (hits, handler) = counter();
        let sub = bus.subscribe(AGENT_COMPLETED, "fix-loop", handler);
        assert_eq!(sub.event(), AGENT_COMPLETED);
        assert_eq!(bus.subscriber_count(AGENT_COMPLETED), 1);

        sub.unsubscribe();
        bus.publish(AGENT_COMPLETED, json!({}));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(AGENT_COMPLETED), 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = InMemoryEventBus::with_history_limit(3);
        for i in 0..5 {
            bus.publish(BUILD_STARTED, json!({"n": i}));
        }
        let history = bus.published();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].payload, json!({"n": 2}));
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = InMemoryEventBus::new();
        let inner = bus.clone();
        let _sub = bus.subscribe(
            TESTS_COMPLETED,
            "relay",
            Arc::new(move |_| inner.publish(BUILD_LOOP_COMPLETED, json!({}))),
        );

        bus.publish(TESTS_COMPLETED, json!({}));
        assert_eq!(bus.published_named(BUILD_LOOP_COMPLETED).len(), 1);
    }
}

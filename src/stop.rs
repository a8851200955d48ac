//! Cooperative stop signal shared between a loop and its controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable flag checked by loops at iteration boundaries.
///
/// # Example
///
/// ```
/// use autoforge::stop::StopHandle;
///
/// let handle = StopHandle::new();
/// let remote = handle.clone();
/// remote.request_stop();
/// assert!(handle.is_stop_requested());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the owning loop to stop after its current iteration.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the loop can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

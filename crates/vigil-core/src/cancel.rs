//! Cooperative cancellation for batch operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for batch verification.
///
/// Cloning produces another handle to the same flag. Batch operations poll
/// it once per resource: the granularity is deliberately coarse, so a
/// fingerprint already in progress runs to completion before cancellation
/// takes effect.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Irreversible for this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

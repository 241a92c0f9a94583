//! Recording error sink

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatch::ErrorSink;
use crate::error::TransportError;

/// An [`ErrorSink`] that keeps every reported error
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    errors: Arc<Mutex<Vec<TransportError>>>,
}

impl RecordingSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors reported so far
    #[must_use]
    pub fn errors(&self) -> Vec<TransportError> {
        self.errors.lock().clone()
    }

    /// Wait until at least `count` errors were reported, for up to five seconds
    pub async fn wait_for(&self, count: usize) -> bool {
        for _ in 0..500 {
            if self.errors.lock().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: TransportError) {
        self.errors.lock().push(error);
    }
}

//! Dispatch counters

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Snapshot of dispatcher activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchMetrics {
    /// Requests accepted into the queue
    pub enqueued: u64,

    /// Requests refused because no signing identity was set
    pub rejected_not_ready: u64,

    /// Requests the relay queued
    pub delivered: u64,

    /// Requests that ended in any failure
    pub failed: u64,

    /// Transport errors reported to the error sink
    pub orphan_errors: u64,

    /// Requests waiting behind the current one
    pub queued: usize,

    /// Whether a request is current
    pub in_flight: bool,
}

impl DispatchMetrics {
    /// Requests that reached a terminal state
    #[must_use]
    pub const fn settled(&self) -> u64 {
        self.delivered + self.failed
    }
}

/// Shared, lock-protected metrics
#[derive(Debug, Clone, Default)]
pub(crate) struct MetricsHandle(Arc<RwLock<DispatchMetrics>>);

impl MetricsHandle {
    pub(crate) fn update(&self, f: impl FnOnce(&mut DispatchMetrics)) {
        f(&mut self.0.write());
    }

    pub(crate) fn snapshot(&self) -> DispatchMetrics {
        *self.0.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_counters() {
        let handle = MetricsHandle::default();
        let other = handle.clone();

        other.update(|m| {
            m.delivered += 2;
            m.failed += 1;
        });

        assert_eq!(handle.snapshot().settled(), 3);
    }
}

//! Out-of-band reporting for transport errors no request owns

use tracing::error;

use crate::error::TransportError;

/// Receives transport errors raised while no request was in flight
pub trait ErrorSink: Send + Sync {
    /// Report an orphan error
    fn report(&self, error: TransportError);
}

/// Logs orphan errors with `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: TransportError) {
        error!(%error, "transport error with no request in flight");
    }
}

impl<F> ErrorSink for F
where
    F: Fn(TransportError) + Send + Sync,
{
    fn report(&self, error: TransportError) {
        self(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |error: TransportError| seen.lock().push(error)
        };

        sink.report(TransportError::NotConnected);
        assert_eq!(*seen.lock(), vec![TransportError::NotConnected]);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingSink.report(TransportError::connection("reset by peer"));
    }
}

//! Scripted transport session

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lettre::address::Envelope;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::transport::{LinkId, SessionEvent, SessionEvents, TransportSession};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// An operation the dispatcher invoked on a [`ScriptedSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    /// `connect`
    Connect,
    /// `use_envelope`
    UseEnvelope(Envelope),
    /// `send`
    Send(Bytes),
    /// `quit`
    Quit,
}

/// A transport session that records calls and emits nothing on its own
///
/// Every event must be fired explicitly through the paired [`SessionProbe`].
#[derive(Debug)]
pub struct ScriptedSession {
    calls: mpsc::UnboundedSender<SessionCall>,
    events: Arc<Mutex<Option<SessionEvents>>>,
}

/// Test-side view of a [`ScriptedSession`]
#[derive(Debug)]
pub struct SessionProbe {
    calls: mpsc::UnboundedReceiver<SessionCall>,
    events: Arc<Mutex<Option<SessionEvents>>>,
}

impl ScriptedSession {
    /// Create a session and its probe
    #[must_use]
    pub fn new() -> (Self, SessionProbe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(Mutex::new(None));
        (
            Self {
                calls: tx,
                events: Arc::clone(&events),
            },
            SessionProbe { calls: rx, events },
        )
    }

    fn record(&self, call: SessionCall) {
        let _ = self.calls.send(call);
    }
}

impl TransportSession for ScriptedSession {
    fn connect(&mut self, events: SessionEvents) {
        *self.events.lock() = Some(events);
        self.record(SessionCall::Connect);
    }

    fn use_envelope(&mut self, envelope: Envelope) {
        self.record(SessionCall::UseEnvelope(envelope));
    }

    fn send(&mut self, message: Bytes) {
        self.record(SessionCall::Send(message));
    }

    fn quit(&mut self) {
        self.record(SessionCall::Quit);
    }
}

impl SessionProbe {
    /// Wait for the next recorded call
    ///
    /// Returns `None` if no call arrives within five seconds or the session is gone.
    pub async fn next_call(&mut self) -> Option<SessionCall> {
        tokio::time::timeout(CALL_TIMEOUT, self.calls.recv())
            .await
            .ok()
            .flatten()
    }

    /// The next recorded call, if one is already available
    pub fn try_next_call(&mut self) -> Option<SessionCall> {
        self.calls.try_recv().ok()
    }

    /// Fire `event` on the most recent connection
    ///
    /// Returns `false` if the session was never connected or the dispatcher is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.events
            .lock()
            .as_ref()
            .is_some_and(|events| events.emit(event))
    }

    /// The most recent connection
    #[must_use]
    pub fn link(&self) -> Option<LinkId> {
        self.events.lock().as_ref().map(SessionEvents::link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let (mut session, mut probe) = ScriptedSession::new();
        let (events, _rx) = SessionEvents::channel(LinkId::next());

        session.connect(events);
        session.send(Bytes::from_static(b"body"));
        session.quit();

        assert_eq!(probe.next_call().await, Some(SessionCall::Connect));
        assert_eq!(
            probe.next_call().await,
            Some(SessionCall::Send(Bytes::from_static(b"body")))
        );
        assert_eq!(probe.next_call().await, Some(SessionCall::Quit));
        assert_eq!(probe.try_next_call(), None);
    }

    #[test]
    fn test_emit_before_connect_fails() {
        let (_session, probe) = ScriptedSession::new();
        assert!(!probe.emit(SessionEvent::Idle));
        assert!(probe.link().is_none());
    }

    #[test]
    fn test_emit_uses_latest_link() {
        let (mut session, probe) = ScriptedSession::new();
        let second = LinkId::next();
        let (first_events, _first_rx) = SessionEvents::channel(LinkId::next());
        let (second_events, mut second_rx) = SessionEvents::channel(second);

        session.connect(first_events);
        session.connect(second_events);

        assert!(probe.emit(SessionEvent::Idle));
        assert_eq!(second_rx.try_recv().unwrap(), (second, SessionEvent::Idle));
    }
}

//! Transport session boundary
//!
//! A [`TransportSession`] is a stateful connection to a mail relay. Its
//! operations never block and never return errors directly: every outcome is
//! reported back as a [`SessionEvent`] through the [`SessionEvents`] handle
//! passed to [`TransportSession::connect`].
//!
//! Each `connect` call opens a new *link*, identified by a [`LinkId`]. Events
//! carry the link they came from so the coordinator can tell a live session
//! from one it has already quit.

mod smtp;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lettre::address::Envelope;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use smtp::SmtpSession;

/// Lifecycle signal emitted by a transport session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Ready for the next transaction
    Idle,

    /// Envelope accepted; any recipient the relay refused is listed
    Ready {
        /// Recipients refused with a negative `RCPT TO` reply
        failed_recipients: Vec<String>,
    },

    /// Final disposition of the submitted message
    Done {
        /// Whether the relay queued the message
        success: bool,
    },

    /// The session failed
    Error(TransportError),
}

/// Identifier of one connection of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// Allocate a process-unique link id
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

pub(crate) type EventReceiver = mpsc::UnboundedReceiver<(LinkId, SessionEvent)>;

/// Handle a session uses to report lifecycle events
#[derive(Debug, Clone)]
pub struct SessionEvents {
    link: LinkId,
    tx: mpsc::UnboundedSender<(LinkId, SessionEvent)>,
}

impl SessionEvents {
    pub(crate) const fn new(link: LinkId, tx: mpsc::UnboundedSender<(LinkId, SessionEvent)>) -> Self {
        Self { link, tx }
    }

    /// Create a handle for `link` and the receiving end of its events
    ///
    /// Useful for driving a session outside a dispatcher, e.g. in tests.
    #[must_use]
    pub fn channel(link: LinkId) -> (Self, mpsc::UnboundedReceiver<(LinkId, SessionEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(link, tx), rx)
    }

    /// The link this handle reports for
    #[must_use]
    pub const fn link(&self) -> LinkId {
        self.link
    }

    /// Report an event
    ///
    /// Returns `false` once the receiving side is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.link, event)).is_ok()
    }
}

/// An event-driven connection to a mail relay
///
/// Implementations are owned by exactly one dispatcher and are only ever
/// called from its coordinator task. At most one transaction is outstanding
/// at a time: `use_envelope` is only called after `Idle`, and `send` only
/// after a `Ready` with no failed recipients.
pub trait TransportSession: Send + 'static {
    /// Open a new connection, reporting through `events`
    ///
    /// Emits `Idle` once the connection is usable, or `Error` if it is not.
    /// Connecting again replaces any previous connection.
    fn connect(&mut self, events: SessionEvents);

    /// Start a transaction for `envelope`; answered with `Ready` or `Error`
    fn use_envelope(&mut self, envelope: Envelope);

    /// Transmit the message body; answered with `Done` (then `Idle`) or `Error`
    fn send(&mut self, message: Bytes);

    /// Close the connection
    ///
    /// No further events are expected after a quit.
    fn quit(&mut self);
}

impl<T: TransportSession + ?Sized> TransportSession for Box<T> {
    fn connect(&mut self, events: SessionEvents) {
        (**self).connect(events);
    }

    fn use_envelope(&mut self, envelope: Envelope) {
        (**self).use_envelope(envelope);
    }

    fn send(&mut self, message: Bytes) {
        (**self).send(message);
    }

    fn quit(&mut self) {
        (**self).quit();
    }
}

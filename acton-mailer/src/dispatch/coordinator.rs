//! Session coordinator
//!
//! A single task owns the queue, the shared transport session and the
//! per-request override session. Caller commands, build results and session
//! events all arrive on channels and are handled one at a time, so the queue
//! state is only ever mutated from this task.
//!
//! Every terminal path goes through [`Coordinator::settle`], which resolves
//! the current request, frees the slot and drains the next one.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::completion::{Completion, DeliveryResult};
use super::metrics::MetricsHandle;
use super::queue::DispatchQueue;
use super::sink::ErrorSink;
use super::RequestId;
use crate::error::{BuildError, DispatchError, TransportError};
use crate::message::{CompiledMessage, MessageBuilder, OutgoingMail};
use crate::transport::{EventReceiver, LinkId, SessionEvent, SessionEvents, TransportSession};

type BuildOutcome = (RequestId, Result<CompiledMessage, BuildError>);

/// Messages from [`Mailer`](super::Mailer) handles
pub(crate) enum Command {
    Enqueue(Request),
}

/// A send request as handed to the coordinator
pub(crate) struct Request {
    pub(crate) mail: OutgoingMail,
    pub(crate) completion: Completion,
    pub(crate) via: Option<Box<dyn TransportSession>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Building,
    AwaitingTransaction,
    InTransaction,
    Completing,
}

struct Entry {
    mail: OutgoingMail,
    completion: Completion,
    via: Option<Box<dyn TransportSession>>,
    phase: Phase,
    compiled: Option<CompiledMessage>,
}

impl Entry {
    fn new(request: Request) -> Self {
        Self {
            mail: request.mail,
            completion: request.completion,
            via: request.via,
            phase: Phase::Queued,
            compiled: None,
        }
    }

    const fn id(&self) -> RequestId {
        self.completion.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connecting,
    Idle,
    Busy,
}

/// A transport session and the state of its current connection
struct SessionLink {
    session: Box<dyn TransportSession>,
    id: Option<LinkId>,
    state: LinkState,
}

impl SessionLink {
    fn new(session: Box<dyn TransportSession>) -> Self {
        Self {
            session,
            id: None,
            state: LinkState::Disconnected,
        }
    }

    fn owns(&self, link: LinkId) -> bool {
        self.id == Some(link)
    }

    fn connect(&mut self, events: &mpsc::UnboundedSender<(LinkId, SessionEvent)>) {
        let link = LinkId::next();
        debug!(%link, "connecting transport session");
        self.id = Some(link);
        self.state = LinkState::Connecting;
        self.session.connect(SessionEvents::new(link, events.clone()));
    }

    /// Close the connection; later events from it are stale
    fn quit(&mut self) {
        if let Some(link) = self.id.take() {
            debug!(%link, "quitting transport session");
            self.session.quit();
        }
        self.state = LinkState::Disconnected;
    }

    /// Forget a connection that failed
    fn lost(&mut self) {
        self.id = None;
        self.state = LinkState::Disconnected;
    }

    fn mark_idle(&mut self) {
        if matches!(self.state, LinkState::Connecting | LinkState::Busy) {
            self.state = LinkState::Idle;
        }
    }
}

pub(crate) struct Coordinator {
    queue: DispatchQueue<Entry>,
    shared: SessionLink,
    dedicated: Option<SessionLink>,
    builder: Arc<dyn MessageBuilder>,
    sink: Arc<dyn ErrorSink>,
    keep_alive: bool,
    metrics: MetricsHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    built_tx: mpsc::UnboundedSender<BuildOutcome>,
    built_rx: mpsc::UnboundedReceiver<BuildOutcome>,
    events_tx: mpsc::UnboundedSender<(LinkId, SessionEvent)>,
    events_rx: EventReceiver,
}

impl Coordinator {
    pub(crate) fn new(
        builder: Arc<dyn MessageBuilder>,
        session: Box<dyn TransportSession>,
        sink: Arc<dyn ErrorSink>,
        keep_alive: bool,
        metrics: MetricsHandle,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (built_tx, built_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            queue: DispatchQueue::new(),
            shared: SessionLink::new(session),
            dedicated: None,
            builder,
            sink,
            keep_alive,
            metrics,
            commands,
            built_tx,
            built_rx,
            events_tx,
            events_rx,
        }
    }

    /// Process commands and events until every handle is dropped and the queue is empty
    pub(crate) async fn run(mut self) {
        let mut accepting = true;
        debug!(keep_alive = self.keep_alive, "dispatcher started");

        loop {
            tokio::select! {
                command = self.commands.recv(), if accepting => match command {
                    Some(Command::Enqueue(request)) => self.enqueue(request),
                    None => {
                        debug!(queued = self.queue.len(), "all mailer handles dropped");
                        accepting = false;
                    }
                },
                Some((id, result)) = self.built_rx.recv() => self.on_built(id, result),
                Some((link, event)) = self.events_rx.recv() => self.on_event(link, event),
            }

            self.publish();
            if !accepting && self.queue.is_idle() {
                break;
            }
        }

        self.shared.quit();
        info!("dispatcher stopped");
    }

    fn enqueue(&mut self, request: Request) {
        let id = request.completion.id();
        self.queue.enqueue(Entry::new(request));
        self.metrics.update(|m| m.enqueued += 1);
        debug!(request_id = %id, queued = self.queue.len(), "request queued");
        self.drain();
    }

    /// Start the head of the queue if nothing is in flight
    fn drain(&mut self) {
        let Some(entry) = self.queue.drain() else {
            return;
        };

        entry.phase = Phase::Building;
        let id = entry.id();
        let mail = std::mem::take(&mut entry.mail);
        self.dedicated = entry.via.take().map(SessionLink::new);

        debug!(
            request_id = %id,
            queued = self.queue.len(),
            dedicated = self.dedicated.is_some(),
            "building message"
        );

        let builder = Arc::clone(&self.builder);
        let built = self.built_tx.clone();
        tokio::spawn(async move {
            let build = tokio::spawn(async move { builder.build(mail).await });
            let result = build.await.unwrap_or_else(|err| {
                error!(request_id = %id, error = %err, "message builder panicked");
                Err(BuildError::Panicked(err.to_string()))
            });
            let _ = built.send((id, result));
        });
    }

    /// The session the current request runs on
    fn active_link(&mut self) -> &mut SessionLink {
        self.dedicated.as_mut().unwrap_or(&mut self.shared)
    }

    fn on_built(&mut self, id: RequestId, result: Result<CompiledMessage, BuildError>) {
        let Some(entry) = self
            .queue
            .current_mut()
            .filter(|entry| entry.id() == id && entry.phase == Phase::Building)
        else {
            debug!(request_id = %id, "discarding build result for a settled request");
            return;
        };

        match result {
            Ok(compiled) => {
                entry.compiled = Some(compiled);
                entry.phase = Phase::AwaitingTransaction;
                self.offer_envelope();
            }
            Err(err) => self.settle(Err(DispatchError::BuildFailed(err))),
        }
    }

    /// Hand the current envelope to the session once it is idle
    fn offer_envelope(&mut self) {
        let Some(entry) = self.queue.current() else {
            return;
        };
        if entry.phase != Phase::AwaitingTransaction {
            return;
        }
        let Some(envelope) = entry.compiled.as_ref().map(|c| c.envelope.clone()) else {
            return;
        };
        let id = entry.id();

        let events = self.events_tx.clone();
        let link = self.active_link();
        match link.state {
            LinkState::Disconnected => link.connect(&events),
            LinkState::Idle => {
                debug!(request_id = %id, "opening transaction");
                link.state = LinkState::Busy;
                link.session.use_envelope(envelope);
            }
            LinkState::Connecting | LinkState::Busy => {
                trace!(request_id = %id, state = ?link.state, "waiting for session");
            }
        }
    }

    fn on_event(&mut self, link: LinkId, event: SessionEvent) {
        if !self.active_link().owns(link) {
            self.on_inactive_event(link, event);
            return;
        }

        trace!(%link, ?event, "session event");
        match event {
            SessionEvent::Idle => {
                self.active_link().mark_idle();
                self.offer_envelope();
            }
            SessionEvent::Ready { failed_recipients } => self.on_ready(link, failed_recipients),
            SessionEvent::Done { success } => self.on_done(link, success),
            SessionEvent::Error(err) => {
                self.active_link().lost();
                if self.queue.is_busy() {
                    self.settle(Err(DispatchError::Transport(err)));
                } else {
                    self.orphan(link, err);
                }
            }
        }
    }

    /// Events from a quit connection, or from the shared session while an override runs
    fn on_inactive_event(&mut self, link: LinkId, event: SessionEvent) {
        if self.shared.owns(link) {
            match &event {
                SessionEvent::Idle => self.shared.mark_idle(),
                SessionEvent::Error(_) => self.shared.lost(),
                _ => {}
            }
        }

        match event {
            SessionEvent::Error(err) => self.orphan(link, err),
            event => trace!(%link, ?event, "ignoring event from inactive session"),
        }
    }

    fn on_ready(&mut self, link: LinkId, failed_recipients: Vec<String>) {
        let Some(entry) = self.queue.current_mut() else {
            warn!(%link, "envelope accepted with no request in flight");
            return;
        };
        if entry.phase != Phase::AwaitingTransaction {
            warn!(%link, phase = ?entry.phase, "unexpected envelope acceptance");
            return;
        }

        if !failed_recipients.is_empty() {
            self.active_link().quit();
            self.settle(Err(DispatchError::RecipientsRejected {
                recipients: failed_recipients,
            }));
            return;
        }

        entry.phase = Phase::InTransaction;
        let Some(raw) = entry.compiled.as_ref().map(|c| c.raw.clone()) else {
            return;
        };
        debug!(request_id = %entry.id(), %link, size = raw.len(), "transmitting message");
        entry.phase = Phase::Completing;
        self.active_link().session.send(raw);
    }

    fn on_done(&mut self, link: LinkId, success: bool) {
        let compiled = match self.queue.current_mut() {
            Some(entry) if entry.phase == Phase::Completing => entry.compiled.take(),
            current => {
                warn!(%link, phase = ?current.map(|e| e.phase), "unexpected transaction result");
                return;
            }
        };

        match (success, compiled) {
            (true, Some(compiled)) => {
                if !self.keep_alive {
                    self.active_link().quit();
                }
                self.settle(Ok(compiled));
            }
            _ => {
                self.active_link().quit();
                self.settle(Err(DispatchError::NotQueued));
            }
        }
    }

    /// Resolve the current request, free the slot and start the next one
    fn settle(&mut self, result: DeliveryResult) {
        let Some(entry) = self.queue.finish() else {
            return;
        };
        if let Some(mut dedicated) = self.dedicated.take() {
            dedicated.quit();
        }

        let id = entry.id();
        match &result {
            Ok(_) => {
                info!(request_id = %id, "message delivered");
                self.metrics.update(|m| m.delivered += 1);
            }
            Err(err) => {
                warn!(request_id = %id, error = %err, "request failed");
                self.metrics.update(|m| m.failed += 1);
            }
        }

        if !entry.completion.resolve(result) {
            debug!(request_id = %id, "caller dropped its delivery");
        }

        self.drain();
    }

    fn orphan(&self, link: LinkId, err: TransportError) {
        debug!(%link, error = %err, "transport error with no request in flight");
        self.metrics.update(|m| m.orphan_errors += 1);
        self.sink.report(err);
    }

    fn publish(&self) {
        let queued = self.queue.len();
        let in_flight = self.queue.is_busy();
        self.metrics.update(|m| {
            m.queued = queued;
            m.in_flight = in_flight;
        });
    }
}

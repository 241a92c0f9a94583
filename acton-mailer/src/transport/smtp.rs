//! SMTP transport session
//!
//! Uses `lettre`'s low-level [`AsyncSmtpConnection`] so each step of a
//! transaction can be reported as its own [`SessionEvent`]. A driver task owns
//! the connection; [`SmtpSession`] only queues commands to it.

use std::sync::Arc;

use bytes::Bytes;
use lettre::address::Envelope;
use lettre::transport::smtp::{
    authentication::{Credentials, Mechanism},
    client::{AsyncSmtpConnection, Certificate, TlsParameters},
    commands::{Data, Mail, Rcpt},
    extension::ClientId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{SessionEvent, SessionEvents, TransportSession};
use crate::config::SmtpSettings;
use crate::error::TransportError;

#[derive(Debug)]
enum Command {
    UseEnvelope(Envelope),
    Send(Bytes),
    Quit,
}

#[derive(Debug)]
struct Link {
    commands: mpsc::UnboundedSender<Command>,
    events: SessionEvents,
}

/// SMTP implementation of [`TransportSession`]
///
/// Every `connect` spawns a driver task on the current tokio runtime.
///
/// ```rust,no_run
/// use acton_mailer::config::SmtpSettings;
/// use acton_mailer::transport::SmtpSession;
///
/// let session = SmtpSession::new(SmtpSettings {
///     host: "smtp.gmail.com".to_string(),
///     secure: true,
///     ..SmtpSettings::default()
/// });
/// ```
#[derive(Debug)]
pub struct SmtpSession {
    settings: Arc<SmtpSettings>,
    link: Option<Link>,
}

impl SmtpSession {
    /// Create a disconnected session for the given relay
    #[must_use]
    pub fn new(settings: SmtpSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            link: None,
        }
    }

    /// The relay settings
    #[must_use]
    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    fn dispatch(&self, command: Command) {
        match &self.link {
            Some(link) => {
                if link.commands.send(command).is_err() {
                    link.events.emit(SessionEvent::Error(TransportError::NotConnected));
                }
            }
            None => warn!(?command, "SMTP session is not connected"),
        }
    }
}

impl TransportSession for SmtpSession {
    fn connect(&mut self, events: SessionEvents) {
        let (commands, rx) = mpsc::unbounded_channel();
        // Replacing the link drops the previous sender, which ends its driver.
        self.link = Some(Link {
            commands,
            events: events.clone(),
        });
        tokio::spawn(drive(Arc::clone(&self.settings), events, rx));
    }

    fn use_envelope(&mut self, envelope: Envelope) {
        self.dispatch(Command::UseEnvelope(envelope));
    }

    fn send(&mut self, message: Bytes) {
        self.dispatch(Command::Send(message));
    }

    fn quit(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.commands.send(Command::Quit);
        }
    }
}

async fn drive(
    settings: Arc<SmtpSettings>,
    events: SessionEvents,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let link = events.link();
    let mut connection = match open(&settings).await {
        Ok(connection) => connection,
        Err(err) => {
            events.emit(SessionEvent::Error(err));
            return;
        }
    };

    info!(%link, host = %settings.host, port = settings.effective_port(), "SMTP session established");
    events.emit(SessionEvent::Idle);

    while let Some(command) = commands.recv().await {
        match command {
            Command::UseEnvelope(envelope) => match open_transaction(&mut connection, &envelope).await {
                Ok(failed_recipients) => {
                    events.emit(SessionEvent::Ready { failed_recipients });
                }
                Err(err) => {
                    events.emit(SessionEvent::Error(err));
                    return;
                }
            },
            Command::Send(message) => match transmit(&mut connection, &message).await {
                Ok(success) => {
                    events.emit(SessionEvent::Done { success });
                    events.emit(SessionEvent::Idle);
                }
                Err(err) => {
                    events.emit(SessionEvent::Error(err));
                    return;
                }
            },
            Command::Quit => break,
        }
    }

    if let Err(err) = connection.quit().await {
        debug!(%link, error = %err, "QUIT failed");
    }
    debug!(%link, "SMTP session closed");
}

async fn open(settings: &SmtpSettings) -> Result<AsyncSmtpConnection, TransportError> {
    let hello = ClientId::Domain(settings.hello_name.clone());
    let port = settings.effective_port();
    let tls = tls_parameters(settings)?;

    let mut connection = AsyncSmtpConnection::connect_tokio1(
        (settings.host.as_str(), port),
        Some(settings.timeout()),
        &hello,
        settings.secure.then(|| tls.clone()),
        None,
    )
    .await
    .map_err(|e| TransportError::Connect {
        host: settings.host.clone(),
        port,
        reason: e.to_string(),
    })?;

    if !settings.secure && !settings.ignore_tls && connection.can_starttls() {
        connection
            .starttls(tls, &hello)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;
    }

    if let Some(auth) = &settings.auth {
        let credentials = Credentials::new(auth.user.clone(), auth.pass.clone());
        connection
            .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
            .await
            .map_err(|e| TransportError::Auth(e.to_string()))?;
    }

    Ok(connection)
}

fn tls_parameters(settings: &SmtpSettings) -> Result<TlsParameters, TransportError> {
    let mut builder = TlsParameters::builder(settings.host.clone());

    if let Some(ca_file) = &settings.ca_file {
        let pem = std::fs::read(ca_file)
            .map_err(|e| TransportError::Tls(format!("cannot read {}: {e}", ca_file.display())))?;
        let certificate =
            Certificate::from_pem(&pem).map_err(|e| TransportError::Tls(e.to_string()))?;
        builder = builder.add_root_certificate(certificate);
    }

    builder.build().map_err(|e| TransportError::Tls(e.to_string()))
}

/// `MAIL FROM` and one `RCPT TO` per recipient; returns the refused recipients
async fn open_transaction(
    connection: &mut AsyncSmtpConnection,
    envelope: &Envelope,
) -> Result<Vec<String>, TransportError> {
    connection
        .command(Mail::new(envelope.from().cloned(), vec![]))
        .await
        .map_err(|e| classify("MAIL FROM", &e))?;

    let mut failed = Vec::new();
    for recipient in envelope.to() {
        if let Err(err) = connection.command(Rcpt::new(recipient.clone(), vec![])).await {
            if !is_negative_reply(&err) {
                return Err(TransportError::connection(err.to_string()));
            }
            warn!(%recipient, error = %err, "recipient refused");
            failed.push(recipient.to_string());
        }
    }

    Ok(failed)
}

/// `DATA` and the message body; `Ok(false)` when the relay refuses the message
async fn transmit(connection: &mut AsyncSmtpConnection, message: &[u8]) -> Result<bool, TransportError> {
    let outcome = match connection.command(Data).await {
        Ok(_) => connection.message(message).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(response) => {
            debug!(?response, "message queued");
            Ok(true)
        }
        Err(err) if is_negative_reply(&err) => {
            warn!(error = %err, "message refused");
            Ok(false)
        }
        Err(err) => Err(TransportError::connection(err.to_string())),
    }
}

fn is_negative_reply(err: &lettre::transport::smtp::Error) -> bool {
    err.is_permanent() || err.is_transient()
}

fn classify(command: &str, err: &lettre::transport::smtp::Error) -> TransportError {
    if is_negative_reply(err) {
        TransportError::rejected(command, err.to_string())
    } else {
        TransportError::connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkId;

    #[test]
    fn test_tls_parameters_without_pinned_ca() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            ..SmtpSettings::default()
        };
        assert!(tls_parameters(&settings).is_ok());
    }

    #[test]
    fn test_missing_ca_file_is_a_tls_error() {
        let settings = SmtpSettings {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..SmtpSettings::default()
        };
        assert!(matches!(tls_parameters(&settings), Err(TransportError::Tls(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported_as_event() {
        // Nothing listens on port 1 of the loopback interface.
        let mut session = SmtpSession::new(SmtpSettings {
            host: "127.0.0.1".into(),
            port: Some(1),
            timeout_secs: 2,
            ..SmtpSettings::default()
        });
        let link = LinkId::next();
        let (events, mut rx) = SessionEvents::channel(link);

        session.connect(events);
        let (from, event) = rx.recv().await.unwrap();

        assert_eq!(from, link);
        assert!(matches!(
            event,
            SessionEvent::Error(TransportError::Connect { port: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_commands_after_failed_connect_report_not_connected() {
        let mut session = SmtpSession::new(SmtpSettings {
            host: "127.0.0.1".into(),
            port: Some(1),
            timeout_secs: 2,
            ..SmtpSettings::default()
        });
        let (events, mut rx) = SessionEvents::channel(LinkId::next());

        session.connect(events);
        let _connect_error = rx.recv().await.unwrap();
        session.send(Bytes::from_static(b"body"));

        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(event, SessionEvent::Error(TransportError::NotConnected));
    }

    #[test]
    fn test_quit_without_connect_is_noop() {
        let mut session = SmtpSession::new(SmtpSettings::default());
        session.quit();
        assert!(session.link.is_none());
    }
}

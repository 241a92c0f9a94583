//! Error types
//!
//! Every failure a caller can observe is one of the enums below. Failures that
//! happen while a request is in flight are always delivered to that request's
//! [`Delivery`](crate::dispatch::Delivery); they never escape the coordinator.

use thiserror::Error;

/// Terminal failure of a single `send` call
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No signing identity has been set and the mail must be signed
    #[error("no signing identity has been set")]
    NotReady,

    /// The message builder could not produce a compiled message
    #[error("failed to build message: {0}")]
    BuildFailed(#[source] BuildError),

    /// The relay refused one or more recipients of the envelope
    #[error("recipients rejected: {}", .recipients.join(", "))]
    RecipientsRejected {
        /// Addresses the relay refused
        recipients: Vec<String>,
    },

    /// The relay accepted the transaction but did not queue the message
    #[error("sent message was not queued successfully by the SMTP server")]
    NotQueued,

    /// The transport session failed while the request was in flight
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The dispatcher stopped before the request reached a terminal state
    #[error("dispatcher has shut down")]
    Shutdown,
}

impl DispatchError {
    /// Create a recipient rejection from any list of addresses
    #[must_use]
    pub fn recipients_rejected<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::RecipientsRejected {
            recipients: recipients.into_iter().map(Into::into).collect(),
        }
    }
}

/// Errors raised while setting the signing identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The key material could not be parsed
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The passphrase did not decrypt the key
    #[error("wrong passphrase for signing key")]
    WrongPassphrase,
}

impl IdentityError {
    /// Create an invalid credential error from a string message
    #[must_use]
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidCredential(msg.into())
    }
}

/// Errors produced by a [`MessageBuilder`](crate::message::MessageBuilder)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Mail has no sender
    #[error("mail must have a from address")]
    NoSender,

    /// Mail has no recipients
    #[error("mail must have at least one recipient")]
    NoRecipients,

    /// Invalid email address format
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// Encryption was requested without any public key
    #[error("encryption requested without public keys")]
    NoPublicKeys,

    /// MIME assembly failed
    #[error("MIME error: {0}")]
    Mime(String),

    /// Signing or encryption failed
    #[error("security error: {0}")]
    Security(String),

    /// The builder panicked or was cancelled before producing a result
    #[error("message builder panicked: {0}")]
    Panicked(String),
}

impl BuildError {
    /// Create a MIME error from a string message
    #[must_use]
    pub fn mime<T: Into<String>>(msg: T) -> Self {
        Self::Mime(msg.into())
    }

    /// Create a security error from a string message
    #[must_use]
    pub fn security<T: Into<String>>(msg: T) -> Self {
        Self::Security(msg.into())
    }
}

/// Errors reported by a [`TransportSession`](crate::transport::TransportSession)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The TCP or TLS connection could not be established
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connect {
        /// Relay host
        host: String,
        /// Relay port
        port: u16,
        /// Underlying reason
        reason: String,
    },

    /// TLS parameters or the STARTTLS upgrade failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Authentication with the relay failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The relay answered a command negatively
    #[error("server rejected {command}: {reason}")]
    Rejected {
        /// SMTP command that was refused
        command: String,
        /// Server reply
        reason: String,
    },

    /// The connection broke mid-session
    #[error("connection error: {0}")]
    Connection(String),

    /// A command was issued to a session that is not connected
    #[error("transport session is not connected")]
    NotConnected,
}

impl TransportError {
    /// Create a rejection for the given SMTP command
    #[must_use]
    pub fn rejected<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        Self::Rejected {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error from a string message
    #[must_use]
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        Self::Connection(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipients_rejected_message_lists_addresses() {
        let err = DispatchError::recipients_rejected(["x@example.com", "y@example.com"]);
        assert_eq!(
            err.to_string(),
            "recipients rejected: x@example.com, y@example.com"
        );
    }

    #[test]
    fn test_build_failure_keeps_source() {
        let err = DispatchError::BuildFailed(BuildError::NoSender);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("mail must have a from address"));
    }

    #[test]
    fn test_transport_error_converts() {
        let err: DispatchError = TransportError::connection("reset by peer").into();
        assert!(matches!(err, DispatchError::Transport(TransportError::Connection(_))));
    }
}

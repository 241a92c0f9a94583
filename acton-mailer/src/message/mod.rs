//! Message building
//!
//! A [`MessageBuilder`] turns an [`OutgoingMail`] into a transport-ready
//! [`CompiledMessage`]: the RFC 5322 bytes plus the SMTP envelope. Builders own
//! the signing identity; the dispatcher only asks them to validate and install it.
//!
//! [`MimeBuilder`] is the bundled implementation. It composes PGP/MIME with
//! `lettre` and hands the cryptography to a [`SecurityProvider`].

mod email;
mod mime;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use lettre::address::Envelope;

use crate::error::{BuildError, IdentityError};

pub use email::{Attachment, Email, OutgoingMail, Security};
pub use mime::{MimeBuilder, SecurityProvider};

#[cfg(test)]
pub use mime::MockSecurityProvider;

/// A message ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMessage {
    /// Formatted RFC 5322 message
    pub raw: Bytes,

    /// Sender and recipients for `MAIL FROM` / `RCPT TO`
    pub envelope: Envelope,
}

impl CompiledMessage {
    /// Create a compiled message
    #[must_use]
    pub fn new(raw: impl Into<Bytes>, envelope: Envelope) -> Self {
        Self {
            raw: raw.into(),
            envelope,
        }
    }

    /// The message source as text, lossily decoded
    #[must_use]
    pub fn source(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

/// Key material used to establish a signing identity
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityMaterial {
    /// ASCII-armored private key
    pub private_key: String,

    /// Passphrase protecting the private key
    pub passphrase: String,
}

impl IdentityMaterial {
    /// Create identity material from an armored key and its passphrase
    #[must_use]
    pub fn new(private_key: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            passphrase: passphrase.into(),
        }
    }
}

impl fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMaterial")
            .field("private_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// An unlocked signing identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// Fingerprint or key id of the unlocked key
    pub fingerprint: String,
}

impl SigningIdentity {
    /// Create a signing identity from its fingerprint
    #[must_use]
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
        }
    }
}

impl fmt::Display for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Produces compiled messages from send requests
///
/// `build` is called exactly once per request, by the dispatcher's coordinator
/// task, and must eventually resolve.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBuilder: Send + Sync {
    /// Validate and install the identity used to sign outgoing mail
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredential`] when the key cannot be parsed
    /// and [`IdentityError::WrongPassphrase`] when it cannot be decrypted.
    async fn set_signing_identity(
        &self,
        material: IdentityMaterial,
    ) -> Result<SigningIdentity, IdentityError>;

    /// Encrypt the body of a mail ahead of sending it
    ///
    /// A mail marked for encryption comes back pre-encrypted: its body holds
    /// the armored ciphertext of the text and attachments, so a later `build`
    /// only wraps it. Mail that is already pre-encrypted is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoPublicKeys`] for mail that is not marked for
    /// encryption, or a [`BuildError`] when the body cannot be encrypted.
    async fn encrypt(&self, mail: OutgoingMail) -> Result<OutgoingMail, BuildError>;

    /// Compile a mail into message bytes and envelope
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] when the mail is invalid or cannot be secured.
    async fn build(&self, mail: OutgoingMail) -> Result<CompiledMessage, BuildError>;
}

//! Canned message builder

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use lettre::address::{Address, Envelope};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{BuildError, IdentityError};
use crate::message::{
    CompiledMessage, IdentityMaterial, MessageBuilder, OutgoingMail, Security, SigningIdentity,
};

#[derive(Debug, Default)]
struct State {
    results: VecDeque<Result<CompiledMessage, BuildError>>,
    identity: VecDeque<Result<SigningIdentity, IdentityError>>,
    built: Vec<OutgoingMail>,
}

/// A [`MessageBuilder`] that returns queued results
///
/// Without a queued result, `build` compiles a plain message whose envelope is
/// taken from the mail's addresses and whose source is
/// `Subject: <subject>\r\n\r\n<text>`. `set_signing_identity` accepts any
/// material unless a failure was queued. `encrypt` reverses the text in place
/// of real ciphertext. Clones share the same state.
#[derive(Debug, Clone)]
pub struct StaticBuilder {
    state: Arc<Mutex<State>>,
    held: Arc<watch::Sender<bool>>,
}

impl Default for StaticBuilder {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            held: Arc::new(watch::channel(false).0),
        }
    }
}

impl StaticBuilder {
    /// Create a builder with no queued results
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `build` calls wait until [`release`](Self::release)
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Let held and future `build` calls finish
    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Queue the result of a future `build` call
    pub fn push_result(&self, result: Result<CompiledMessage, BuildError>) {
        self.state.lock().results.push_back(result);
    }

    /// Queue the result of a future `set_signing_identity` call
    pub fn push_identity(&self, result: Result<SigningIdentity, IdentityError>) {
        self.state.lock().identity.push_back(result);
    }

    /// Mails passed to `build`, in call order
    #[must_use]
    pub fn built(&self) -> Vec<OutgoingMail> {
        self.state.lock().built.clone()
    }

    /// Subjects of the mails passed to `build`, in call order
    #[must_use]
    pub fn built_subjects(&self) -> Vec<String> {
        self.state
            .lock()
            .built
            .iter()
            .map(|outgoing| outgoing.mail.subject.clone().unwrap_or_default())
            .collect()
    }

    /// Compile `outgoing` the way an unscripted `build` call does
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidAddress`] for unparsable addresses and
    /// [`BuildError::NoRecipients`] when the mail has none.
    pub fn compile(outgoing: &OutgoingMail) -> Result<CompiledMessage, BuildError> {
        let mail = &outgoing.mail;
        let from = mail.from.as_deref().map(address).transpose()?;
        let to = mail.recipients().map(address).collect::<Result<Vec<_>, _>>()?;
        let envelope = Envelope::new(from, to).map_err(|_| BuildError::NoRecipients)?;

        let source = format!(
            "Subject: {}\r\n\r\n{}",
            mail.subject.as_deref().unwrap_or_default(),
            mail.text.as_deref().unwrap_or_default()
        );
        Ok(CompiledMessage::new(source, envelope))
    }
}

fn address(value: &str) -> Result<Address, BuildError> {
    value
        .parse()
        .map_err(|_| BuildError::InvalidAddress(value.to_string()))
}

#[async_trait]
impl MessageBuilder for StaticBuilder {
    async fn set_signing_identity(
        &self,
        _material: IdentityMaterial,
    ) -> Result<SigningIdentity, IdentityError> {
        self.state
            .lock()
            .identity
            .pop_front()
            .unwrap_or_else(|| Ok(SigningIdentity::new("STATIC")))
    }

    async fn encrypt(&self, outgoing: OutgoingMail) -> Result<OutgoingMail, BuildError> {
        match outgoing.security {
            Security::Encrypted {
                ref public_keys,
                already_encrypted: false,
            } if !public_keys.is_empty() => {
                let mut mail = outgoing.mail;
                mail.text = mail.text.map(|text| text.chars().rev().collect());
                mail.attachments.clear();
                Ok(OutgoingMail::pre_encrypted(mail))
            }
            Security::Encrypted {
                already_encrypted: true,
                ..
            } => Ok(outgoing),
            _ => Err(BuildError::NoPublicKeys),
        }
    }

    async fn build(&self, mail: OutgoingMail) -> Result<CompiledMessage, BuildError> {
        self.state.lock().built.push(mail.clone());

        let mut held = self.held.subscribe();
        // The sender lives in `self`, so waiting cannot fail.
        let _ = held.wait_for(|held| !*held).await;

        let queued = self.state.lock().results.pop_front();
        queued.unwrap_or_else(|| Self::compile(&mail))
    }
}

//! PGP/MIME message builder
//!
//! Uses `lettre` to assemble RFC 3156 messages:
//! - signed mail becomes `multipart/signed` with a detached
//!   `application/pgp-signature` part
//! - encrypted mail becomes `multipart/encrypted` with the
//!   `application/pgp-encrypted` control part and the armored ciphertext

use async_trait::async_trait;
use lettre::message::{
    header::{ContentType, HeaderName, HeaderValue},
    Attachment as MimeAttachment, Mailbox, Message, MultiPart, SinglePart,
};
use tracing::debug;

use super::{CompiledMessage, Email, IdentityMaterial, MessageBuilder, OutgoingMail, Security, SigningIdentity};
use crate::error::{BuildError, IdentityError};

/// Cryptographic operations used by [`MimeBuilder`]
///
/// Implementations hold the unlocked private key between `unlock` and the
/// `sign`/`encrypt` calls. All payloads are passed as owned, fully formatted
/// MIME entities and results are ASCII-armored.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityProvider: Send + Sync {
    /// Parse and decrypt the private key
    ///
    /// # Errors
    ///
    /// [`IdentityError::InvalidCredential`] or [`IdentityError::WrongPassphrase`].
    async fn unlock(&self, material: IdentityMaterial) -> Result<SigningIdentity, IdentityError>;

    /// Produce a detached, armored signature over `content`
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Security`] if no key is unlocked or signing fails.
    async fn sign(&self, content: Vec<u8>) -> Result<Vec<u8>, BuildError>;

    /// Encrypt `content` for every key in `public_keys`
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Security`] if a key cannot be read or encryption fails.
    async fn encrypt(&self, content: Vec<u8>, public_keys: Vec<String>) -> Result<Vec<u8>, BuildError>;
}

const SIGNATURE_PROTOCOL: &str = "application/pgp-signature";
const ENCRYPTED_PROTOCOL: &str = "application/pgp-encrypted";
const MIC_ALGORITHM: &str = "pgp-sha256";

/// PGP/MIME implementation of [`MessageBuilder`]
#[derive(Debug)]
pub struct MimeBuilder<P> {
    provider: P,
}

impl<P: SecurityProvider> MimeBuilder<P> {
    /// Create a builder around a security provider
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Access the wrapped provider
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    async fn secure_body(&self, mail: &Email, security: &Security) -> Result<MultiPart, BuildError> {
        match security {
            Security::Signed => {
                let content = content_part(mail)?;
                let signature = self.provider.sign(content.formatted()).await?;

                Ok(MultiPart::signed(SIGNATURE_PROTOCOL.to_owned(), MIC_ALGORITHM.to_owned())
                    .multipart(content)
                    .singlepart(
                        SinglePart::builder()
                            .header(content_type("application/pgp-signature; name=\"signature.asc\"")?)
                            .body(signature),
                    ))
            }
            Security::Encrypted {
                public_keys,
                already_encrypted,
            } => {
                let ciphertext = if *already_encrypted {
                    mail.text.clone().unwrap_or_default().into_bytes()
                } else {
                    self.seal(mail, public_keys).await?
                };

                Ok(MultiPart::encrypted(ENCRYPTED_PROTOCOL.to_owned())
                    .singlepart(
                        SinglePart::builder()
                            .header(content_type(ENCRYPTED_PROTOCOL)?)
                            .body(String::from("Version: 1")),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(content_type("application/octet-stream; name=\"encrypted.asc\"")?)
                            .body(ciphertext),
                    ))
            }
        }
    }

    /// Encrypt the cleartext entity of `mail` for `public_keys`
    async fn seal(&self, mail: &Email, public_keys: &[String]) -> Result<Vec<u8>, BuildError> {
        if public_keys.is_empty() {
            return Err(BuildError::NoPublicKeys);
        }
        let content = content_part(mail)?;
        self.provider
            .encrypt(content.formatted(), public_keys.to_vec())
            .await
    }
}

#[async_trait]
impl<P: SecurityProvider> MessageBuilder for MimeBuilder<P> {
    async fn set_signing_identity(
        &self,
        material: IdentityMaterial,
    ) -> Result<SigningIdentity, IdentityError> {
        self.provider.unlock(material).await
    }

    async fn encrypt(&self, outgoing: OutgoingMail) -> Result<OutgoingMail, BuildError> {
        match outgoing.security {
            Security::Encrypted {
                ref public_keys,
                already_encrypted: false,
            } => {
                let ciphertext = self.seal(&outgoing.mail, public_keys).await?;
                let armored = String::from_utf8(ciphertext)
                    .map_err(|_| BuildError::security("ciphertext is not ASCII-armored"))?;

                let mut mail = outgoing.mail;
                mail.text = Some(armored);
                mail.attachments.clear();
                debug!(recipients = mail.recipients().count(), "encrypted mail body");
                Ok(OutgoingMail::pre_encrypted(mail))
            }
            Security::Encrypted { .. } => Ok(outgoing),
            Security::Signed => Err(BuildError::NoPublicKeys),
        }
    }

    async fn build(&self, outgoing: OutgoingMail) -> Result<CompiledMessage, BuildError> {
        let OutgoingMail { mail, security } = outgoing;
        mail.validate()?;

        // Addresses and headers are checked before any key is used.
        let headers = headers(&mail)?;
        let body = self.secure_body(&mail, &security).await?;
        let message = headers
            .multipart(body)
            .map_err(|e| BuildError::mime(e.to_string()))?;

        let raw = message.formatted();
        debug!(size = raw.len(), ?security, "compiled message");
        Ok(CompiledMessage::new(raw, message.envelope().clone()))
    }
}

/// The cleartext entity that gets signed or encrypted
fn content_part(mail: &Email) -> Result<MultiPart, BuildError> {
    let text = mail.text.clone().unwrap_or_default();
    let mut part = MultiPart::mixed().singlepart(SinglePart::plain(text));

    for attachment in &mail.attachments {
        part = part.singlepart(
            MimeAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type(&attachment.mime_type)?),
        );
    }

    Ok(part)
}

fn headers(mail: &Email) -> Result<lettre::message::MessageBuilder, BuildError> {
    let from = mail.from.as_deref().ok_or(BuildError::NoSender)?;
    let mut builder = Message::builder().from(mailbox(from)?);

    for to in &mail.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &mail.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &mail.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    if let Some(subject) = &mail.subject {
        builder = builder.subject(subject.clone());
    }

    for (name, value) in &mail.headers {
        let header = HeaderName::new_from_ascii(name.clone())
            .map_err(|_| BuildError::mime(format!("invalid header name: {name}")))?;
        builder = builder.raw_header(HeaderValue::new(header, value.clone()));
    }

    Ok(builder)
}

fn mailbox(address: &str) -> Result<Mailbox, BuildError> {
    address
        .parse()
        .map_err(|_| BuildError::InvalidAddress(address.to_string()))
}

fn content_type(value: &str) -> Result<ContentType, BuildError> {
    ContentType::parse(value).map_err(|e| BuildError::mime(format!("invalid content type {value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;

    fn email() -> Email {
        Email::new()
            .from("safewithme.testuser@gmail.com")
            .to("the.dude@lebowski.com")
            .bcc("donny@kerabatsos.com")
            .subject("hello")
            .text("body text")
    }

    #[tokio::test]
    async fn test_signed_message_has_detached_signature() {
        let mut provider = MockSecurityProvider::new();
        provider
            .expect_sign()
            .times(1)
            .returning(|_| Ok(b"-----BEGIN PGP SIGNATURE-----".to_vec()));
        provider.expect_encrypt().times(0);

        let builder = MimeBuilder::new(provider);
        let compiled = builder.build(OutgoingMail::signed(email())).await.unwrap();
        let source = compiled.source();

        assert!(source.contains("multipart/signed"));
        assert!(source.contains("application/pgp-signature"));
        assert!(source.contains("BEGIN PGP SIGNATURE"));
        assert!(!source.contains("donny@kerabatsos.com"));
        assert_eq!(compiled.envelope.to().len(), 2);
    }

    #[tokio::test]
    async fn test_encrypted_message_wraps_ciphertext() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_sign().times(0);
        provider
            .expect_encrypt()
            .withf(|_, keys| keys == &vec!["publicA".to_string(), "publicB".to_string()])
            .times(1)
            .returning(|_, _| Ok(b"-----BEGIN PGP MESSAGE-----".to_vec()));

        let builder = MimeBuilder::new(provider);
        let mail = email().attach(Attachment::new("a.txt", b"data".to_vec(), "text/plain"));
        let compiled = builder
            .build(OutgoingMail::encrypted(mail, vec!["publicA".into(), "publicB".into()]))
            .await
            .unwrap();
        let source = compiled.source();

        assert!(source.contains("multipart/encrypted"));
        assert!(source.contains("Version: 1"));
        assert!(source.contains("BEGIN PGP MESSAGE"));
        assert!(!source.contains("body text"));
    }

    #[tokio::test]
    async fn test_pre_encrypted_body_is_not_encrypted_again() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_encrypt().times(0);
        provider.expect_sign().times(0);

        let builder = MimeBuilder::new(provider);
        let mail = email().text("-----BEGIN PGP MESSAGE-----\r\nabc");
        let compiled = builder.build(OutgoingMail::pre_encrypted(mail)).await.unwrap();

        assert!(compiled.source().contains("BEGIN PGP MESSAGE"));
    }

    #[tokio::test]
    async fn test_encryption_without_keys_fails() {
        let builder = MimeBuilder::new(MockSecurityProvider::new());
        let result = builder.build(OutgoingMail::encrypted(email(), Vec::new())).await;

        assert_eq!(result.unwrap_err(), BuildError::NoPublicKeys);
    }

    #[tokio::test]
    async fn test_invalid_address_fails_before_signing() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_sign().times(0);

        let builder = MimeBuilder::new(provider);
        let mail = email().to("not an address");
        let result = builder.build(OutgoingMail::signed(mail)).await;

        assert_eq!(
            result.unwrap_err(),
            BuildError::InvalidAddress("not an address".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalid_cc_fails_before_encrypting() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_encrypt().times(0);

        let builder = MimeBuilder::new(provider);
        let mail = email().cc("walter at sobchak");
        let result = builder
            .build(OutgoingMail::encrypted(mail, vec!["publicA".into()]))
            .await;

        assert_eq!(
            result.unwrap_err(),
            BuildError::InvalidAddress("walter at sobchak".to_string())
        );
    }

    #[tokio::test]
    async fn test_encrypt_replaces_body_with_ciphertext() {
        let mut provider = MockSecurityProvider::new();
        provider
            .expect_encrypt()
            .withf(|content, keys| {
                let content = String::from_utf8_lossy(content);
                content.contains("body text") && content.contains("a.txt") && keys.len() == 1
            })
            .times(1)
            .returning(|_, _| Ok(b"-----BEGIN PGP MESSAGE-----\r\nxyz".to_vec()));

        let builder = MimeBuilder::new(provider);
        let mail = email().attach(Attachment::new("a.txt", b"data".to_vec(), "text/plain"));
        let sealed = builder
            .encrypt(OutgoingMail::encrypted(mail, vec!["publicA".into()]))
            .await
            .unwrap();

        assert_eq!(
            sealed.security,
            Security::Encrypted {
                public_keys: Vec::new(),
                already_encrypted: true,
            }
        );
        assert_eq!(sealed.mail.text.as_deref(), Some("-----BEGIN PGP MESSAGE-----\r\nxyz"));
        assert!(sealed.mail.attachments.is_empty());
        assert_eq!(sealed.mail.subject.as_deref(), Some("hello"));
        assert!(!sealed.security.requires_signing());
    }

    #[tokio::test]
    async fn test_encrypt_leaves_ciphertext_alone() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_encrypt().times(0);

        let builder = MimeBuilder::new(provider);
        let mail = OutgoingMail::pre_encrypted(email().text("-----BEGIN PGP MESSAGE-----"));

        assert_eq!(builder.encrypt(mail.clone()).await.unwrap(), mail);
    }

    #[tokio::test]
    async fn test_encrypt_signed_mail_has_no_keys() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_encrypt().times(0);

        let builder = MimeBuilder::new(provider);
        let result = builder.encrypt(OutgoingMail::signed(email())).await;

        assert_eq!(result.unwrap_err(), BuildError::NoPublicKeys);
    }

    #[tokio::test]
    async fn test_signing_failure_propagates() {
        let mut provider = MockSecurityProvider::new();
        provider
            .expect_sign()
            .returning(|_| Err(BuildError::security("no key unlocked")));

        let builder = MimeBuilder::new(provider);
        let result = builder.build(OutgoingMail::signed(email())).await;

        assert!(matches!(result, Err(BuildError::Security(_))));
    }

    #[tokio::test]
    async fn test_set_signing_identity_delegates_to_provider() {
        let mut provider = MockSecurityProvider::new();
        provider
            .expect_unlock()
            .times(1)
            .returning(|_| Err(IdentityError::WrongPassphrase));

        let builder = MimeBuilder::new(provider);
        let result = builder
            .set_signing_identity(IdentityMaterial::new("key", "wrong"))
            .await;

        assert_eq!(result.unwrap_err(), IdentityError::WrongPassphrase);
    }
}

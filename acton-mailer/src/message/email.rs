//! Outgoing mail payload with fluent API
//!
//! [`OutgoingMail`] is what a caller hands to [`Mailer::send`](crate::Mailer::send):
//! addressing, body, attachments and the security directive the builder must apply.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// A file attached to an outgoing mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name shown to the recipient
    pub filename: String,

    /// Raw attachment bytes
    pub content: Vec<u8>,

    /// MIME type, e.g. `application/pdf`
    pub mime_type: String,
}

impl Attachment {
    /// Create a new attachment
    #[must_use]
    pub fn new(filename: &str, content: Vec<u8>, mime_type: &str) -> Self {
        Self {
            filename: filename.to_string(),
            content,
            mime_type: mime_type.to_string(),
        }
    }
}

/// An email message before it is compiled
///
/// ```rust
/// use acton_mailer::message::Email;
///
/// let email = Email::new()
///     .to("the.dude@lebowski.com")
///     .from("walter@sobchak.com")
///     .subject("League game")
///     .text("Saturday, 8pm.");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Email {
    /// Email sender (From)
    pub from: Option<String>,

    /// Email recipients (To)
    pub to: Vec<String>,

    /// CC recipients
    pub cc: Vec<String>,

    /// BCC recipients
    pub bcc: Vec<String>,

    /// Email subject
    pub subject: Option<String>,

    /// Plain text body, or the armored ciphertext of a pre-encrypted mail
    pub text: Option<String>,

    /// Custom headers
    pub headers: Vec<(String, String)>,

    /// File attachments
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Create a new empty email
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipient (To)
    #[must_use]
    pub fn to(mut self, address: &str) -> Self {
        self.to.push(address.to_string());
        self
    }

    /// Add multiple recipients (To)
    #[must_use]
    pub fn to_multiple(mut self, addresses: &[&str]) -> Self {
        for address in addresses {
            self.to.push((*address).to_string());
        }
        self
    }

    /// Set the sender (From)
    #[must_use]
    pub fn from(mut self, address: &str) -> Self {
        self.from = Some(address.to_string());
        self
    }

    /// Add a CC recipient
    #[must_use]
    pub fn cc(mut self, address: &str) -> Self {
        self.cc.push(address.to_string());
        self
    }

    /// Add a BCC recipient
    #[must_use]
    pub fn bcc(mut self, address: &str) -> Self {
        self.bcc.push(address.to_string());
        self
    }

    /// Set the email subject
    #[must_use]
    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    /// Set the plain text body
    #[must_use]
    pub fn text(mut self, body: &str) -> Self {
        self.text = Some(body.to_string());
        self
    }

    /// Add a custom header
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Add an attachment
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// All envelope recipients (To, CC and BCC) in that order
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }

    /// Validate the email
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoRecipients`] when To, CC and BCC are all empty and
    /// [`BuildError::NoSender`] when no From address is set.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.recipients().next().is_none() {
            return Err(BuildError::NoRecipients);
        }

        if self.from.is_none() {
            return Err(BuildError::NoSender);
        }

        Ok(())
    }
}

/// Security directive applied by the message builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Security {
    /// Sign the cleartext body with the signing identity
    #[default]
    Signed,

    /// Encrypt the body for the given recipients' public keys
    Encrypted {
        /// ASCII-armored public keys of the recipients
        public_keys: Vec<String>,

        /// The body is already ciphertext and only needs wrapping
        #[serde(default)]
        already_encrypted: bool,
    },
}

impl Security {
    /// Whether building under this directive needs an established signing identity
    #[must_use]
    pub const fn requires_signing(&self) -> bool {
        match self {
            Self::Signed => true,
            Self::Encrypted {
                already_encrypted, ..
            } => !*already_encrypted,
        }
    }
}

/// A send request payload: the mail plus its security directive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    /// The mail to compile
    pub mail: Email,

    /// How the body is protected
    #[serde(default)]
    pub security: Security,
}

impl OutgoingMail {
    /// A mail that will be signed and sent in the clear
    #[must_use]
    pub fn signed(mail: Email) -> Self {
        Self {
            mail,
            security: Security::Signed,
        }
    }

    /// A mail that will be encrypted for `public_keys`
    #[must_use]
    pub fn encrypted(mail: Email, public_keys: Vec<String>) -> Self {
        Self {
            mail,
            security: Security::Encrypted {
                public_keys,
                already_encrypted: false,
            },
        }
    }

    /// A mail whose body already holds ciphertext
    #[must_use]
    pub fn pre_encrypted(mail: Email) -> Self {
        Self {
            mail,
            security: Security::Encrypted {
                public_keys: Vec::new(),
                already_encrypted: true,
            },
        }
    }
}

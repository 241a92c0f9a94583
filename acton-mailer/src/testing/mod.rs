//! Testing utilities for acton-mailer applications
//!
//! Deterministic doubles for the dispatcher's collaborators:
//! - [`ScriptedSession`] - a transport session driven step by step through its [`SessionProbe`]
//! - [`StaticBuilder`] - a message builder with canned results
//! - [`RecordingSink`] - an error sink that keeps what it receives
//!
//! # Example
//!
//! ```rust
//! use acton_mailer::dispatch::Mailer;
//! use acton_mailer::message::{Email, OutgoingMail};
//! use acton_mailer::testing::{ScriptedSession, SessionCall, StaticBuilder};
//! use acton_mailer::transport::SessionEvent;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (session, mut probe) = ScriptedSession::new();
//! let mailer = Mailer::builder(StaticBuilder::new(), session).spawn();
//!
//! let email = Email::new().from("a@example.com").to("b@example.com");
//! let _delivery = mailer.send(OutgoingMail::pre_encrypted(email));
//!
//! assert_eq!(probe.next_call().await, Some(SessionCall::Connect));
//! probe.emit(SessionEvent::Idle);
//! # }
//! ```

mod builder;
mod session;
mod sink;

pub use builder::StaticBuilder;
pub use session::{ScriptedSession, SessionCall, SessionProbe};
pub use sink::RecordingSink;

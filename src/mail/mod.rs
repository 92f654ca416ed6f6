//! Outgoing email: composition and delivery.

mod compose;
mod memory;
mod smtp;

pub use compose::{upper_first_letter, EmailComposer};
pub use memory::InMemoryMailbox;
pub use smtp::{SmtpMailTransport, SmtpSettings};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Mail transport error: {0}")]
    Transport(String),
}

/// Delivers a composed email. Calls block until the relay answers.
pub trait MailTransport: Send + Sync {
    fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

//! Outbound mail collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AuthError, Result};

/// Content type used for login code mails.
pub const TEXT_PLAIN: &str = "text/plain";

/// A dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// MIME content type of `body`.
    pub content_type: String,
}

/// Sends messages to users.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    /// Dispatches one message.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Mail`] if the message could not be handed off.
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        content_type: &str,
    ) -> Result<()>;
}

/// In-memory [`MailDispatcher`] that records every message in an outbox.
///
/// Clones share the outbox. [`MemoryMailer::fail_next`] makes the next
/// dispatch fail so callers can exercise their failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    outbox: Arc<Mutex<Vec<Mail>>>,
    fail_next: Arc<Mutex<Option<String>>>,
}

impl MemoryMailer {
    /// Creates a mailer with an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every message sent so far.
    pub fn sent(&self) -> Vec<Mail> {
        self.outbox.lock().clone()
    }

    /// Returns the most recent message addressed to `recipient`.
    pub fn last_to(&self, recipient: &str) -> Option<Mail> {
        self.outbox
            .lock()
            .iter()
            .rev()
            .find(|mail| mail.recipients.iter().any(|r| r == recipient))
            .cloned()
    }

    /// Makes the next [`send`](MailDispatcher::send) fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

#[async_trait]
impl MailDispatcher for MemoryMailer {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        content_type: &str,
    ) -> Result<()> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(AuthError::Mail(reason));
        }
        self.outbox.lock().push(Mail {
            recipients: recipients.to_vec(),
            subject: subject.to_owned(),
            body: body.to_owned(),
            content_type: content_type.to_owned(),
        });
        Ok(())
    }
}

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub link: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail relay failed: {0}")]
    Relay(#[from] reqwest::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Writes mail to the log. Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, link = %email.link, "mail not relayed, logging instead");
        Ok(())
    }
}

/// POSTs each message as JSON to a relay endpoint.
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.client
            .post(&self.url)
            .json(&email)
            .send()
            .await?
            .error_for_status()?;
        info!(to = %email.to, subject = %email.subject, "mail relayed");
        Ok(())
    }
}

/// Keeps sent mail in memory.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The most recent link mailed to `to`.
    pub fn last_link(&self, to: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|email| email.to == to)
            .map(|email| email.link)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(email);
        Ok(())
    }
}

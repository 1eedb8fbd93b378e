//! Outbound transactional email.
//!
//! Requests never send mail themselves. They enqueue an [`OutboundEmail`]
//! keyed by an idempotency key; the [`Dispatcher`] drains the outbox with
//! at-least-once delivery and exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MailConfig;
use crate::store::Store;

pub mod templates;

const CLAIM_BATCH: i64 = 20;
const CLAIM_LEASE_SECS: i64 = 300;
const BASE_BACKOFF_SECS: i64 = 30;

/// A rendered message waiting to be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub idempotency_key: String,
    pub recipient: String,
    pub subject: String,
    pub html: String,
}

/// A message claimed from the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEmail {
    pub id: Uuid,
    pub email: OutboundEmail,
    /// Attempts including the current one.
    pub attempts: i32,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail relay transport error: {0}")]
    Transport(String),

    #[error("mail relay rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, from: &str, email: &OutboundEmail) -> Result<(), MailError>;
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpRelayMailer {
    url: String,
    api_key: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

impl HttpRelayMailer {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, MailError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self { url: url.into(), api_key: api_key.into(), http_client })
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send(&self, from: &str, email: &OutboundEmail) -> Result<(), MailError> {
        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&RelayMessage { from, to: &email.recipient, subject: &email.subject, html: &email.html })
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}

/// Used when no relay is configured: messages are logged and marked sent.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, from: &str, email: &OutboundEmail) -> Result<(), MailError> {
        info!(from, to = %email.recipient, subject = %email.subject, "mail relay not configured, email logged only");
        Ok(())
    }
}

pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>, MailError> {
    Ok(match &config.relay_url {
        Some(url) => Arc::new(HttpRelayMailer::new(url.clone(), config.relay_api_key.clone())?),
        None => Arc::new(LogMailer),
    })
}

/// Delay before attempt `attempts + 1`.
pub fn backoff(attempts: i32) -> chrono::Duration {
    let exp = attempts.clamp(1, 10) - 1;
    chrono::Duration::seconds(BASE_BACKOFF_SECS * (1_i64 << exp))
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    from: String,
    max_attempts: i32,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, config: &MailConfig) -> Self {
        Self {
            store,
            mailer,
            from: format!("\"{}\" <{}>", config.from_name, config.from_email),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Sends every due message once. Returns how many were delivered.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> crate::Result<usize> {
        let lease_until = now + chrono::Duration::seconds(CLAIM_LEASE_SECS);
        let batch = self.store.claim_due_emails(now, lease_until, CLAIM_BATCH).await?;
        let mut delivered = 0;

        for queued in batch {
            match self.mailer.send(&self.from, &queued.email).await {
                Ok(()) => {
                    self.store.mark_email_sent(queued.id, Utc::now()).await?;
                    delivered += 1;
                }
                Err(error) => {
                    let retry_at = (queued.attempts < self.max_attempts).then(|| now + backoff(queued.attempts));
                    warn!(key = %queued.email.idempotency_key, attempts = queued.attempts, %error, gave_up = retry_at.is_none(), "email delivery failed");
                    self.store.mark_email_failed(queued.id, &error.to_string(), retry_at).await?;
                }
            }
        }

        Ok(delivered)
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.dispatch_due(Utc::now()).await {
                        Ok(0) => {}
                        Ok(n) => debug!(delivered = n, "outbox drained"),
                        Err(error) => warn!(%error, "outbox dispatch failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("mail dispatcher stopped");
    }
}

/// Queues a message; failures are logged and never reach the caller.
pub async fn enqueue_best_effort(store: &dyn Store, email: OutboundEmail) {
    match store.enqueue_email(&email).await {
        Ok(true) => debug!(key = %email.idempotency_key, "email queued"),
        Ok(false) => debug!(key = %email.idempotency_key, "email already queued"),
        Err(error) => warn!(key = %email.idempotency_key, %error, "failed to queue email"),
    }
}

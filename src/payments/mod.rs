//! Payment provider interfaces.
//!
//! The store talks to exactly one provider, MTN Mobile Money, through the
//! [`PaymentGateway`] trait so checkout and reconciliation can run against a
//! scripted gateway in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::PaymentOutcome;
use crate::domain::value_objects::{Money, Msisdn};

pub mod momo;

pub use momo::MomoGateway;

/// Errors emitted by payment providers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PaymentError {
    /// Provider settings are missing or malformed.
    #[error("payment configuration error: {0}")]
    Configuration(String),

    /// The credential exchange was refused.
    #[error("payment authentication error: {0}")]
    Authentication(String),

    /// The request never got a response.
    #[error("payment transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("payment provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The provider response could not be decoded.
    #[error("payment parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Parse(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// Transaction state as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Successful,
    Failed,
    Pending,
    Other(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCESSFUL" => Self::Successful,
            "FAILED" => Self::Failed,
            "PENDING" => Self::Pending,
            other => Self::Other(other.to_string()),
        }
    }

    /// Raw provider spelling, echoed back to polling clients.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Pending => "PENDING",
            Self::Other(raw) => raw,
        }
    }

    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match self {
            Self::Successful => Some(PaymentOutcome::Completed),
            Self::Failed => Some(PaymentOutcome::Failed),
            Self::Pending | Self::Other(_) => None,
        }
    }
}

/// A request-to-pay for one checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub payer: Msisdn,
    pub amount: Money,
    /// Correlation id sent to the provider and stored on the order.
    pub reference: String,
}

impl PaymentRequest {
    /// Builds a request with a fresh reference. Two attempts for the same
    /// order always carry different references.
    pub fn new(order_id: Uuid, payer: Msisdn, amount: Money, at: DateTime<Utc>) -> Self {
        Self { order_id, payer, amount, reference: transaction_reference(order_id, at) }
    }
}

pub fn transaction_reference(order_id: Uuid, at: DateTime<Utc>) -> String {
    format!("order_{order_id}_{}", at.timestamp_millis())
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the provider name.
    fn provider_name(&self) -> &'static str;

    /// Submits a request-to-pay to the payer's wallet.
    async fn request_to_pay(&self, request: &PaymentRequest) -> Result<(), PaymentError>;

    /// Looks up the current state of a request-to-pay.
    async fn transaction_status(&self, reference: &str) -> Result<ProviderStatus, PaymentError>;
}

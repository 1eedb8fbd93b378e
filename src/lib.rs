//! MoMo Storefront
//!
//! Storefront and admin back-office service with mobile-money checkout.
//!
//! ## Features
//! - Product catalog browsing and admin product management
//! - Checkout with atomic stock reservation
//! - MTN Mobile Money payment initiation and reconciliation
//! - Server-owned payment deadline sweep
//! - Admin dashboard, analytics and customer listing
//! - Transactional email outbox

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;

pub mod auth;
pub mod config;
pub mod domain;
pub mod http;
pub mod mail;
pub mod payments;
pub mod reports;
pub mod services;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use domain::aggregates::{OrderError, ProductError};
use payments::PaymentError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Payment { context: &'static str, source: PaymentError },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Payment { .. } | Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the caller. Server-side causes stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Payment { context, .. } => (*context).to_string(),
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<OrderError> for StoreError {
    fn from(e: OrderError) -> Self { Self::Validation(e.to_string()) }
}

impl From<ProductError> for StoreError {
    fn from(e: ProductError) -> Self { Self::Validation(e.to_string()) }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "message": self.public_message() }))).into_response()
    }
}

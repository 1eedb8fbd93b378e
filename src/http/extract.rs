//! Extractors that reject with the crate's `{"message"}` error body.

use axum::{
    async_trait,
    extract::{
        rejection::{PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Request,
    },
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::aggregates::ProductDraft;
use crate::services::accounts::{LoginRequest, RegisterRequest};
use crate::services::admin::StatusUpdate;
use crate::services::orders::CreateOrderRequest;
use crate::services::payments::{InitiatePaymentRequest, ProviderCallback};
use crate::StoreError;

/// Message answered with 400 when a body of this type cannot be read.
pub trait BodyRejection {
    const MESSAGE: &'static str;
}

impl BodyRejection for ProductDraft { const MESSAGE: &'static str = "All fields are required"; }
impl BodyRejection for CreateOrderRequest { const MESSAGE: &'static str = "Invalid order data"; }
impl BodyRejection for InitiatePaymentRequest { const MESSAGE: &'static str = "Missing required fields"; }
impl BodyRejection for ProviderCallback { const MESSAGE: &'static str = "Transaction ID is required"; }
impl BodyRejection for StatusUpdate { const MESSAGE: &'static str = "Order status is required"; }
impl BodyRejection for RegisterRequest { const MESSAGE: &'static str = "Missing required fields"; }
impl BodyRejection for LoginRequest { const MESSAGE: &'static str = "Email and password are required"; }

/// JSON body in, JSON body out. Unreadable bodies (missing fields, wrong
/// types, bad syntax or content type) become 400 with the type's message.
pub struct Json<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned + BodyRejection,
    S: Send + Sync,
{
    type Rejection = StoreError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(%rejection, "request body rejected");
                Err(StoreError::validation(T::MESSAGE))
            }
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(StoreError))]
pub struct Path<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(StoreError))]
pub struct Query<T>(pub T);

impl From<PathRejection> for StoreError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(%rejection, "path rejected");
        Self::validation("Invalid id")
    }
}

impl From<QueryRejection> for StoreError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(%rejection, "query rejected");
        Self::validation("Invalid query parameters")
    }
}

//! MTN Mobile Money collection API.
//!
//! Every call performs its own credential exchange; tokens are not cached.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{PaymentError, PaymentGateway, PaymentRequest, ProviderStatus};
use crate::config::MomoConfig;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct MomoGateway {
    config: MomoConfig,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestToPay<'a> {
    amount: String,
    currency: &'a str,
    external_id: &'a str,
    payer: Payer<'a>,
    payer_message: String,
    payee_note: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Payer<'a> {
    party_id_type: &'a str,
    party_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransactionStatusResponse {
    status: String,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> Result<Self, PaymentError> {
        if config.api_url.trim().is_empty() {
            return Err(PaymentError::Configuration("api_url must not be empty".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| PaymentError::Configuration(error.to_string()))?;

        Ok(Self { config, http_client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        let response = self
            .http_client
            .post(self.endpoint("/collection/token/"))
            .basic_auth(&self.config.user_id, Some(&self.config.api_secret))
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Authentication(format!("token exchange returned {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read response body".to_string());
    Err(PaymentError::Rejected { status: status.as_u16(), body })
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn provider_name(&self) -> &'static str {
        "mtn-momo"
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, reference = %request.reference))]
    async fn request_to_pay(&self, request: &PaymentRequest) -> Result<(), PaymentError> {
        let token = self.access_token().await?;
        let body = RequestToPay {
            amount: request.amount.to_string(),
            currency: &self.config.currency,
            external_id: &request.reference,
            payer: Payer { party_id_type: "MSISDN", party_id: request.payer.as_str() },
            payer_message: format!("Payment for order {}", request.order_id),
            payee_note: "MTN Store payment",
        };

        let response = self
            .http_client
            .post(self.endpoint("/collection/v1_0/requesttopay"))
            .bearer_auth(token)
            .header("X-Reference-Id", &request.reference)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        ensure_success(response).await?;
        debug!("request-to-pay accepted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transaction_status(&self, reference: &str) -> Result<ProviderStatus, PaymentError> {
        let token = self.access_token().await?;
        let response = self
            .http_client
            .get(self.endpoint(&format!("/collection/v1_0/requesttopay/{reference}")))
            .bearer_auth(token)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        let payload: TransactionStatusResponse = ensure_success(response).await?.json().await?;
        Ok(ProviderStatus::parse(&payload.status))
    }
}

//! HTTP client for a hosted payment gateway.
//!
//! Endpoint shapes follow the common REST checkout pattern: initialize a
//! transaction, poll its verification state, request a refund. All calls are
//! bearer-authenticated and bounded by a request timeout; a timeout maps to
//! [`GatewayError::Timeout`] so callers can fold it into the ordinary
//! verification-failed path.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::types::{
    InitStatus, PaymentInit, PaymentMetadata, PaymentVerification, RefundOutcome, RefundStatus,
    VerifyStatus, WebhookEvent,
};
use crate::webhook::parse_webhook;
use crate::PaymentGateway;

/// Configuration for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Base URL, e.g. `https://api.gateway.example`.
    pub base_url: String,
    /// Secret API key sent as a bearer token.
    pub secret_key: String,
    /// Shared secret for webhook signatures; None disables verification.
    pub webhook_secret: Option<String>,
    /// Per-request deadline.
    pub timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            webhook_secret: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Payment gateway client over HTTPS.
pub struct HttpGateway {
    client: Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

/// Transaction ids are gateway-issued opaque tokens; anything outside this
/// shape is malformed and reports as a failed verification, not an error.
fn is_plausible_transaction_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn map_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

// ── Wire DTOs ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct InitializeRequest<'a> {
    amount_minor: i64,
    currency: &'a str,
    metadata: &'a PaymentMetadata,
}

#[derive(Deserialize)]
struct InitializeResponse {
    transaction_id: String,
    status: String,
    checkout_url: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    transaction_id: String,
    status: String,
    payment_method: Option<String>,
}

#[derive(Serialize)]
struct RefundRequest<'a> {
    amount_minor: i64,
    reason: &'a str,
}

#[derive(Deserialize)]
struct RefundResponse {
    refund_id: Option<String>,
    status: String,
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initialize(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentInit, GatewayError> {
        // Zero-amount short-circuit: settled, no checkout, no network call.
        if amount_minor == 0 {
            return Ok(PaymentInit {
                transaction_id: format!("free_{}", metadata.enrollment_id),
                status: InitStatus::Completed,
                amount_minor: 0,
                currency: currency.to_string(),
                checkout_url: None,
                expires_at: None,
            });
        }

        let response = self
            .client
            .post(self.url("/v1/transactions/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&InitializeRequest {
                amount_minor,
                currency,
                metadata,
            })
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body: InitializeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        tracing::debug!(
            transaction = %body.transaction_id,
            amount_minor,
            "gateway transaction initialized"
        );

        Ok(PaymentInit {
            status: if body.status == "completed" {
                InitStatus::Completed
            } else {
                InitStatus::Pending
            },
            transaction_id: body.transaction_id,
            amount_minor,
            currency: currency.to_string(),
            checkout_url: body.checkout_url,
            expires_at: body.expires_at,
        })
    }

    async fn verify(&self, transaction_id: &str) -> Result<PaymentVerification, GatewayError> {
        if !is_plausible_transaction_id(transaction_id) {
            return Ok(PaymentVerification {
                transaction_id: transaction_id.to_string(),
                status: VerifyStatus::Failed,
                payment_method: None,
            });
        }

        let response = self
            .client
            .get(self.url(&format!("/v1/transactions/{transaction_id}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_client_error() {
            // Unknown or rejected transaction: a failed verification, not a fault.
            return Ok(PaymentVerification {
                transaction_id: transaction_id.to_string(),
                status: VerifyStatus::Failed,
                payment_method: None,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(PaymentVerification {
            status: if body.status == "completed" {
                VerifyStatus::Completed
            } else {
                VerifyStatus::Failed
            },
            transaction_id: body.transaction_id,
            payment_method: body.payment_method,
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<RefundOutcome, GatewayError> {
        // Zero-amount short-circuit.
        if amount_minor == 0 {
            return Ok(RefundOutcome {
                refund_id: None,
                status: RefundStatus::NotRequired,
                processed_at: Utc::now(),
            });
        }

        let response = self
            .client
            .post(self.url(&format!("/v1/transactions/{transaction_id}/refund")))
            .bearer_auth(&self.config.secret_key)
            .json(&RefundRequest {
                amount_minor,
                reason,
            })
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body: RefundResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        tracing::info!(
            transaction = %transaction_id,
            amount_minor,
            "gateway refund processed"
        );

        Ok(RefundOutcome {
            refund_id: body.refund_id,
            status: if body.status == "not_required" {
                RefundStatus::NotRequired
            } else {
                RefundStatus::Completed
            },
            processed_at: Utc::now(),
        })
    }

    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, GatewayError> {
        parse_webhook(payload, signature, self.config.webhook_secret.as_deref())
    }
}

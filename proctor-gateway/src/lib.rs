//! Payment gateway collaborator for the proctor enrollment engine.
//!
//! The enrollment service consumes the [`PaymentGateway`] trait and nothing
//! else: initialize a transaction, verify its settlement, refund it, and
//! normalize inbound webhook deliveries. [`HttpGateway`] speaks to a real
//! gateway over HTTPS; [`MockGateway`] backs tests and dev mode.

pub mod error;
pub mod http;
pub mod mock;
pub mod types;
pub mod webhook;

use async_trait::async_trait;

pub use error::GatewayError;
pub use http::{HttpGateway, HttpGatewayConfig};
pub use mock::MockGateway;
pub use types::{
    InitStatus, PaymentInit, PaymentMetadata, PaymentVerification, RefundOutcome, RefundStatus,
    VerifyStatus, WebhookEvent, WebhookEventKind,
};

/// The three-operation payment contract plus webhook normalization.
///
/// Implementations must uphold the zero-amount short-circuits: an
/// `initialize` of 0 settles immediately with no checkout URL, and a
/// `refund` of 0 reports `not_required`. Neither makes a network call.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a gateway transaction for the given amount in minor units.
    async fn initialize(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentInit, GatewayError>;

    /// Check whether a transaction has settled.
    ///
    /// Malformed or unknown transaction ids report [`VerifyStatus::Failed`];
    /// only transport-level problems surface as errors.
    async fn verify(&self, transaction_id: &str) -> Result<PaymentVerification, GatewayError>;

    /// Return a settled payment.
    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<RefundOutcome, GatewayError>;

    /// Validate and normalize an inbound webhook delivery.
    ///
    /// Signature verification happens here, not at the HTTP router.
    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, GatewayError>;
}

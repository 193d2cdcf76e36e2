//! In-memory gateway for tests and dev mode.
//!
//! Records every call and lets tests script verification outcomes per
//! transaction, force timeouts, and fail refunds.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::GatewayError;
use crate::types::{
    InitStatus, PaymentInit, PaymentMetadata, PaymentVerification, RefundOutcome, RefundStatus,
    VerifyStatus, WebhookEvent,
};
use crate::webhook::parse_webhook;
use crate::PaymentGateway;

/// A recorded `initialize` call.
#[derive(Debug, Clone)]
pub struct InitCall {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: PaymentMetadata,
    pub transaction_id: String,
}

/// A recorded `refund` call.
#[derive(Debug, Clone)]
pub struct RefundCall {
    pub transaction_id: String,
    pub amount_minor: i64,
    pub reason: String,
}

#[derive(Default)]
struct State {
    counter: u64,
    init_calls: Vec<InitCall>,
    refund_calls: Vec<RefundCall>,
    verify_outcomes: HashMap<String, VerifyStatus>,
    timeout_on_verify: bool,
    fail_initialize: bool,
    fail_refund: bool,
}

/// Scriptable in-memory [`PaymentGateway`].
///
/// Unscripted transactions verify as `completed`, so happy paths need no
/// setup.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<State>,
    webhook_secret: Option<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require webhook deliveries to carry a valid signature.
    pub fn with_webhook_secret(secret: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            webhook_secret: Some(secret.into()),
        }
    }

    /// Script the verification outcome for one transaction id.
    pub fn set_verify_outcome(&self, transaction_id: impl Into<String>, status: VerifyStatus) {
        self.state
            .lock()
            .unwrap()
            .verify_outcomes
            .insert(transaction_id.into(), status);
    }

    /// Make every subsequent `verify` time out.
    pub fn set_timeout_on_verify(&self, timeout: bool) {
        self.state.lock().unwrap().timeout_on_verify = timeout;
    }

    /// Make every subsequent `initialize` fail at the gateway.
    pub fn set_fail_initialize(&self, fail: bool) {
        self.state.lock().unwrap().fail_initialize = fail;
    }

    /// Make every subsequent `refund` fail at the gateway.
    pub fn set_fail_refund(&self, fail: bool) {
        self.state.lock().unwrap().fail_refund = fail;
    }

    /// All `initialize` calls made so far.
    pub fn init_calls(&self) -> Vec<InitCall> {
        self.state.lock().unwrap().init_calls.clone()
    }

    /// All `refund` calls made so far.
    pub fn refund_calls(&self) -> Vec<RefundCall> {
        self.state.lock().unwrap().refund_calls.clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentInit, GatewayError> {
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

        let mut state = self.state.lock().unwrap();
        if state.fail_initialize {
            return Err(GatewayError::Service {
                status: 503,
                message: "gateway unavailable".to_string(),
            });
        }
        state.counter += 1;
        let transaction_id = format!("mock_txn_{}", state.counter);
        state.init_calls.push(InitCall {
            amount_minor,
            currency: currency.to_string(),
            metadata: metadata.clone(),
            transaction_id: transaction_id.clone(),
        });

        Ok(PaymentInit {
            checkout_url: Some(format!("https://checkout.mock/{transaction_id}")),
            transaction_id,
            status: InitStatus::Pending,
            amount_minor,
            currency: currency.to_string(),
            expires_at: None,
        })
    }

    async fn verify(&self, transaction_id: &str) -> Result<PaymentVerification, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.timeout_on_verify {
            return Err(GatewayError::Timeout);
        }
        let status = state
            .verify_outcomes
            .get(transaction_id)
            .copied()
            .unwrap_or(VerifyStatus::Completed);

        Ok(PaymentVerification {
            transaction_id: transaction_id.to_string(),
            status,
            payment_method: Some("card".to_string()),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<RefundOutcome, GatewayError> {
        if amount_minor == 0 {
            return Ok(RefundOutcome {
                refund_id: None,
                status: RefundStatus::NotRequired,
                processed_at: Utc::now(),
            });
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_refund {
            return Err(GatewayError::Service {
                status: 502,
                message: "refund processor unavailable".to_string(),
            });
        }
        state.refund_calls.push(RefundCall {
            transaction_id: transaction_id.to_string(),
            amount_minor,
            reason: reason.to_string(),
        });

        Ok(RefundOutcome {
            refund_id: Some(format!("re_{transaction_id}")),
            status: RefundStatus::Completed,
            processed_at: Utc::now(),
        })
    }

    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, GatewayError> {
        parse_webhook(payload, signature, self.webhook_secret.as_deref())
    }
}

//! Webhook payload normalization and signature verification.
//!
//! Deliveries carry an HMAC-SHA256 hex digest of the raw body. Verification
//! uses a constant-time comparison so the check leaks nothing about how far
//! a forged digest matched.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::GatewayError;
use crate::types::{WebhookEvent, WebhookEventKind};

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex HMAC-SHA256 digest of a payload.
///
/// Used by tests and by gateways simulating deliveries; the inbound path
/// only verifies.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 digest against a payload, in constant time.
pub fn verify_signature(payload: &[u8], provided: &str, secret: &str) -> bool {
    let Ok(provided_bytes) = hex::decode(provided.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    provided_bytes.len() == expected.len()
        && bool::from(provided_bytes.as_slice().ct_eq(expected.as_slice()))
}

/// Raw webhook body shape. Gateways deliver more fields; only these matter.
#[derive(Debug, Deserialize)]
struct RawWebhook {
    event: Option<String>,
    #[serde(alias = "transactionId", alias = "reference")]
    transaction_id: Option<String>,
}

/// Validate signature (when a secret is configured) and normalize the body
/// into a [`WebhookEvent`].
pub fn parse_webhook(
    payload: &[u8],
    signature: Option<&str>,
    secret: Option<&str>,
) -> Result<WebhookEvent, GatewayError> {
    if let Some(secret) = secret {
        let provided = signature.ok_or(GatewayError::InvalidSignature)?;
        if !verify_signature(payload, provided, secret) {
            return Err(GatewayError::InvalidSignature);
        }
    }

    let raw: RawWebhook = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::InvalidPayload(format!("not a JSON event: {e}")))?;

    let event = match raw.event {
        Some(name) if !name.is_empty() => name,
        _ => return Err(GatewayError::InvalidPayload("missing event field".into())),
    };
    let transaction_id = match raw.transaction_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(GatewayError::InvalidPayload(
                "missing transaction reference".into(),
            ))
        }
    };

    Ok(WebhookEvent {
        kind: classify_event(&event),
        event,
        transaction_id,
        processed_at: Utc::now(),
    })
}

/// Map raw gateway event names onto the kinds this engine acts on.
fn classify_event(event: &str) -> WebhookEventKind {
    match event {
        "payment.completed" | "charge.success" | "transaction.completed" => {
            WebhookEventKind::PaymentCompleted
        }
        "payment.failed" | "charge.failed" => WebhookEventKind::PaymentFailed,
        other => WebhookEventKind::Other(other.to_string()),
    }
}

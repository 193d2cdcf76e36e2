//! Webhook intake surface.
//!
//! The enrollment API proper is invoked in-process by the encompassing
//! system; the only inbound HTTP here is the gateway's asynchronous delivery
//! channel, which is unauthenticated by design: the payload signature is
//! verified inside the gateway abstraction, not by router middleware.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::services::{EnrollmentService, ErrorKind, WebhookDisposition, WebhookRateLimiter};

/// Header carrying the gateway's HMAC digest of the body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Shared state for the intake router.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EnrollmentService>,
    pub limiter: WebhookRateLimiter,
}

/// Build the intake router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/payments/webhook", post(handle_webhook))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    if state.limiter.check().is_err() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"status": "rate_limited"})),
        );
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.service.handle_payment_webhook(&body, signature).await {
        Ok(disposition) => {
            let label = match disposition {
                WebhookDisposition::Completed { .. } => "completed",
                WebhookDisposition::AlreadyCompleted => "already_completed",
                WebhookDisposition::Ignored => "ignored",
            };
            (
                StatusCode::OK,
                Json(json!({"status": "ok", "disposition": label})),
            )
        }
        Err(err) if err.kind() == ErrorKind::Validation => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "rejected", "error": err.to_string()})),
        ),
        Err(err) => {
            tracing::error!(error = %err, "webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            )
        }
    }
}

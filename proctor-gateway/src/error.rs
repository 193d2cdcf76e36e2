//! Gateway error type.

/// Errors surfaced by payment gateway implementations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway did not answer within the configured deadline.
    /// Callers treat this as a verification failure, never a crash.
    #[error("gateway request timed out")]
    Timeout,

    /// Connection-level failure (DNS, TLS, refused, reset).
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered with an unexpected status.
    #[error("gateway rejected request: HTTP {status}: {message}")]
    Service { status: u16, message: String },

    /// The gateway's answer could not be decoded.
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),

    /// Webhook signature missing or wrong.
    #[error("webhook signature verification failed")]
    InvalidSignature,

    /// Webhook body is not a usable event.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

impl GatewayError {
    /// Returns true if the failure came from the inbound webhook path and is
    /// the sender's fault (4xx-equivalent) rather than the gateway's.
    pub fn is_webhook_rejection(&self) -> bool {
        matches!(self, Self::InvalidSignature | Self::InvalidPayload(_))
    }
}

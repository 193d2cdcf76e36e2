//! Wire types for the payment gateway contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use proctor_core::{EnrollmentId, ExamId, StudentId};

/// Metadata attached to every gateway transaction so webhook deliveries and
/// gateway dashboards can be traced back to the enrollment that created them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub enrollment_id: EnrollmentId,
    pub exam_id: ExamId,
    pub student_id: StudentId,
    /// Transaction kind tag, e.g. `"exam_enrollment"`.
    pub kind: String,
}

impl PaymentMetadata {
    pub fn enrollment(
        enrollment_id: EnrollmentId,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Self {
        Self {
            enrollment_id,
            exam_id,
            student_id,
            kind: "exam_enrollment".to_string(),
        }
    }
}

/// Status of a freshly initialized transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    /// Awaiting settlement (the normal case).
    Pending,
    /// Settled immediately (zero-amount short-circuit).
    Completed,
}

/// Result of [`initialize`](crate::PaymentGateway::initialize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInit {
    pub transaction_id: String,
    pub status: InitStatus,
    /// Amount echoed back, minor units.
    pub amount_minor: i64,
    pub currency: String,
    /// Hosted checkout page; absent for zero-amount transactions.
    pub checkout_url: Option<String>,
    /// Unix seconds after which the transaction lapses at the gateway.
    pub expires_at: Option<i64>,
}

/// Verification outcome for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Completed,
    Failed,
}

/// Result of [`verify`](crate::PaymentGateway::verify).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub transaction_id: String,
    pub status: VerifyStatus,
    /// Settlement instrument reported by the gateway, e.g. `"card"`.
    pub payment_method: Option<String>,
}

impl PaymentVerification {
    pub fn is_completed(&self) -> bool {
        self.status == VerifyStatus::Completed
    }
}

/// Status of a refund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Completed,
    /// Nothing to return (zero-amount short-circuit).
    NotRequired,
}

/// Result of [`refund`](crate::PaymentGateway::refund).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund_id: Option<String>,
    pub status: RefundStatus,
    pub processed_at: DateTime<Utc>,
}

/// Normalized kind of a webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    /// A transaction settled.
    PaymentCompleted,
    /// A settlement attempt failed.
    PaymentFailed,
    /// Anything this engine does not act on.
    Other(String),
}

/// A validated, normalized webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    /// Raw event name as delivered, e.g. `"payment.completed"`.
    pub event: String,
    pub transaction_id: String,
    pub processed_at: DateTime<Utc>,
}

//! Enrollment record and its status machines.

use serde::{Deserialize, Serialize};

use crate::identity::{CenterId, EnrollmentId, ExamId, StudentId};

/// Number of hex characters in an access code.
pub const ACCESS_CODE_LEN: usize = 12;

// ============================================================================
// Status Enums
// ============================================================================

/// Lifecycle status of an enrollment.
///
/// `Cancelled` is terminal: no transition ever leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    /// Admitted, awaiting payment settlement.
    PaymentPending,
    /// Fully admitted; the access code is redeemable once payment settles.
    Enrolled,
    /// Withdrawn by the owning center. Terminal.
    Cancelled,
}

impl EnrollmentStatus {
    /// Returns true if the enrollment still holds a seat (counts toward the
    /// exam's enrollment cap).
    pub fn holds_seat(&self) -> bool {
        matches!(self, Self::PaymentPending | Self::Enrolled)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentPending => "payment_pending",
            Self::Enrolled => "enrolled",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment_pending" => Some(Self::PaymentPending),
            "enrolled" => Some(Self::Enrolled),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Settlement status of the enrollment fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// A gateway transaction is expected or in flight.
    Pending,
    /// The fee has settled.
    Completed,
    /// The last verification attempt failed; retryable.
    Failed,
    /// The fee was returned on cancellation.
    Refunded,
    /// No fee was ever owed.
    NotRequired,
}

impl PaymentStatus {
    /// Returns true if the fee is settled (nothing further owed).
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::NotRequired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::NotRequired => "not_required",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            "not_required" => Some(Self::NotRequired),
            _ => None,
        }
    }
}

// ============================================================================
// Enrollment Record
// ============================================================================

/// A student's admission record for one exam.
///
/// Created by `enroll`, mutated by payment settlement, redemption and
/// cancellation, never physically deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub exam_id: ExamId,
    pub student_id: StudentId,
    /// Owning center of the exam, denormalized at creation.
    pub center_id: CenterId,
    /// Single-use 12-hex-character credential gating test start.
    pub access_code: String,
    pub access_code_used: bool,
    /// Unix seconds; set exactly once, when the code is redeemed.
    pub access_code_used_at: Option<i64>,
    pub enrollment_status: EnrollmentStatus,
    pub payment_status: PaymentStatus,
    /// Fee captured at enrollment time, in minor currency units.
    pub payment_amount: i64,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    /// Optional redemption deadline (unix seconds).
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Enrollment {
    /// Build a fresh admission record. Statuses are derived from the fee:
    /// a zero fee settles immediately, anything else awaits payment.
    #[allow(clippy::too_many_arguments)]
    pub fn admit(
        exam_id: ExamId,
        student_id: StudentId,
        center_id: CenterId,
        access_code: String,
        fee_minor: i64,
        notes: Option<String>,
        expires_at: Option<i64>,
        now: i64,
    ) -> Self {
        let (enrollment_status, payment_status) = if fee_minor == 0 {
            (EnrollmentStatus::Enrolled, PaymentStatus::Completed)
        } else {
            (EnrollmentStatus::PaymentPending, PaymentStatus::Pending)
        };

        Self {
            id: EnrollmentId::new(),
            exam_id,
            student_id,
            center_id,
            access_code,
            access_code_used: false,
            access_code_used_at: None,
            enrollment_status,
            payment_status,
            payment_amount: fee_minor,
            payment_method: None,
            transaction_id: None,
            payment_reference: None,
            notes,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the code is past its redemption deadline.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_str_roundtrip() {
        for status in [
            EnrollmentStatus::PaymentPending,
            EnrollmentStatus::Enrolled,
            EnrollmentStatus::Cancelled,
        ] {
            assert_eq!(EnrollmentStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::NotRequired,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn status_serde_matches_str() {
        assert_eq!(
            serde_json::to_string(&EnrollmentStatus::PaymentPending).unwrap(),
            r#""payment_pending""#
        );
        assert_eq!(
            serde_json::to_string(&PaymentStatus::NotRequired).unwrap(),
            r#""not_required""#
        );
    }

    #[test]
    fn seat_holding() {
        assert!(EnrollmentStatus::PaymentPending.holds_seat());
        assert!(EnrollmentStatus::Enrolled.holds_seat());
        assert!(!EnrollmentStatus::Cancelled.holds_seat());
    }

    #[test]
    fn zero_fee_settles_at_admission() {
        let e = Enrollment::admit(
            ExamId::new(),
            StudentId::new(),
            CenterId::new(),
            "a1b2c3d4e5f6".into(),
            0,
            None,
            None,
            1_700_000_000,
        );
        assert_eq!(e.enrollment_status, EnrollmentStatus::Enrolled);
        assert_eq!(e.payment_status, PaymentStatus::Completed);
        assert!(!e.access_code_used);
    }

    #[test]
    fn nonzero_fee_awaits_payment() {
        let e = Enrollment::admit(
            ExamId::new(),
            StudentId::new(),
            CenterId::new(),
            "a1b2c3d4e5f6".into(),
            5_000,
            Some("front row".into()),
            None,
            1_700_000_000,
        );
        assert_eq!(e.enrollment_status, EnrollmentStatus::PaymentPending);
        assert_eq!(e.payment_status, PaymentStatus::Pending);
        assert_eq!(e.payment_amount, 5_000);
        assert!(e.transaction_id.is_none());
    }

    #[test]
    fn expiry_check() {
        let mut e = Enrollment::admit(
            ExamId::new(),
            StudentId::new(),
            CenterId::new(),
            "a1b2c3d4e5f6".into(),
            0,
            None,
            Some(1_000),
            500,
        );
        assert!(!e.is_expired(999));
        assert!(!e.is_expired(1_000));
        assert!(e.is_expired(1_001));
        e.expires_at = None;
        assert!(!e.is_expired(i64::MAX));
    }
}

//! Enrollment state machine.
//!
//! One service instance per process, constructed with injected ledger and
//! gateway handles. Every transition that two writers could race (direct
//! verification vs. webhook, duplicate admissions, redemption, cancellation)
//! is a conditional write at the storage layer; this module sequences the
//! checks and translates conflicts into the error taxonomy.

use std::sync::Arc;

use proctor_core::{
    CenterId, Enrollment, EnrollmentId, EnrollmentStatus, ExamId, ExamRecord, PaymentStatus, Role,
    StudentId,
};
use proctor_gateway::{PaymentGateway, PaymentInit, PaymentMetadata, WebhookEventKind};

use crate::ledger::{current_timestamp, EnrollmentLedger, LedgerError};
use crate::services::access_code::{self, AccessCodeIssuer};
use crate::services::stats::StatsAggregator;

// ============================================================================
// Errors
// ============================================================================

/// Broad failure class, for mapping onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Authorization,
    Upstream,
    Exhaustion,
    Internal,
}

/// Failures surfaced by enrollment operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("exam not found")]
    ExamNotFound,
    #[error("student account not found")]
    StudentNotFound,
    #[error("enrollment not found")]
    EnrollmentNotFound,

    #[error("exam is not open for enrollment")]
    EnrollmentClosed,
    #[error("enrollment is not enabled for this exam")]
    EnrollmentNotEnabled,
    #[error("invalid enrollment configuration: {0}")]
    InvalidConfig(String),
    #[error("enrollment deadline has passed")]
    DeadlinePassed,
    #[error("maximum enrollment limit reached")]
    CapacityReached,
    #[error("account is not a student")]
    NotAStudent,
    #[error("student belongs to a different center")]
    WrongCenter,

    #[error("student is already enrolled")]
    AlreadyEnrolled,
    #[error("enrollment is already cancelled")]
    AlreadyCancelled,
    #[error("payment has already been completed")]
    PaymentAlreadyCompleted,
    #[error("no transaction reference on record")]
    MissingTransaction,

    #[error("payment initialization failed: {0}")]
    PaymentInitFailed(String),
    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),
    #[error("refund failed: {0}")]
    RefundFailed(String),

    #[error("invalid access code")]
    AccessCodeInvalid,
    #[error("enrollment is not active")]
    EnrollmentNotActive,
    #[error("payment has not been completed")]
    PaymentIncomplete,
    #[error("access code has already been used")]
    AccessCodeUsed,
    #[error("exam is not currently startable")]
    ExamNotStartable,
    #[error("access code has expired")]
    AccessCodeExpired,

    #[error("only the owning center may cancel an enrollment")]
    NotExamOwner,
    #[error("webhook rejected: {0}")]
    WebhookRejected(String),

    #[error("access code generation exhausted after {0} attempts")]
    AccessCodesExhausted(u32),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EnrollmentError {
    /// Map each failure onto its class.
    pub fn kind(&self) -> ErrorKind {
        use EnrollmentError::*;
        match self {
            ExamNotFound | StudentNotFound | EnrollmentNotFound => ErrorKind::NotFound,
            EnrollmentNotEnabled | InvalidConfig(_) | NotAStudent | MissingTransaction
            | WebhookRejected(_) => ErrorKind::Validation,
            EnrollmentClosed | DeadlinePassed | CapacityReached | AlreadyEnrolled
            | AlreadyCancelled | PaymentAlreadyCompleted | EnrollmentNotActive
            | PaymentIncomplete | AccessCodeUsed | ExamNotStartable | AccessCodeExpired => {
                ErrorKind::Conflict
            }
            WrongCenter | NotExamOwner | AccessCodeInvalid => ErrorKind::Authorization,
            PaymentInitFailed(_) | PaymentVerificationFailed(_) | RefundFailed(_) => {
                ErrorKind::Upstream
            }
            AccessCodesExhausted(_) => ErrorKind::Exhaustion,
            Ledger(LedgerError::DuplicateEnrollment) => ErrorKind::Conflict,
            Ledger(LedgerError::DuplicateAccessCode) => ErrorKind::Conflict,
            Ledger(LedgerError::Database(_)) => ErrorKind::Internal,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of `enroll`: the record plus checkout details when a payment is due.
#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
    pub enrollment: Enrollment,
    /// None when no payment was needed or payment is collected out of band.
    pub payment: Option<PaymentInit>,
}

/// Result of `cancel`: the record plus the refund, when one was issued.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub enrollment: Enrollment,
    pub refund: Option<proctor_gateway::RefundOutcome>,
}

/// What a webhook delivery amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// The delivery settled a payment.
    Completed { enrollment_id: EnrollmentId },
    /// The payment was already settled; delivery was a no-op.
    AlreadyCompleted,
    /// Unknown transaction, irrelevant event kind, or a lost race.
    Ignored,
}

// ============================================================================
// Service
// ============================================================================

/// The enrollment workflow engine.
pub struct EnrollmentService {
    ledger: Arc<EnrollmentLedger>,
    gateway: Arc<dyn PaymentGateway>,
    stats: StatsAggregator,
    issuer: AccessCodeIssuer,
    currency: String,
}

impl EnrollmentService {
    pub fn new(
        ledger: Arc<EnrollmentLedger>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            stats: StatsAggregator::new(ledger.clone()),
            ledger,
            gateway,
            issuer: AccessCodeIssuer::default(),
            currency: currency.into(),
        }
    }

    /// Override the access code issuer (retry bound).
    pub fn with_issuer(mut self, issuer: AccessCodeIssuer) -> Self {
        self.issuer = issuer;
        self
    }

    // =========================================================================
    // enroll
    // =========================================================================

    /// Admit a student into an exam.
    pub async fn enroll(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        notes: Option<String>,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let exam = self
            .ledger
            .exam(exam_id)
            .await?
            .ok_or(EnrollmentError::ExamNotFound)?;
        if !exam.is_enrollment_open() {
            return Err(EnrollmentError::EnrollmentClosed);
        }
        if !exam.enrollment.enrollment_required {
            return Err(EnrollmentError::EnrollmentNotEnabled);
        }
        if exam.enrollment.fee_minor < 0 {
            return Err(EnrollmentError::InvalidConfig("negative fee".into()));
        }

        let now = current_timestamp();
        if exam.enrollment.deadline_closed(now) {
            return Err(EnrollmentError::DeadlinePassed);
        }
        if exam.enrollment.max_enrollments > 0 {
            let seated = self.ledger.count_seated(exam_id).await?;
            if seated >= exam.enrollment.max_enrollments {
                return Err(EnrollmentError::CapacityReached);
            }
        }

        let student = self
            .ledger
            .student(student_id)
            .await?
            .ok_or(EnrollmentError::StudentNotFound)?;
        if student.role != Role::Student {
            return Err(EnrollmentError::NotAStudent);
        }
        if student.center_id != exam.center_id {
            return Err(EnrollmentError::WrongCenter);
        }

        // Idempotent continuation: a live record short-circuits admission.
        if let Some(existing) = self.ledger.find_active(exam_id, student_id).await? {
            return match existing.enrollment_status {
                EnrollmentStatus::Enrolled => Err(EnrollmentError::AlreadyEnrolled),
                EnrollmentStatus::PaymentPending => self.resume_pending(existing, &exam).await,
                // find_active filters cancelled rows; defensive arm only.
                EnrollmentStatus::Cancelled => Err(EnrollmentError::AlreadyEnrolled),
            };
        }

        self.fresh_admission(&exam, student_id, notes, now).await
    }

    /// Pick up a payment-pending enrollment instead of duplicating it,
    /// initializing a gateway transaction if one was never started.
    async fn resume_pending(
        &self,
        existing: Enrollment,
        exam: &ExamRecord,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        if let Some(transaction_id) = existing.transaction_id.clone() {
            let payment = PaymentInit {
                transaction_id,
                status: proctor_gateway::InitStatus::Pending,
                amount_minor: existing.payment_amount,
                currency: self.currency.clone(),
                checkout_url: None,
                expires_at: existing.expires_at,
            };
            return Ok(EnrollmentOutcome {
                enrollment: existing,
                payment: Some(payment),
            });
        }

        if existing.payment_amount > 0 && exam.enrollment.require_payment {
            let init = self.initialize_payment(&existing).await?;
            let enrollment = self
                .ledger
                .find(existing.id)
                .await?
                .ok_or(EnrollmentError::EnrollmentNotFound)?;
            return Ok(EnrollmentOutcome {
                enrollment,
                payment: Some(init),
            });
        }

        Ok(EnrollmentOutcome {
            enrollment: existing,
            payment: None,
        })
    }

    async fn fresh_admission(
        &self,
        exam: &ExamRecord,
        student_id: StudentId,
        notes: Option<String>,
        now: i64,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let fee = exam.enrollment.fee_minor;

        // Optimistic insert: the access-code unique index arbitrates
        // collisions, the partial (exam, student) index arbitrates racing
        // duplicate admissions.
        let mut attempts = 0;
        let mut enrollment = loop {
            if attempts >= self.issuer.max_attempts() {
                tracing::error!(
                    exam = %exam.id,
                    attempts,
                    "access code space exhausted, admission aborted"
                );
                return Err(EnrollmentError::AccessCodesExhausted(attempts));
            }
            attempts += 1;

            let code = self.issuer.generate();
            let candidate = Enrollment::admit(
                exam.id,
                student_id,
                exam.center_id,
                code,
                fee,
                notes.clone(),
                exam.ends_at,
                now,
            );
            match self.ledger.insert_enrollment(&candidate).await {
                Ok(()) => break candidate,
                Err(LedgerError::DuplicateAccessCode) => continue,
                Err(LedgerError::DuplicateEnrollment) => {
                    return Err(EnrollmentError::AlreadyEnrolled)
                }
                Err(err) => return Err(err.into()),
            }
        };

        tracing::info!(
            enrollment = %enrollment.id,
            exam = %exam.id,
            student = %student_id,
            fee_minor = fee,
            "student admitted"
        );

        let payment = if fee > 0 && exam.enrollment.require_payment {
            match self.initialize_payment(&enrollment).await {
                Ok(init) => {
                    enrollment.transaction_id = Some(init.transaction_id.clone());
                    enrollment.payment_reference = Some(payment_reference(enrollment.id));
                    Some(init)
                }
                Err(err) => {
                    // The admission is already durable; a later enroll call
                    // performs the lazy initialization.
                    self.stats.refresh(exam.id).await;
                    return Err(err);
                }
            }
        } else {
            None
        };

        self.stats.refresh(exam.id).await;

        Ok(EnrollmentOutcome {
            enrollment,
            payment,
        })
    }

    async fn initialize_payment(
        &self,
        enrollment: &Enrollment,
    ) -> Result<PaymentInit, EnrollmentError> {
        let metadata = PaymentMetadata::enrollment(
            enrollment.id,
            enrollment.exam_id,
            enrollment.student_id,
        );
        let init = self
            .gateway
            .initialize(enrollment.payment_amount, &self.currency, &metadata)
            .await
            .map_err(|e| EnrollmentError::PaymentInitFailed(e.to_string()))?;

        self.ledger
            .set_payment_initialized(
                enrollment.id,
                &init.transaction_id,
                Some(&payment_reference(enrollment.id)),
            )
            .await?;

        tracing::info!(
            enrollment = %enrollment.id,
            transaction = %init.transaction_id,
            "payment transaction initialized"
        );

        Ok(init)
    }

    // =========================================================================
    // process_payment
    // =========================================================================

    /// Verify a transaction with the gateway and settle the enrollment.
    pub async fn process_payment(
        &self,
        enrollment_id: EnrollmentId,
        transaction_id: Option<&str>,
        payment_method: Option<&str>,
    ) -> Result<Enrollment, EnrollmentError> {
        let enrollment = self
            .ledger
            .find(enrollment_id)
            .await?
            .ok_or(EnrollmentError::EnrollmentNotFound)?;

        let exam = self
            .ledger
            .exam(enrollment.exam_id)
            .await?
            .ok_or(EnrollmentError::ExamNotFound)?;
        if !exam.is_enrollment_open() {
            return Err(EnrollmentError::EnrollmentClosed);
        }
        if enrollment.enrollment_status == EnrollmentStatus::Cancelled {
            return Err(EnrollmentError::AlreadyCancelled);
        }
        if enrollment.payment_status == PaymentStatus::Completed {
            return Err(EnrollmentError::PaymentAlreadyCompleted);
        }

        let reference = transaction_id
            .map(str::to_owned)
            .or_else(|| enrollment.transaction_id.clone())
            .or_else(|| enrollment.payment_reference.clone())
            .ok_or(EnrollmentError::MissingTransaction)?;

        // A gateway timeout or transport fault is a verification failure,
        // never a crash; the enrollment stays retryable.
        let verification = match self.gateway.verify(&reference).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(
                    enrollment = %enrollment.id,
                    transaction = %reference,
                    error = %err,
                    "payment verification errored"
                );
                self.ledger.mark_payment_failed(enrollment.id).await?;
                self.stats.refresh(enrollment.exam_id).await;
                return Err(EnrollmentError::PaymentVerificationFailed(err.to_string()));
            }
        };

        if !verification.is_completed() {
            self.ledger.mark_payment_failed(enrollment.id).await?;
            self.stats.refresh(enrollment.exam_id).await;
            return Err(EnrollmentError::PaymentVerificationFailed(format!(
                "transaction {reference} did not verify as completed"
            )));
        }

        let method = payment_method
            .map(str::to_owned)
            .or_else(|| verification.payment_method.clone())
            .unwrap_or_else(|| "direct".to_string());

        let swapped = self
            .ledger
            .complete_payment_if_pending(
                enrollment.id,
                &method,
                Some(&verification.transaction_id),
            )
            .await?;
        if !swapped {
            // A webhook settled it between our read and this write.
            return Err(EnrollmentError::PaymentAlreadyCompleted);
        }

        tracing::info!(
            enrollment = %enrollment.id,
            transaction = %verification.transaction_id,
            method = %method,
            "payment completed"
        );
        self.stats.refresh(enrollment.exam_id).await;

        self.ledger
            .find(enrollment.id)
            .await?
            .ok_or(EnrollmentError::EnrollmentNotFound)
    }

    // =========================================================================
    // access codes
    // =========================================================================

    /// Check that an access code admits this student right now.
    ///
    /// Read-only: the code is burned by [`redeem_access_code`], a separate
    /// step, so a validation the caller never acts on costs nothing.
    pub async fn validate_access_code(
        &self,
        code: &str,
        student_id: StudentId,
        exam_id: Option<ExamId>,
    ) -> Result<Enrollment, EnrollmentError> {
        let code = access_code::normalize(code).ok_or(EnrollmentError::AccessCodeInvalid)?;

        let enrollment = self
            .ledger
            .find_by_access_code(&code, student_id, exam_id)
            .await?
            .ok_or(EnrollmentError::AccessCodeInvalid)?;

        if enrollment.enrollment_status != EnrollmentStatus::Enrolled {
            return Err(EnrollmentError::EnrollmentNotActive);
        }
        if enrollment.payment_status != PaymentStatus::Completed {
            return Err(EnrollmentError::PaymentIncomplete);
        }
        if enrollment.access_code_used {
            return Err(EnrollmentError::AccessCodeUsed);
        }

        let exam = self
            .ledger
            .exam(enrollment.exam_id)
            .await?
            .ok_or(EnrollmentError::ExamNotFound)?;
        let now = current_timestamp();
        if !exam.is_startable(now) {
            return Err(EnrollmentError::ExamNotStartable);
        }
        if enrollment.is_expired(now) {
            return Err(EnrollmentError::AccessCodeExpired);
        }

        Ok(enrollment)
    }

    /// Burn the access code. At most one redemption per enrollment, ever;
    /// the storage predicate also upholds used-implies-enrolled-and-paid.
    pub async fn redeem_access_code(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, EnrollmentError> {
        let enrollment = self
            .ledger
            .find(enrollment_id)
            .await?
            .ok_or(EnrollmentError::EnrollmentNotFound)?;

        if enrollment.access_code_used {
            return Err(EnrollmentError::AccessCodeUsed);
        }
        if enrollment.enrollment_status != EnrollmentStatus::Enrolled {
            return Err(EnrollmentError::EnrollmentNotActive);
        }
        if enrollment.payment_status != PaymentStatus::Completed {
            return Err(EnrollmentError::PaymentIncomplete);
        }

        let swapped = self.ledger.redeem_access_code(enrollment.id).await?;
        if !swapped {
            return Err(EnrollmentError::AccessCodeUsed);
        }

        tracing::info!(enrollment = %enrollment.id, "access code redeemed");

        self.ledger
            .find(enrollment.id)
            .await?
            .ok_or(EnrollmentError::EnrollmentNotFound)
    }

    // =========================================================================
    // cancel
    // =========================================================================

    /// Cancel an enrollment on behalf of the exam's owning center,
    /// refunding a settled fee first.
    pub async fn cancel(
        &self,
        enrollment_id: EnrollmentId,
        reason: &str,
        requested_by: CenterId,
    ) -> Result<CancelOutcome, EnrollmentError> {
        let enrollment = self
            .ledger
            .find(enrollment_id)
            .await?
            .ok_or(EnrollmentError::EnrollmentNotFound)?;
        if enrollment.enrollment_status == EnrollmentStatus::Cancelled {
            return Err(EnrollmentError::AlreadyCancelled);
        }

        let exam = self
            .ledger
            .exam(enrollment.exam_id)
            .await?
            .ok_or(EnrollmentError::ExamNotFound)?;
        if exam.center_id != requested_by {
            return Err(EnrollmentError::NotExamOwner);
        }

        // Refund gate: only a settled, nonzero fee goes back through the
        // gateway. Every other pre-state skips the call entirely.
        let refund = if enrollment.payment_status == PaymentStatus::Completed
            && enrollment.payment_amount > 0
        {
            match enrollment
                .transaction_id
                .as_deref()
                .or(enrollment.payment_reference.as_deref())
            {
                Some(reference) => {
                    let outcome = self
                        .gateway
                        .refund(reference, enrollment.payment_amount, reason)
                        .await
                        .map_err(|e| EnrollmentError::RefundFailed(e.to_string()))?;
                    self.ledger.mark_refunded(enrollment.id).await?;
                    tracing::info!(
                        enrollment = %enrollment.id,
                        transaction = %reference,
                        amount_minor = enrollment.payment_amount,
                        "payment refunded"
                    );
                    Some(outcome)
                }
                None => {
                    tracing::warn!(
                        enrollment = %enrollment.id,
                        "completed payment has no transaction reference, skipping gateway refund"
                    );
                    None
                }
            }
        } else {
            None
        };

        let swapped = self.ledger.cancel_enrollment(enrollment.id).await?;
        if !swapped {
            return Err(EnrollmentError::AlreadyCancelled);
        }

        tracing::info!(
            enrollment = %enrollment.id,
            requested_by = %requested_by,
            reason = %reason,
            "enrollment cancelled"
        );
        self.stats.refresh(enrollment.exam_id).await;

        let enrollment = self
            .ledger
            .find(enrollment.id)
            .await?
            .ok_or(EnrollmentError::EnrollmentNotFound)?;

        Ok(CancelOutcome { enrollment, refund })
    }

    // =========================================================================
    // webhooks
    // =========================================================================

    /// Apply an asynchronous gateway delivery.
    ///
    /// Safe to invoke any number of times for the same event: the settlement
    /// itself is a conditional write, so redelivery is a no-op.
    pub async fn handle_payment_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookDisposition, EnrollmentError> {
        let event = self
            .gateway
            .handle_webhook(payload, signature)
            .await
            .map_err(|e| EnrollmentError::WebhookRejected(e.to_string()))?;

        match event.kind {
            WebhookEventKind::PaymentCompleted => {
                let Some(enrollment) = self
                    .ledger
                    .find_by_transaction(&event.transaction_id)
                    .await?
                else {
                    tracing::warn!(
                        transaction = %event.transaction_id,
                        event = %event.event,
                        "webhook for unknown transaction"
                    );
                    return Ok(WebhookDisposition::Ignored);
                };

                if enrollment.payment_status == PaymentStatus::Completed {
                    return Ok(WebhookDisposition::AlreadyCompleted);
                }

                let swapped = self
                    .ledger
                    .complete_payment_if_pending(
                        enrollment.id,
                        "webhook",
                        Some(&event.transaction_id),
                    )
                    .await?;
                if !swapped {
                    // Direct verification won the race, or the enrollment is
                    // no longer creditable. Either way: nothing to redo.
                    return Ok(WebhookDisposition::AlreadyCompleted);
                }

                tracing::info!(
                    enrollment = %enrollment.id,
                    transaction = %event.transaction_id,
                    "payment completed via webhook"
                );
                self.stats.refresh(enrollment.exam_id).await;

                Ok(WebhookDisposition::Completed {
                    enrollment_id: enrollment.id,
                })
            }
            WebhookEventKind::PaymentFailed => {
                tracing::info!(
                    transaction = %event.transaction_id,
                    event = %event.event,
                    "payment failure event acknowledged"
                );
                Ok(WebhookDisposition::Ignored)
            }
            WebhookEventKind::Other(name) => {
                tracing::debug!(event = %name, "webhook event ignored");
                Ok(WebhookDisposition::Ignored)
            }
        }
    }
}

/// Stable reference passed to the gateway alongside its own transaction id,
/// so either identifier resolves the enrollment on the webhook path.
fn payment_reference(id: EnrollmentId) -> String {
    format!("enr-{id}")
}

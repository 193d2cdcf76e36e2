//! Exam collaborator view.
//!
//! Exams are authored by the encompassing system. The enrollment engine reads
//! their lifecycle, window and enrollment configuration, and owns exactly one
//! slice of the record: the denormalized [`EnrollmentStats`] counters.

use serde::{Deserialize, Serialize};

use crate::identity::{CenterId, ExamId};

/// Lifecycle phase of an exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamLifecycle {
    /// Being authored; not visible to students.
    Draft,
    /// Published with a future window; enrollments accepted.
    Scheduled,
    /// Window open; enrollments accepted, sessions may start.
    Active,
    /// Window closed.
    Completed,
    /// Removed from listings.
    Archived,
}

impl ExamLifecycle {
    /// Returns true if new enrollments are accepted in this phase.
    pub fn accepts_enrollments(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Enrollment policy knobs on an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    /// Whether this exam takes enrollments at all.
    pub enrollment_required: bool,
    /// Fee in minor currency units; 0 means free.
    pub fee_minor: i64,
    /// Seat cap; 0 means uncapped.
    pub max_enrollments: i64,
    /// Unix seconds; None means no deadline.
    pub enrollment_deadline: Option<i64>,
    /// Accept enrollments past the deadline.
    pub allow_late_enrollment: bool,
    /// Whether a nonzero fee must be collected through the gateway.
    pub require_payment: bool,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            enrollment_required: true,
            fee_minor: 0,
            max_enrollments: 0,
            enrollment_deadline: None,
            allow_late_enrollment: false,
            require_payment: true,
        }
    }
}

impl EnrollmentConfig {
    /// Returns true if the deadline forbids a new enrollment at `now`.
    pub fn deadline_closed(&self, now: i64) -> bool {
        match self.enrollment_deadline {
            Some(deadline) => now > deadline && !self.allow_late_enrollment,
            None => false,
        }
    }
}

/// Denormalized enrollment counters on an exam record.
///
/// Owned exclusively by the stats aggregator; never hand-edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrollmentStats {
    /// Non-cancelled enrollments.
    pub total_enrollments: i64,
    /// Enrolled with a settled fee.
    pub active_enrollments: i64,
    /// Enrollments with a payment still pending.
    pub pending_payments: i64,
    /// Sum of settled fees, minor units.
    pub total_revenue: i64,
}

/// An exam as the enrollment engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRecord {
    pub id: ExamId,
    /// Owning center; only this center may cancel enrollments.
    pub center_id: CenterId,
    pub title: String,
    pub lifecycle: ExamLifecycle,
    /// Session window start, unix seconds; None means unbounded.
    pub starts_at: Option<i64>,
    /// Session window end, unix seconds; None means unbounded.
    pub ends_at: Option<i64>,
    pub enrollment: EnrollmentConfig,
    pub stats: EnrollmentStats,
}

impl ExamRecord {
    /// Returns true if new enrollments are accepted right now
    /// (lifecycle check only; deadline and capacity are separate checks).
    pub fn is_enrollment_open(&self) -> bool {
        self.lifecycle.accepts_enrollments()
    }

    /// Returns true if a test session may start at `now`: the lifecycle
    /// accepts sessions and `now` falls inside whichever window bounds exist.
    pub fn is_startable(&self, now: i64) -> bool {
        if !self.lifecycle.accepts_enrollments() {
            return false;
        }
        if self.starts_at.is_some_and(|at| now < at) {
            return false;
        }
        if self.ends_at.is_some_and(|at| now > at) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam(lifecycle: ExamLifecycle) -> ExamRecord {
        ExamRecord {
            id: ExamId::new(),
            center_id: CenterId::new(),
            title: "Algebra II final".into(),
            lifecycle,
            starts_at: Some(1_000),
            ends_at: Some(2_000),
            enrollment: EnrollmentConfig::default(),
            stats: EnrollmentStats::default(),
        }
    }

    #[test]
    fn lifecycle_gates_enrollment() {
        assert!(exam(ExamLifecycle::Scheduled).is_enrollment_open());
        assert!(exam(ExamLifecycle::Active).is_enrollment_open());
        assert!(!exam(ExamLifecycle::Draft).is_enrollment_open());
        assert!(!exam(ExamLifecycle::Completed).is_enrollment_open());
        assert!(!exam(ExamLifecycle::Archived).is_enrollment_open());
    }

    #[test]
    fn startable_respects_window() {
        let e = exam(ExamLifecycle::Active);
        assert!(!e.is_startable(999));
        assert!(e.is_startable(1_000));
        assert!(e.is_startable(1_500));
        assert!(e.is_startable(2_000));
        assert!(!e.is_startable(2_001));
    }

    #[test]
    fn startable_requires_open_lifecycle() {
        let e = exam(ExamLifecycle::Completed);
        assert!(!e.is_startable(1_500));
    }

    #[test]
    fn unbounded_window_is_always_inside() {
        let mut e = exam(ExamLifecycle::Active);
        e.starts_at = None;
        e.ends_at = None;
        assert!(e.is_startable(0));
        assert!(e.is_startable(i64::MAX));
    }

    #[test]
    fn deadline_closed_logic() {
        let mut cfg = EnrollmentConfig {
            enrollment_deadline: Some(1_000),
            ..Default::default()
        };
        assert!(!cfg.deadline_closed(1_000));
        assert!(cfg.deadline_closed(1_001));
        cfg.allow_late_enrollment = true;
        assert!(!cfg.deadline_closed(5_000));
        cfg.enrollment_deadline = None;
        cfg.allow_late_enrollment = false;
        assert!(!cfg.deadline_closed(i64::MAX));
    }

    #[test]
    fn lifecycle_str_roundtrip() {
        for lc in [
            ExamLifecycle::Draft,
            ExamLifecycle::Scheduled,
            ExamLifecycle::Active,
            ExamLifecycle::Completed,
            ExamLifecycle::Archived,
        ] {
            assert_eq!(ExamLifecycle::parse(lc.as_str()), Some(lc));
        }
    }
}

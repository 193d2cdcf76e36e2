//! Shared domain types for the proctor enrollment engine.
//!
//! This crate carries no I/O: it defines the identifiers, the enrollment
//! record with its two status machines, and the read-mostly views of the
//! exam and student records that the enrollment service consults.

pub mod enrollment;
pub mod exam;
pub mod identity;

pub use enrollment::{Enrollment, EnrollmentStatus, PaymentStatus};
pub use exam::{EnrollmentConfig, EnrollmentStats, ExamLifecycle, ExamRecord};
pub use identity::{CenterId, EnrollmentId, ExamId, Role, StudentId, StudentRecord};

//! Durable enrollment storage.

mod store;

pub use store::{current_timestamp, EnrollmentLedger, LedgerError};

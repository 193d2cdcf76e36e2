//! Proctor daemon: the enrollment workflow engine.
//!
//! Library surface for the binary and the integration tests. The moving
//! parts: [`ledger::EnrollmentLedger`] (durable state and every conditional
//! transition), [`services::EnrollmentService`] (the state machine),
//! [`services::StatsAggregator`] (best-effort counters) and [`http`]
//! (the webhook intake route).

pub mod config;
pub mod http;
pub mod ledger;
pub mod services;

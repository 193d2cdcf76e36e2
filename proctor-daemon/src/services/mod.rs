//! Service layer: the enrollment state machine and its collaborators.

pub mod access_code;
pub mod enrollment;
pub mod rate_limit;
pub mod stats;

pub use access_code::AccessCodeIssuer;
pub use enrollment::{
    CancelOutcome, EnrollmentError, EnrollmentOutcome, EnrollmentService, ErrorKind,
    WebhookDisposition,
};
pub use rate_limit::WebhookRateLimiter;
pub use stats::StatsAggregator;

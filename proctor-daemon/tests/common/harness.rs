//! Test harness for enrollment e2e tests.
//!
//! Wires an in-memory SQLite ledger, the mock gateway and the enrollment
//! service together. No network, no filesystem.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;

use proctor_core::{
    CenterId, EnrollmentConfig, EnrollmentStats, ExamId, ExamLifecycle, ExamRecord, Role,
    StudentId, StudentRecord,
};
use proctor_daemon::ledger::EnrollmentLedger;
use proctor_daemon::services::EnrollmentService;
use proctor_gateway::webhook::sign_payload;
use proctor_gateway::MockGateway;

pub struct TestHarness {
    pub ledger: Arc<EnrollmentLedger>,
    pub gateway: Arc<MockGateway>,
    pub service: Arc<EnrollmentService>,
    /// Center owning everything this harness seeds.
    pub center_id: CenterId,
}

impl TestHarness {
    /// Harness with an unsecured mock gateway.
    pub async fn new() -> Self {
        Self::with_gateway(MockGateway::new()).await
    }

    /// Harness whose gateway requires signed webhook deliveries.
    pub async fn with_webhook_secret(secret: &str) -> Self {
        Self::with_gateway(MockGateway::with_webhook_secret(secret)).await
    }

    async fn with_gateway(gateway: MockGateway) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("failed to create in-memory database");
        let ledger = Arc::new(
            EnrollmentLedger::new(pool)
                .await
                .expect("failed to initialize ledger"),
        );
        let gateway = Arc::new(gateway);
        let service = Arc::new(EnrollmentService::new(
            ledger.clone(),
            gateway.clone(),
            "USD",
        ));

        Self {
            ledger,
            gateway,
            service,
            center_id: CenterId::new(),
        }
    }

    /// Seed an active, unbounded exam with the given fee and seat cap.
    pub async fn seed_exam(&self, fee_minor: i64, max_enrollments: i64) -> ExamRecord {
        self.seed_exam_with(|exam| {
            exam.enrollment.fee_minor = fee_minor;
            exam.enrollment.max_enrollments = max_enrollments;
        })
        .await
    }

    /// Seed an exam after applying `customize` to a sane default.
    pub async fn seed_exam_with(&self, customize: impl FnOnce(&mut ExamRecord)) -> ExamRecord {
        let mut exam = ExamRecord {
            id: ExamId::new(),
            center_id: self.center_id,
            title: "Placement exam".into(),
            lifecycle: ExamLifecycle::Active,
            starts_at: None,
            ends_at: None,
            enrollment: EnrollmentConfig::default(),
            stats: EnrollmentStats::default(),
        };
        customize(&mut exam);
        self.ledger
            .upsert_exam(&exam)
            .await
            .expect("failed to seed exam");
        exam
    }

    /// Seed a student account in the harness center.
    pub async fn seed_student(&self) -> StudentRecord {
        self.seed_account(self.center_id, Role::Student).await
    }

    /// Seed an account with an arbitrary center and role.
    pub async fn seed_account(&self, center_id: CenterId, role: Role) -> StudentRecord {
        let student = StudentRecord {
            id: StudentId::new(),
            center_id,
            role,
            display_name: None,
        };
        self.ledger
            .upsert_student(&student)
            .await
            .expect("failed to seed student");
        student
    }
}

/// JSON body for a payment-completed delivery.
pub fn completed_webhook(transaction_id: &str) -> Vec<u8> {
    format!(r#"{{"event":"payment.completed","transactionId":"{transaction_id}"}}"#).into_bytes()
}

/// Body plus a valid signature for the given secret.
pub fn signed_completed_webhook(transaction_id: &str, secret: &str) -> (Vec<u8>, String) {
    let body = completed_webhook(transaction_id);
    let signature = sign_payload(&body, secret);
    (body, signature)
}

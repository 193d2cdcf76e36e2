//! Derived enrollment counters.
//!
//! Recomputed from ledger state after every successful mutation and written
//! onto the exam row. Best-effort by contract: a failed refresh logs a
//! warning and yields zeroed counters, it never fails the mutation that
//! triggered it.

use std::sync::Arc;

use proctor_core::{EnrollmentStats, EnrollmentStatus, ExamId, PaymentStatus};

use crate::ledger::EnrollmentLedger;

/// Computes and persists denormalized counters for exams.
#[derive(Clone)]
pub struct StatsAggregator {
    ledger: Arc<EnrollmentLedger>,
}

impl StatsAggregator {
    pub fn new(ledger: Arc<EnrollmentLedger>) -> Self {
        Self { ledger }
    }

    /// Recompute counters for one exam and write them back.
    ///
    /// Never returns an error: aggregation is allowed to be stale, not to
    /// block enrollment or payment operations.
    pub async fn refresh(&self, exam_id: ExamId) -> EnrollmentStats {
        let rows = match self.ledger.aggregate_status_rows(exam_id).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(exam = %exam_id, error = %err, "stats aggregation failed");
                return EnrollmentStats::default();
            }
        };

        let stats = compute(&rows);

        if let Err(err) = self.ledger.write_stats(exam_id, &stats).await {
            tracing::warn!(exam = %exam_id, error = %err, "stats write-back failed");
        }

        stats
    }
}

/// Fold grouped (status, payment, count, amount) rows into counters.
fn compute(rows: &[(EnrollmentStatus, PaymentStatus, i64, i64)]) -> EnrollmentStats {
    let mut stats = EnrollmentStats::default();

    for &(status, payment, count, amount) in rows {
        if status == EnrollmentStatus::Cancelled {
            continue;
        }
        stats.total_enrollments += count;
        if payment == PaymentStatus::Pending {
            stats.pending_payments += count;
        }
        if status == EnrollmentStatus::Enrolled && payment.is_settled() {
            stats.active_enrollments += count;
            stats.total_revenue += amount;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::current_timestamp;
    use proctor_core::{CenterId, Enrollment, StudentId};
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn compute_counts_each_bucket_once() {
        use EnrollmentStatus::*;
        use PaymentStatus::*;

        let rows = vec![
            (Enrolled, Completed, 3, 30_000),
            (Enrolled, NotRequired, 2, 0),
            (PaymentPending, Pending, 4, 40_000),
            (PaymentPending, Failed, 1, 10_000),
            (Cancelled, Refunded, 5, 50_000),
            (Cancelled, Pending, 2, 20_000),
        ];

        let stats = compute(&rows);
        assert_eq!(stats.total_enrollments, 10);
        assert_eq!(stats.active_enrollments, 5);
        assert_eq!(stats.pending_payments, 4);
        assert_eq!(stats.total_revenue, 30_000);
    }

    #[test]
    fn compute_on_empty_is_zeroed() {
        assert_eq!(compute(&[]), EnrollmentStats::default());
    }

    #[tokio::test]
    async fn refresh_writes_counters_onto_exam() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let ledger = Arc::new(EnrollmentLedger::new(pool).await.unwrap());

        let exam = proctor_core::ExamRecord {
            id: ExamId::new(),
            center_id: CenterId::new(),
            title: "Biology final".into(),
            lifecycle: proctor_core::ExamLifecycle::Active,
            starts_at: None,
            ends_at: None,
            enrollment: Default::default(),
            stats: Default::default(),
        };
        ledger.upsert_exam(&exam).await.unwrap();

        let now = current_timestamp();
        let free = Enrollment::admit(
            exam.id,
            StudentId::new(),
            exam.center_id,
            "aaaabbbbcccc".into(),
            0,
            None,
            None,
            now,
        );
        let owing = Enrollment::admit(
            exam.id,
            StudentId::new(),
            exam.center_id,
            "ddddeeeeffff".into(),
            8_000,
            None,
            None,
            now,
        );
        ledger.insert_enrollment(&free).await.unwrap();
        ledger.insert_enrollment(&owing).await.unwrap();

        let aggregator = StatsAggregator::new(ledger.clone());
        let stats = aggregator.refresh(exam.id).await;
        assert_eq!(stats.total_enrollments, 2);
        assert_eq!(stats.active_enrollments, 1);
        assert_eq!(stats.pending_payments, 1);
        assert_eq!(stats.total_revenue, 0);

        let stored = ledger.exam(exam.id).await.unwrap().unwrap();
        assert_eq!(stored.stats, stats);
    }

    #[tokio::test]
    async fn refresh_swallows_missing_exam() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let ledger = Arc::new(EnrollmentLedger::new(pool).await.unwrap());

        // No exam row exists; the write-back updates nothing and the refresh
        // still reports the (empty) computation.
        let aggregator = StatsAggregator::new(ledger);
        let stats = aggregator.refresh(ExamId::new()).await;
        assert_eq!(stats, EnrollmentStats::default());
    }
}

//! Persistent enrollment ledger on SQLite.
//!
//! Uniqueness lives here, not in caller reads: a global unique index on
//! `access_code` and a partial unique index on `(exam_id, student_id)` among
//! non-cancelled rows turn concurrent duplicate admissions into constraint
//! violations, which are translated to typed errors. Every state transition
//! is a conditional UPDATE whose `rows_affected` discriminates the winner of
//! a race from the loser.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use proctor_core::{
    CenterId, Enrollment, EnrollmentConfig, EnrollmentId, EnrollmentStats, EnrollmentStatus,
    ExamId, ExamLifecycle, ExamRecord, PaymentStatus, Role, StudentId, StudentRecord,
};

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A non-cancelled enrollment already exists for this (exam, student).
    #[error("student already holds an enrollment for this exam")]
    DuplicateEnrollment,
    /// The candidate access code collided with an existing one.
    #[error("access code already in use")]
    DuplicateAccessCode,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_secs() as i64
}

const ENROLLMENT_COLUMNS: &str = "id, exam_id, student_id, center_id, access_code, \
     access_code_used, access_code_used_at, enrollment_status, payment_status, \
     payment_amount, payment_method, transaction_id, payment_reference, notes, \
     expires_at, created_at, updated_at";

/// Durable storage for enrollments plus the exam/student collaborator tables.
#[derive(Clone)]
pub struct EnrollmentLedger {
    pool: SqlitePool,
}

impl EnrollmentLedger {
    /// Open or create a ledger database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(
                    format!("failed to create ledger directory: {e}").into(),
                )
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // WAL mode for better concurrent read performance
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite performs best with single writer
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    /// Create a ledger over an existing pool, ensuring the schema exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrollments (
                id TEXT PRIMARY KEY,
                exam_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                center_id TEXT NOT NULL,
                access_code TEXT NOT NULL,
                access_code_used INTEGER NOT NULL DEFAULT 0,
                access_code_used_at INTEGER,
                enrollment_status TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                payment_amount INTEGER NOT NULL,
                payment_method TEXT,
                transaction_id TEXT,
                payment_reference TEXT,
                notes TEXT,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_access_code
             ON enrollments(access_code)",
        )
        .execute(&pool)
        .await?;

        // One live enrollment per (exam, student); cancelled rows don't count.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_exam_student
             ON enrollments(exam_id, student_id)
             WHERE enrollment_status != 'cancelled'",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_enrollments_transaction
             ON enrollments(transaction_id)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exams (
                id TEXT PRIMARY KEY,
                center_id TEXT NOT NULL,
                title TEXT NOT NULL,
                lifecycle TEXT NOT NULL,
                starts_at INTEGER,
                ends_at INTEGER,
                enrollment_required INTEGER NOT NULL DEFAULT 1,
                enrollment_fee INTEGER NOT NULL DEFAULT 0,
                max_enrollments INTEGER NOT NULL DEFAULT 0,
                enrollment_deadline INTEGER,
                allow_late_enrollment INTEGER NOT NULL DEFAULT 0,
                require_payment INTEGER NOT NULL DEFAULT 1,
                total_enrollments INTEGER NOT NULL DEFAULT 0,
                active_enrollments INTEGER NOT NULL DEFAULT 0,
                pending_payments INTEGER NOT NULL DEFAULT 0,
                total_revenue INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                center_id TEXT NOT NULL,
                role TEXT NOT NULL,
                display_name TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    // =========================================================================
    // Enrollment writes
    // =========================================================================

    /// Insert a fresh enrollment.
    ///
    /// Unique-index violations come back as [`LedgerError::DuplicateAccessCode`]
    /// or [`LedgerError::DuplicateEnrollment`] so callers can retry the code or
    /// report the conflict.
    pub async fn insert_enrollment(&self, e: &Enrollment) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO enrollments (
                id, exam_id, student_id, center_id, access_code,
                access_code_used, access_code_used_at, enrollment_status,
                payment_status, payment_amount, payment_method, transaction_id,
                payment_reference, notes, expires_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(e.id.to_string())
        .bind(e.exam_id.to_string())
        .bind(e.student_id.to_string())
        .bind(e.center_id.to_string())
        .bind(&e.access_code)
        .bind(e.access_code_used as i64)
        .bind(e.access_code_used_at)
        .bind(e.enrollment_status.as_str())
        .bind(e.payment_status.as_str())
        .bind(e.payment_amount)
        .bind(&e.payment_method)
        .bind(&e.transaction_id)
        .bind(&e.payment_reference)
        .bind(&e.notes)
        .bind(e.expires_at)
        .bind(e.created_at)
        .bind(e.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(translate_unique_violation(err)),
        }
    }

    /// Record the gateway transaction for an enrollment, once.
    ///
    /// The `transaction_id IS NULL` guard keeps a concurrent initialization
    /// from clobbering an already-stored reference.
    pub async fn set_payment_initialized(
        &self,
        id: EnrollmentId,
        transaction_id: &str,
        payment_reference: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET transaction_id = ?, payment_reference = ?, updated_at = ?
             WHERE id = ? AND transaction_id IS NULL",
        )
        .bind(transaction_id)
        .bind(payment_reference)
        .bind(current_timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The completion transition, as a single conditional update.
    ///
    /// Succeeds at most once per enrollment: only a not-yet-settled payment
    /// (`pending` or a retried `failed`) on a non-cancelled enrollment can
    /// complete. Racing callers observe `false` and report the idempotent
    /// outcome.
    pub async fn complete_payment_if_pending(
        &self,
        id: EnrollmentId,
        payment_method: &str,
        transaction_id: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET payment_status = 'completed',
                 enrollment_status = 'enrolled',
                 payment_method = ?,
                 transaction_id = COALESCE(?, transaction_id),
                 updated_at = ?
             WHERE id = ?
               AND payment_status IN ('pending', 'failed')
               AND enrollment_status != 'cancelled'",
        )
        .bind(payment_method)
        .bind(transaction_id)
        .bind(current_timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed verification attempt. The enrollment itself stays
    /// `payment_pending` and the payment is retryable.
    pub async fn mark_payment_failed(&self, id: EnrollmentId) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET payment_status = 'failed', updated_at = ?
             WHERE id = ? AND payment_status IN ('pending', 'failed')",
        )
        .bind(current_timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a settled payment as returned.
    pub async fn mark_refunded(&self, id: EnrollmentId) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET payment_status = 'refunded', updated_at = ?
             WHERE id = ? AND payment_status = 'completed'",
        )
        .bind(current_timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Burn an access code, at most once, and only on an enrollment that is
    /// enrolled with a settled payment. The predicate is what upholds the
    /// used-implies-enrolled-and-paid invariant.
    pub async fn redeem_access_code(&self, id: EnrollmentId) -> Result<bool, LedgerError> {
        let now = current_timestamp();
        let result = sqlx::query(
            "UPDATE enrollments
             SET access_code_used = 1, access_code_used_at = ?, updated_at = ?
             WHERE id = ?
               AND access_code_used = 0
               AND enrollment_status = 'enrolled'
               AND payment_status = 'completed'",
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel an enrollment. Terminal: a cancelled row never transitions out.
    pub async fn cancel_enrollment(&self, id: EnrollmentId) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET enrollment_status = 'cancelled', updated_at = ?
             WHERE id = ? AND enrollment_status != 'cancelled'",
        )
        .bind(current_timestamp())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Enrollment reads
    // =========================================================================

    pub async fn find(&self, id: EnrollmentId) -> Result<Option<Enrollment>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_enrollment_row(&r)).transpose().map_err(Into::into)
    }

    /// The one non-cancelled enrollment for (exam, student), if any.
    pub async fn find_active(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> Result<Option<Enrollment>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
             WHERE exam_id = ? AND student_id = ? AND enrollment_status != 'cancelled'"
        ))
        .bind(exam_id.to_string())
        .bind(student_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_enrollment_row(&r)).transpose().map_err(Into::into)
    }

    /// Look up by access code scoped to its owner (and optionally one exam).
    pub async fn find_by_access_code(
        &self,
        access_code: &str,
        student_id: StudentId,
        exam_id: Option<ExamId>,
    ) -> Result<Option<Enrollment>, LedgerError> {
        let row = match exam_id {
            Some(exam_id) => {
                sqlx::query(&format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
                     WHERE access_code = ? AND student_id = ? AND exam_id = ?"
                ))
                .bind(access_code)
                .bind(student_id.to_string())
                .bind(exam_id.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
                     WHERE access_code = ? AND student_id = ?"
                ))
                .bind(access_code)
                .bind(student_id.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(|r| parse_enrollment_row(&r)).transpose().map_err(Into::into)
    }

    /// Look up by gateway transaction id or stored payment reference.
    pub async fn find_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Enrollment>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
             WHERE transaction_id = ? OR payment_reference = ?"
        ))
        .bind(transaction_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_enrollment_row(&r)).transpose().map_err(Into::into)
    }

    /// Count of enrollments holding a seat (enrolled or payment pending).
    pub async fn count_seated(&self, exam_id: ExamId) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM enrollments
             WHERE exam_id = ? AND enrollment_status IN ('payment_pending', 'enrolled')",
        )
        .bind(exam_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    // =========================================================================
    // Aggregation and stats
    // =========================================================================

    /// Group counts and settled amounts by status pair for one exam.
    pub async fn aggregate_status_rows(
        &self,
        exam_id: ExamId,
    ) -> Result<Vec<(EnrollmentStatus, PaymentStatus, i64, i64)>, LedgerError> {
        let rows = sqlx::query(
            "SELECT enrollment_status, payment_status,
                    COUNT(*) AS n, COALESCE(SUM(payment_amount), 0) AS amount
             FROM enrollments
             WHERE exam_id = ?
             GROUP BY enrollment_status, payment_status",
        )
        .bind(exam_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status = decode_enrollment_status(&row)?;
            let payment = decode_payment_status(&row)?;
            out.push((status, payment, row.get("n"), row.get("amount")));
        }
        Ok(out)
    }

    /// Write derived counters onto the exam row. Last writer wins.
    pub async fn write_stats(
        &self,
        exam_id: ExamId,
        stats: &EnrollmentStats,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "UPDATE exams
             SET total_enrollments = ?, active_enrollments = ?,
                 pending_payments = ?, total_revenue = ?
             WHERE id = ?",
        )
        .bind(stats.total_enrollments)
        .bind(stats.active_enrollments)
        .bind(stats.pending_payments)
        .bind(stats.total_revenue)
        .bind(exam_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Collaborator tables
    // =========================================================================

    pub async fn exam(&self, id: ExamId) -> Result<Option<ExamRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM exams WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| parse_exam_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn student(&self, id: StudentId) -> Result<Option<StudentRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM students WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| parse_student_row(&r)).transpose().map_err(Into::into)
    }

    /// Write an exam record. Authored by the encompassing system; the stats
    /// columns it carries are overwritten by the next aggregation.
    pub async fn upsert_exam(&self, exam: &ExamRecord) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO exams (
                id, center_id, title, lifecycle, starts_at, ends_at,
                enrollment_required, enrollment_fee, max_enrollments,
                enrollment_deadline, allow_late_enrollment, require_payment,
                total_enrollments, active_enrollments, pending_payments, total_revenue
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(exam.id.to_string())
        .bind(exam.center_id.to_string())
        .bind(&exam.title)
        .bind(exam.lifecycle.as_str())
        .bind(exam.starts_at)
        .bind(exam.ends_at)
        .bind(exam.enrollment.enrollment_required as i64)
        .bind(exam.enrollment.fee_minor)
        .bind(exam.enrollment.max_enrollments)
        .bind(exam.enrollment.enrollment_deadline)
        .bind(exam.enrollment.allow_late_enrollment as i64)
        .bind(exam.enrollment.require_payment as i64)
        .bind(exam.stats.total_enrollments)
        .bind(exam.stats.active_enrollments)
        .bind(exam.stats.pending_payments)
        .bind(exam.stats.total_revenue)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_student(&self, student: &StudentRecord) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO students (id, center_id, role, display_name)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(student.id.to_string())
        .bind(student.center_id.to_string())
        .bind(student.role.as_str())
        .bind(&student.display_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row parsing
// ============================================================================

/// Map a unique-index violation onto the typed conflict it represents.
fn translate_unique_violation(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = err {
        let message = db_err.message();
        if message.contains("UNIQUE") {
            if message.contains("access_code") {
                return LedgerError::DuplicateAccessCode;
            }
            if message.contains("exam_student")
                || (message.contains("exam_id") && message.contains("student_id"))
            {
                return LedgerError::DuplicateEnrollment;
            }
        }
    }
    LedgerError::Database(err)
}

fn decode_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let s: String = row.try_get(column)?;
    Uuid::parse_str(&s)
        .map_err(|e| sqlx::Error::Decode(format!("invalid UUID in {column}: {e}").into()))
}

fn decode_enrollment_status(row: &SqliteRow) -> Result<EnrollmentStatus, sqlx::Error> {
    let s: String = row.try_get("enrollment_status")?;
    EnrollmentStatus::parse(&s)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown enrollment_status: {s}").into()))
}

fn decode_payment_status(row: &SqliteRow) -> Result<PaymentStatus, sqlx::Error> {
    let s: String = row.try_get("payment_status")?;
    PaymentStatus::parse(&s)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown payment_status: {s}").into()))
}

fn parse_enrollment_row(row: &SqliteRow) -> Result<Enrollment, sqlx::Error> {
    Ok(Enrollment {
        id: EnrollmentId::from_uuid(decode_uuid(row, "id")?),
        exam_id: ExamId::from_uuid(decode_uuid(row, "exam_id")?),
        student_id: StudentId::from_uuid(decode_uuid(row, "student_id")?),
        center_id: CenterId::from_uuid(decode_uuid(row, "center_id")?),
        access_code: row.try_get("access_code")?,
        access_code_used: row.try_get::<i64, _>("access_code_used")? != 0,
        access_code_used_at: row.try_get("access_code_used_at")?,
        enrollment_status: decode_enrollment_status(row)?,
        payment_status: decode_payment_status(row)?,
        payment_amount: row.try_get("payment_amount")?,
        payment_method: row.try_get("payment_method")?,
        transaction_id: row.try_get("transaction_id")?,
        payment_reference: row.try_get("payment_reference")?,
        notes: row.try_get("notes")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_exam_row(row: &SqliteRow) -> Result<ExamRecord, sqlx::Error> {
    let lifecycle_str: String = row.try_get("lifecycle")?;
    let lifecycle = ExamLifecycle::parse(&lifecycle_str)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown lifecycle: {lifecycle_str}").into()))?;

    Ok(ExamRecord {
        id: ExamId::from_uuid(decode_uuid(row, "id")?),
        center_id: CenterId::from_uuid(decode_uuid(row, "center_id")?),
        title: row.try_get("title")?,
        lifecycle,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        enrollment: EnrollmentConfig {
            enrollment_required: row.try_get::<i64, _>("enrollment_required")? != 0,
            fee_minor: row.try_get("enrollment_fee")?,
            max_enrollments: row.try_get("max_enrollments")?,
            enrollment_deadline: row.try_get("enrollment_deadline")?,
            allow_late_enrollment: row.try_get::<i64, _>("allow_late_enrollment")? != 0,
            require_payment: row.try_get::<i64, _>("require_payment")? != 0,
        },
        stats: EnrollmentStats {
            total_enrollments: row.try_get("total_enrollments")?,
            active_enrollments: row.try_get("active_enrollments")?,
            pending_payments: row.try_get("pending_payments")?,
            total_revenue: row.try_get("total_revenue")?,
        },
    })
}

fn parse_student_row(row: &SqliteRow) -> Result<StudentRecord, sqlx::Error> {
    let role_str: String = row.try_get("role")?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown role: {role_str}").into()))?;

    Ok(StudentRecord {
        id: StudentId::from_uuid(decode_uuid(row, "id")?),
        center_id: CenterId::from_uuid(decode_uuid(row, "center_id")?),
        role,
        display_name: row.try_get("display_name")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ledger() -> EnrollmentLedger {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        EnrollmentLedger::new(pool).await.unwrap()
    }

    fn enrollment(exam_id: ExamId, student_id: StudentId, code: &str, fee: i64) -> Enrollment {
        Enrollment::admit(
            exam_id,
            student_id,
            CenterId::new(),
            code.to_string(),
            fee,
            None,
            None,
            current_timestamp(),
        )
    }

    #[tokio::test]
    async fn insert_and_find_roundtrip() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 5_000);
        ledger.insert_enrollment(&e).await.unwrap();

        let found = ledger.find(e.id).await.unwrap().unwrap();
        assert_eq!(found, e);
    }

    #[tokio::test]
    async fn duplicate_access_code_is_typed() {
        let ledger = test_ledger().await;
        let e1 = enrollment(ExamId::new(), StudentId::new(), "aaaabbbbcccc", 0);
        let e2 = enrollment(ExamId::new(), StudentId::new(), "aaaabbbbcccc", 0);

        ledger.insert_enrollment(&e1).await.unwrap();
        let err = ledger.insert_enrollment(&e2).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateAccessCode));
    }

    #[tokio::test]
    async fn duplicate_exam_student_is_typed() {
        let ledger = test_ledger().await;
        let exam_id = ExamId::new();
        let student_id = StudentId::new();
        let e1 = enrollment(exam_id, student_id, "aaaabbbbcccc", 0);
        let e2 = enrollment(exam_id, student_id, "ddddeeeeffff", 0);

        ledger.insert_enrollment(&e1).await.unwrap();
        let err = ledger.insert_enrollment(&e2).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEnrollment));
    }

    #[tokio::test]
    async fn cancelled_row_frees_the_pair() {
        let ledger = test_ledger().await;
        let exam_id = ExamId::new();
        let student_id = StudentId::new();
        let e1 = enrollment(exam_id, student_id, "aaaabbbbcccc", 0);
        ledger.insert_enrollment(&e1).await.unwrap();

        assert!(ledger.cancel_enrollment(e1.id).await.unwrap());

        // The partial index no longer covers the cancelled row.
        let e2 = enrollment(exam_id, student_id, "ddddeeeeffff", 0);
        ledger.insert_enrollment(&e2).await.unwrap();

        let active = ledger.find_active(exam_id, student_id).await.unwrap().unwrap();
        assert_eq!(active.id, e2.id);
    }

    #[tokio::test]
    async fn completion_transition_fires_once() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 5_000);
        ledger.insert_enrollment(&e).await.unwrap();

        assert!(ledger
            .complete_payment_if_pending(e.id, "card", Some("txn_1"))
            .await
            .unwrap());
        // Second attempt loses the swap.
        assert!(!ledger
            .complete_payment_if_pending(e.id, "webhook", Some("txn_1"))
            .await
            .unwrap());

        let found = ledger.find(e.id).await.unwrap().unwrap();
        assert_eq!(found.payment_status, PaymentStatus::Completed);
        assert_eq!(found.enrollment_status, EnrollmentStatus::Enrolled);
        assert_eq!(found.payment_method.as_deref(), Some("card"));
        assert_eq!(found.transaction_id.as_deref(), Some("txn_1"));
    }

    #[tokio::test]
    async fn failed_payment_remains_completable() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 5_000);
        ledger.insert_enrollment(&e).await.unwrap();

        assert!(ledger.mark_payment_failed(e.id).await.unwrap());
        assert!(ledger
            .complete_payment_if_pending(e.id, "card", Some("txn_2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn completion_never_revives_cancelled() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 5_000);
        ledger.insert_enrollment(&e).await.unwrap();
        assert!(ledger.cancel_enrollment(e.id).await.unwrap());

        assert!(!ledger
            .complete_payment_if_pending(e.id, "webhook", Some("txn_1"))
            .await
            .unwrap());
        let found = ledger.find(e.id).await.unwrap().unwrap();
        assert_eq!(found.enrollment_status, EnrollmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn redeem_requires_enrolled_and_paid() {
        let ledger = test_ledger().await;
        let pending = enrollment(ExamId::new(), StudentId::new(), "aaaabbbbcccc", 5_000);
        ledger.insert_enrollment(&pending).await.unwrap();
        assert!(!ledger.redeem_access_code(pending.id).await.unwrap());

        let paid = enrollment(ExamId::new(), StudentId::new(), "ddddeeeeffff", 0);
        ledger.insert_enrollment(&paid).await.unwrap();
        assert!(ledger.redeem_access_code(paid.id).await.unwrap());
        // Burned codes stay burned.
        assert!(!ledger.redeem_access_code(paid.id).await.unwrap());

        let found = ledger.find(paid.id).await.unwrap().unwrap();
        assert!(found.access_code_used);
        assert!(found.access_code_used_at.is_some());
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 0);
        ledger.insert_enrollment(&e).await.unwrap();

        assert!(ledger.cancel_enrollment(e.id).await.unwrap());
        assert!(!ledger.cancel_enrollment(e.id).await.unwrap());
    }

    #[tokio::test]
    async fn seat_count_excludes_cancelled() {
        let ledger = test_ledger().await;
        let exam_id = ExamId::new();

        let a = enrollment(exam_id, StudentId::new(), "aaaabbbbcccc", 0);
        let b = enrollment(exam_id, StudentId::new(), "ddddeeeeffff", 5_000);
        let c = enrollment(exam_id, StudentId::new(), "111122223333", 0);
        for e in [&a, &b, &c] {
            ledger.insert_enrollment(e).await.unwrap();
        }
        ledger.cancel_enrollment(c.id).await.unwrap();

        assert_eq!(ledger.count_seated(exam_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn transaction_lookup_matches_reference_too() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 5_000);
        ledger.insert_enrollment(&e).await.unwrap();
        ledger
            .set_payment_initialized(e.id, "txn_9", Some("ref_9"))
            .await
            .unwrap();

        assert!(ledger.find_by_transaction("txn_9").await.unwrap().is_some());
        assert!(ledger.find_by_transaction("ref_9").await.unwrap().is_some());
        assert!(ledger.find_by_transaction("txn_other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payment_initialized_only_once() {
        let ledger = test_ledger().await;
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 5_000);
        ledger.insert_enrollment(&e).await.unwrap();

        assert!(ledger
            .set_payment_initialized(e.id, "txn_1", None)
            .await
            .unwrap());
        assert!(!ledger
            .set_payment_initialized(e.id, "txn_2", None)
            .await
            .unwrap());

        let found = ledger.find(e.id).await.unwrap().unwrap();
        assert_eq!(found.transaction_id.as_deref(), Some("txn_1"));
    }

    #[tokio::test]
    async fn aggregation_groups_by_status_pair() {
        let ledger = test_ledger().await;
        let exam_id = ExamId::new();

        let free = enrollment(exam_id, StudentId::new(), "aaaabbbbcccc", 0);
        let paid = enrollment(exam_id, StudentId::new(), "ddddeeeeffff", 10_000);
        let pending = enrollment(exam_id, StudentId::new(), "111122223333", 7_500);
        for e in [&free, &paid, &pending] {
            ledger.insert_enrollment(e).await.unwrap();
        }
        ledger
            .complete_payment_if_pending(paid.id, "card", Some("txn_1"))
            .await
            .unwrap();

        let rows = ledger.aggregate_status_rows(exam_id).await.unwrap();
        let completed_amount: i64 = rows
            .iter()
            .filter(|(s, p, _, _)| {
                *s == EnrollmentStatus::Enrolled && *p == PaymentStatus::Completed
            })
            .map(|(_, _, _, amount)| amount)
            .sum();
        assert_eq!(completed_amount, 10_000);

        let pending_count: i64 = rows
            .iter()
            .filter(|(_, p, _, _)| *p == PaymentStatus::Pending)
            .map(|(_, _, n, _)| n)
            .sum();
        assert_eq!(pending_count, 1);
    }

    #[tokio::test]
    async fn exam_and_student_roundtrip() {
        let ledger = test_ledger().await;
        let exam = ExamRecord {
            id: ExamId::new(),
            center_id: CenterId::new(),
            title: "Chemistry midterm".into(),
            lifecycle: ExamLifecycle::Active,
            starts_at: Some(1_000),
            ends_at: Some(2_000),
            enrollment: EnrollmentConfig {
                fee_minor: 12_000,
                max_enrollments: 30,
                ..Default::default()
            },
            stats: EnrollmentStats::default(),
        };
        ledger.upsert_exam(&exam).await.unwrap();
        assert_eq!(ledger.exam(exam.id).await.unwrap().unwrap(), exam);

        let student = StudentRecord {
            id: StudentId::new(),
            center_id: exam.center_id,
            role: Role::Student,
            display_name: Some("Dana".into()),
        };
        ledger.upsert_student(&student).await.unwrap();
        assert_eq!(ledger.student(student.id).await.unwrap().unwrap(), student);
    }

    #[tokio::test]
    async fn stats_write_back() {
        let ledger = test_ledger().await;
        let exam = ExamRecord {
            id: ExamId::new(),
            center_id: CenterId::new(),
            title: "History final".into(),
            lifecycle: ExamLifecycle::Scheduled,
            starts_at: None,
            ends_at: None,
            enrollment: EnrollmentConfig::default(),
            stats: EnrollmentStats::default(),
        };
        ledger.upsert_exam(&exam).await.unwrap();

        let stats = EnrollmentStats {
            total_enrollments: 12,
            active_enrollments: 9,
            pending_payments: 3,
            total_revenue: 90_000,
        };
        ledger.write_stats(exam.id, &stats).await.unwrap();

        let found = ledger.exam(exam.id).await.unwrap().unwrap();
        assert_eq!(found.stats, stats);
    }

    #[tokio::test]
    async fn open_creates_file_backed_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");

        let ledger = EnrollmentLedger::open(&path).await.unwrap();
        let e = enrollment(ExamId::new(), StudentId::new(), "a1b2c3d4e5f6", 0);
        ledger.insert_enrollment(&e).await.unwrap();
        assert!(ledger.find(e.id).await.unwrap().is_some());
        assert!(path.exists());
    }
}

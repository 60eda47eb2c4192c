//! Persistence boundary for tests and attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::test::Test;
use crate::models::test_attempt::{AnswerMap, AttemptStatus, FileMap, TestAttempt};

/// Extra columns written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    /// Only applied if the attempt has no `submitted_at` yet.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Merged into the stored answers.
    pub answers: Option<AnswerMap>,
    pub score: Option<Decimal>,
    pub feedback: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// An in-progress attempt together with the timing fields of its test.
#[derive(Debug, Clone)]
pub struct ExpiredAttempt {
    pub attempt: TestAttempt,
    pub due_date: DateTime<Utc>,
    pub time_limit_minutes: Option<i32>,
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn get_test(&self, test_id: Uuid) -> Result<Test>;

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<TestAttempt>;

    async fn find_attempt_for_student(
        &self,
        test_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<TestAttempt>>;

    /// Inserts `attempt`, or returns the existing one for the same
    /// (test, student) pair.
    async fn create_attempt(&self, attempt: &TestAttempt) -> Result<TestAttempt>;

    /// Merges answers and file references into an IN_PROGRESS attempt.
    ///
    /// Returns `false` without writing if the attempt is no longer
    /// IN_PROGRESS.
    async fn save_progress(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        files: &FileMap,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically moves `attempt_id` from `from` to `to`.
    ///
    /// Returns `false` if the stored status was not `from`; nothing is
    /// written in that case.
    async fn update_attempt_status(
        &self,
        attempt_id: Uuid,
        from: AttemptStatus,
        to: AttemptStatus,
        fields: &TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// IN_PROGRESS attempts whose due date or time limit lies before `now`.
    async fn find_expired_in_progress_attempts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAttempt>>;
}

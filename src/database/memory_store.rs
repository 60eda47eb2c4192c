use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::database::attempt_store::{AttemptStore, ExpiredAttempt, TransitionFields};
use crate::error::{Error, Result};
use crate::models::test::Test;
use crate::models::test_attempt::{AnswerMap, AttemptStatus, FileMap, TestAttempt};

/// In-memory store for tests and local prototyping.
///
/// Each operation holds a single lock, so conditional updates are atomic
/// just like their SQL counterparts.
#[derive(Clone, Default)]
pub struct MemoryAttemptStore {
    tests: Arc<Mutex<HashMap<Uuid, Test>>>,
    attempts: Arc<Mutex<HashMap<Uuid, TestAttempt>>>,
    unavailable: Arc<AtomicBool>,
    reads_fail_after_write: Arc<AtomicBool>,
    status_writes: Arc<AtomicUsize>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_test(&self, test: Test) {
        lock(&self.tests).insert(test.id, test);
    }

    pub fn insert_attempt(&self, attempt: TestAttempt) {
        lock(&self.attempts).insert(attempt.id, attempt);
    }

    /// Simulates a storage outage: every operation fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `get_attempt` fail once any status transition has been written.
    pub fn fail_reads_after_write(&self, fail: bool) {
        self.reads_fail_after_write.store(fail, Ordering::SeqCst);
    }

    /// Number of successful status transitions written so far.
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("attempt store is offline".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn get_test(&self, test_id: Uuid) -> Result<Test> {
        self.check_available()?;
        lock(&self.tests)
            .get(&test_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<TestAttempt> {
        self.check_available()?;
        if self.reads_fail_after_write.load(Ordering::SeqCst) && self.status_writes() > 0 {
            return Err(Error::Unavailable("attempt read failed".to_string()));
        }
        lock(&self.attempts)
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    async fn find_attempt_for_student(
        &self,
        test_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<TestAttempt>> {
        self.check_available()?;
        Ok(lock(&self.attempts)
            .values()
            .find(|a| a.test_id == test_id && a.student_id == student_id)
            .cloned())
    }

    async fn create_attempt(&self, attempt: &TestAttempt) -> Result<TestAttempt> {
        self.check_available()?;
        let mut attempts = lock(&self.attempts);
        if let Some(existing) = attempts
            .values()
            .find(|a| a.test_id == attempt.test_id && a.student_id == attempt.student_id)
        {
            return Ok(existing.clone());
        }
        attempts.insert(attempt.id, attempt.clone());
        Ok(attempt.clone())
    }

    async fn save_progress(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        files: &FileMap,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut attempts = lock(&self.attempts);
        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        if attempt.status != AttemptStatus::InProgress {
            return Ok(false);
        }
        attempt
            .answers
            .extend(answers.iter().map(|(k, v)| (k.clone(), v.clone())));
        attempt
            .file_uploads
            .extend(files.iter().map(|(k, v)| (k.clone(), v.clone())));
        attempt.updated_at = Some(now);
        Ok(true)
    }

    async fn update_attempt_status(
        &self,
        attempt_id: Uuid,
        from: AttemptStatus,
        to: AttemptStatus,
        fields: &TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut attempts = lock(&self.attempts);
        let Some(attempt) = attempts.get_mut(&attempt_id) else {
            return Ok(false);
        };
        if attempt.status != from || !from.can_transition_to(to) {
            return Ok(false);
        }

        attempt.status = to;
        if attempt.submitted_at.is_none() {
            attempt.submitted_at = fields.submitted_at;
        }
        if let Some(answers) = &fields.answers {
            attempt
                .answers
                .extend(answers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if fields.score.is_some() {
            attempt.score = fields.score;
        }
        if fields.feedback.is_some() {
            attempt.feedback = fields.feedback.clone();
        }
        if fields.graded_at.is_some() {
            attempt.graded_at = fields.graded_at;
        }
        attempt.updated_at = Some(now);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn find_expired_in_progress_attempts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAttempt>> {
        self.check_available()?;
        let tests = lock(&self.tests);
        let attempts = lock(&self.attempts);

        let mut expired: Vec<ExpiredAttempt> = attempts
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .filter_map(|a| {
                let test = tests.get(&a.test_id)?;
                let past_due = test.due_date < now;
                let past_limit = test.time_limit_minutes.is_some_and(|limit| {
                    a.started_at + Duration::minutes(i64::from(limit)) < now
                });
                (past_due || past_limit).then(|| ExpiredAttempt {
                    attempt: a.clone(),
                    due_date: test.due_date,
                    time_limit_minutes: test.time_limit_minutes,
                })
            })
            .collect();
        expired.sort_by_key(|e| e.attempt.started_at);
        Ok(expired)
    }
}

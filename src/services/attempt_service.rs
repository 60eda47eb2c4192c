use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::database::attempt_store::{AttemptStore, TransitionFields};
use crate::error::{Error, Result};
use crate::models::test::Test;
use crate::models::test_attempt::{AnswerMap, AttemptStatus, FileMap, TestAttempt};
use crate::services::deadline::{remaining_or_zero, AttemptWindow, DeadlineError};
use crate::services::notification_service::{
    GradedEvent, SubmissionEvent, SubmissionNotifier, SubmitTrigger,
};
use crate::services::session_tracker::{SessionProgress, SessionTracker};
use crate::utils::clock::Clock;

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn AttemptStore>,
    notifier: Arc<dyn SubmissionNotifier>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct StartedAttempt {
    pub attempt: TestAttempt,
    pub test: Test,
    pub resumed: bool,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub attempt: TestAttempt,
    /// The attempt was already finalized; this call changed nothing.
    pub already_submitted: bool,
    pub late: bool,
    /// Final answers arrived after the deadline and were not stored.
    pub answers_discarded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptStatusView {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub student_id: Uuid,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
    pub time_limit_minutes: Option<i32>,
    pub remaining_seconds: i64,
    pub late: Option<bool>,
    pub progress: SessionProgress,
    pub score: Option<Decimal>,
    pub feedback: Option<String>,
}

impl AttemptService {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        notifier: Arc<dyn SubmissionNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Timing window of an attempt on its test.
    pub fn window(
        attempt: &TestAttempt,
        test: &Test,
    ) -> std::result::Result<AttemptWindow, DeadlineError> {
        AttemptWindow::new(attempt.started_at, test.time_limit_minutes, test.due_date)
    }

    /// Unusable timing data counts as ended.
    fn has_ended(attempt: &TestAttempt, test: &Test, now: DateTime<Utc>) -> bool {
        Self::window(attempt, test).map_or(true, |w| w.has_ended(now))
    }

    pub async fn attempt_with_test(&self, attempt_id: Uuid) -> Result<(TestAttempt, Test)> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        let test = self.store.get_test(attempt.test_id).await?;
        Ok((attempt, test))
    }

    pub async fn start_attempt(&self, test_id: Uuid, student_id: Uuid) -> Result<StartedAttempt> {
        let test = self.store.get_test(test_id).await?;
        let now = self.clock.now();

        if let Some(existing) = self.store.find_attempt_for_student(test_id, student_id).await? {
            tracing::info!(attempt_id = %existing.id, %test_id, %student_id, "resuming attempt");
            let remaining_seconds = self.remaining_for(&existing, &test, now);
            return Ok(StartedAttempt {
                attempt: existing,
                test,
                resumed: true,
                remaining_seconds,
            });
        }

        if now >= test.due_date {
            return Err(Error::Conflict(format!(
                "Test '{}' closed at {}",
                test.title, test.due_date
            )));
        }

        let candidate = TestAttempt::new(test_id, student_id, now);
        let attempt = self.store.create_attempt(&candidate).await?;
        // A concurrent start for the same pair may have won the insert.
        let resumed = attempt.id != candidate.id;
        tracing::info!(attempt_id = %attempt.id, %test_id, %student_id, resumed, "attempt started");
        let remaining_seconds = self.remaining_for(&attempt, &test, now);

        Ok(StartedAttempt {
            attempt,
            test,
            resumed,
            remaining_seconds,
        })
    }

    /// Persists the tracker state of an in-progress attempt.
    pub async fn save_progress(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        files: &FileMap,
    ) -> Result<TestAttempt> {
        let (attempt, test) = self.attempt_with_test(attempt_id).await?;
        let now = self.clock.now();

        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::Conflict(format!(
                "Attempt is {}, answers can no longer change",
                attempt.status
            )));
        }
        if Self::has_ended(&attempt, &test, now) {
            self.finalize(&attempt, &test, None, SubmitTrigger::AutoSubmit, now)
                .await?;
            return Err(Error::Conflict(
                "Time is up, the attempt has been submitted".to_string(),
            ));
        }

        if !self
            .store
            .save_progress(attempt_id, answers, files, now)
            .await?
        {
            return Err(Error::Conflict(
                "Attempt was submitted while saving".to_string(),
            ));
        }
        tracing::debug!(%attempt_id, answers = answers.len(), files = files.len(), "progress saved");
        self.store.get_attempt(attempt_id).await
    }

    /// Explicit submission by the student. Repeating it is a no-op.
    ///
    /// Once the deadline has passed the attempt is still finalized, but
    /// answers sent with the request are dropped.
    pub async fn submit(&self, attempt_id: Uuid, answers: Option<AnswerMap>) -> Result<SubmitOutcome> {
        let (attempt, test) = self.attempt_with_test(attempt_id).await?;
        let now = self.clock.now();

        let expired = attempt.status == AttemptStatus::InProgress
            && Self::has_ended(&attempt, &test, now);
        let answers_discarded = expired && answers.as_ref().is_some_and(|a| !a.is_empty());
        if answers_discarded {
            tracing::info!(%attempt_id, "deadline passed, final answers not accepted");
        }
        let answers = if expired { None } else { answers };

        let mut outcome = self
            .finalize(&attempt, &test, answers, SubmitTrigger::Student, now)
            .await?;
        outcome.answers_discarded = answers_discarded;
        Ok(outcome)
    }

    /// Submits the attempt if its deadline has passed. Returns `None` if
    /// there is still time left.
    pub async fn finalize_if_expired(&self, attempt_id: Uuid) -> Result<Option<SubmitOutcome>> {
        let (attempt, test) = self.attempt_with_test(attempt_id).await?;
        let now = self.clock.now();
        if !Self::has_ended(&attempt, &test, now) {
            return Ok(None);
        }
        self.finalize(&attempt, &test, None, SubmitTrigger::AutoSubmit, now)
            .await
            .map(Some)
    }

    async fn finalize(
        &self,
        attempt: &TestAttempt,
        test: &Test,
        answers: Option<AnswerMap>,
        trigger: SubmitTrigger,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let fields = TransitionFields {
            submitted_at: Some(now),
            answers,
            ..Default::default()
        };
        let transitioned = self
            .store
            .update_attempt_status(
                attempt.id,
                AttemptStatus::InProgress,
                AttemptStatus::Submitted,
                &fields,
                now,
            )
            .await?;

        if transitioned {
            let submitted_at = attempt.submitted_at.unwrap_or(now);
            let late = submitted_at > test.due_date;
            tracing::info!(attempt_id = %attempt.id, ?trigger, late, "attempt submitted");
            let event = SubmissionEvent {
                attempt_id: attempt.id,
                test_id: attempt.test_id,
                student_id: attempt.student_id,
                trigger,
                submitted_at,
                late,
            };
            if let Err(e) = self.notifier.attempt_submitted(&event).await {
                tracing::warn!(attempt_id = %attempt.id, error = ?e, "failed to enqueue submission notification");
            }
        }

        let current = self.store.get_attempt(attempt.id).await?;
        let late = current.is_late(test.due_date).unwrap_or(false);
        if !transitioned {
            tracing::debug!(attempt_id = %attempt.id, status = %current.status, "attempt already finalized");
        }

        Ok(SubmitOutcome {
            attempt: current,
            already_submitted: !transitioned,
            late,
            answers_discarded: false,
        })
    }

    /// Records a grade produced by the grading step.
    pub async fn mark_graded(
        &self,
        attempt_id: Uuid,
        score: Decimal,
        feedback: Option<String>,
    ) -> Result<TestAttempt> {
        let now = self.clock.now();
        let fields = TransitionFields {
            score: Some(score),
            feedback: feedback.clone(),
            graded_at: Some(now),
            ..Default::default()
        };
        let transitioned = self
            .store
            .update_attempt_status(
                attempt_id,
                AttemptStatus::Submitted,
                AttemptStatus::Graded,
                &fields,
                now,
            )
            .await?;
        let current = self.store.get_attempt(attempt_id).await?;
        if !transitioned {
            return Err(Error::Conflict(format!(
                "Only submitted attempts can be graded, attempt is {}",
                current.status
            )));
        }

        let event = GradedEvent {
            attempt_id,
            student_id: current.student_id,
            score,
            feedback,
        };
        if let Err(e) = self.notifier.attempt_graded(&event).await {
            tracing::warn!(%attempt_id, error = ?e, "failed to enqueue grade notification");
        }
        Ok(current)
    }

    pub async fn status(&self, attempt_id: Uuid) -> Result<AttemptStatusView> {
        let (attempt, test) = self.attempt_with_test(attempt_id).await?;
        let now = self.clock.now();
        let tracker = SessionTracker::from_attempt(test.question_ids(), &attempt);

        Ok(AttemptStatusView {
            attempt_id: attempt.id,
            test_id: attempt.test_id,
            student_id: attempt.student_id,
            status: attempt.status,
            started_at: attempt.started_at,
            submitted_at: attempt.submitted_at,
            due_date: test.due_date,
            time_limit_minutes: test.time_limit_minutes,
            remaining_seconds: self.remaining_for(&attempt, &test, now),
            late: attempt.is_late(test.due_date),
            progress: tracker.progress(),
            score: attempt.score,
            feedback: attempt.feedback.clone(),
        })
    }

    fn remaining_for(&self, attempt: &TestAttempt, test: &Test, now: DateTime<Utc>) -> i64 {
        if attempt.status.is_terminal_for_student() {
            return 0;
        }
        remaining_or_zero(&Self::window(attempt, test), now)
    }
}

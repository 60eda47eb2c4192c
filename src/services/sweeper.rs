//! Server-side auto-submission of attempts whose deadline passed unnoticed
//! (closed tab, lost connection).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::database::attempt_store::{AttemptStore, ExpiredAttempt, TransitionFields};
use crate::error::Result;
use crate::models::test_attempt::AttemptStatus;
use crate::services::deadline::AttemptWindow;
use crate::services::notification_service::{SubmissionEvent, SubmissionNotifier, SubmitTrigger};
use crate::utils::clock::Clock;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub submitted: usize,
    /// Already finalized by someone else between selection and update.
    pub conflicts: usize,
    pub not_yet_due: usize,
    pub failed: usize,
    /// The pass did not run because another one was in progress.
    pub overlapped: bool,
}

#[derive(Clone)]
pub struct AutoSubmitSweeper {
    store: Arc<dyn AttemptStore>,
    notifier: Arc<dyn SubmissionNotifier>,
    clock: Arc<dyn Clock>,
    running: Arc<Mutex<()>>,
}

impl AutoSubmitSweeper {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        notifier: Arc<dyn SubmissionNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Runs one pass. A pass requested while another is running is skipped.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::info!("sweep already running, skipping this trigger");
            return Ok(SweepReport {
                overlapped: true,
                ..Default::default()
            });
        };

        let now = self.clock.now();
        let candidates = self.store.find_expired_in_progress_attempts(now).await?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            match self.finalize(&candidate, now).await {
                Ok(Finalized::Submitted) => report.submitted += 1,
                Ok(Finalized::Conflict) => report.conflicts += 1,
                Ok(Finalized::NotYetDue) => report.not_yet_due += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        attempt_id = %candidate.attempt.id,
                        error = ?e,
                        "auto-submit failed"
                    );
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            submitted = report.submitted,
            conflicts = report.conflicts,
            failed = report.failed,
            "sweep finished"
        );
        Ok(report)
    }

    async fn finalize(&self, candidate: &ExpiredAttempt, now: chrono::DateTime<chrono::Utc>) -> Result<Finalized> {
        let attempt = &candidate.attempt;
        let window = AttemptWindow::new(
            attempt.started_at,
            candidate.time_limit_minutes,
            candidate.due_date,
        );
        // Unusable timing data ends the attempt.
        let due = match window {
            Ok(window) => window.has_ended(now),
            Err(e) => {
                tracing::warn!(attempt_id = %attempt.id, error = %e, "invalid deadline data, submitting");
                true
            }
        };
        if !due {
            return Ok(Finalized::NotYetDue);
        }

        let fields = TransitionFields {
            submitted_at: Some(now),
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
        if !transitioned {
            tracing::debug!(attempt_id = %attempt.id, "attempt already finalized");
            return Ok(Finalized::Conflict);
        }

        tracing::info!(attempt_id = %attempt.id, test_id = %attempt.test_id, "attempt auto-submitted");
        let event = SubmissionEvent {
            attempt_id: attempt.id,
            test_id: attempt.test_id,
            student_id: attempt.student_id,
            trigger: SubmitTrigger::AutoSubmit,
            submitted_at: now,
            late: now > candidate.due_date,
        };
        if let Err(e) = self.notifier.attempt_submitted(&event).await {
            tracing::warn!(attempt_id = %attempt.id, error = ?e, "failed to notify student of auto-submit");
        }
        Ok(Finalized::Submitted)
    }
}

enum Finalized {
    Submitted,
    Conflict,
    NotYetDue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_store::MemoryAttemptStore;
    use crate::error::Error;
    use crate::models::test::Test;
    use crate::models::test_attempt::TestAttempt;
    use crate::services::notification_service::MockSubmissionNotifier;
    use crate::utils::clock::ManualClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 14, 10, 0, 0).unwrap()
    }

    fn seed_test(store: &MemoryAttemptStore, time_limit_minutes: Option<i32>, due_date: DateTime<Utc>) -> Test {
        let test = Test {
            id: Uuid::new_v4(),
            title: "Midterm".into(),
            description: None,
            questions: json!([]),
            time_limit_minutes,
            due_date,
            created_at: None,
            updated_at: None,
        };
        store.insert_test(test.clone());
        test
    }

    fn sweeper(
        store: &MemoryAttemptStore,
        notifier: MockSubmissionNotifier,
        clock: &ManualClock,
    ) -> AutoSubmitSweeper {
        AutoSubmitSweeper::new(
            Arc::new(store.clone()),
            Arc::new(notifier),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn submits_past_due_attempt_once() {
        let store = MemoryAttemptStore::new();
        let test = seed_test(&store, None, t0() - Duration::minutes(5));
        let attempt = TestAttempt::new(test.id, Uuid::new_v4(), t0() - Duration::hours(1));
        store.insert_attempt(attempt.clone());

        let clock = ManualClock::new(t0());
        let mut notifier = MockSubmissionNotifier::new();
        notifier
            .expect_attempt_submitted()
            .withf(|e| e.trigger == SubmitTrigger::AutoSubmit && e.late)
            .times(1)
            .returning(|_| Ok(()));
        let sweeper = sweeper(&store, notifier, &clock);

        let first = sweeper.run_once().await.unwrap();
        assert_eq!(first.examined, 1);
        assert_eq!(first.submitted, 1);

        let stored = store.get_attempt(attempt.id).await.unwrap();
        assert_eq!(stored.status, AttemptStatus::Submitted);
        assert_eq!(stored.submitted_at, Some(t0()));

        clock.advance(Duration::minutes(1));
        let second = sweeper.run_once().await.unwrap();
        assert_eq!(second, SweepReport::default());

        let stored = store.get_attempt(attempt.id).await.unwrap();
        assert_eq!(stored.submitted_at, Some(t0()));
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn time_limit_expiry_submits_before_due_date() {
        let store = MemoryAttemptStore::new();
        let test = seed_test(&store, Some(30), t0() + Duration::days(3));
        let started = t0() - Duration::seconds(1810);
        let expired = TestAttempt::new(test.id, Uuid::new_v4(), started);
        let fresh = TestAttempt::new(test.id, Uuid::new_v4(), t0() - Duration::minutes(5));
        store.insert_attempt(expired.clone());
        store.insert_attempt(fresh.clone());

        let clock = ManualClock::new(t0());
        let mut notifier = MockSubmissionNotifier::new();
        notifier
            .expect_attempt_submitted()
            .withf(|e| !e.late)
            .times(1)
            .returning(|_| Ok(()));

        let report = sweeper(&store, notifier, &clock).run_once().await.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(
            store.get_attempt(fresh.id).await.unwrap().status,
            AttemptStatus::InProgress
        );
    }

    #[tokio::test]
    async fn notifier_failure_keeps_the_submission() {
        let store = MemoryAttemptStore::new();
        let test = seed_test(&store, None, t0() - Duration::seconds(1));
        let attempt = TestAttempt::new(test.id, Uuid::new_v4(), t0() - Duration::hours(2));
        store.insert_attempt(attempt.clone());

        let clock = ManualClock::new(t0());
        let mut notifier = MockSubmissionNotifier::new();
        notifier
            .expect_attempt_submitted()
            .times(1)
            .returning(|_| Err(Error::Internal("webhook down".into())));

        let report = sweeper(&store, notifier, &clock).run_once().await.unwrap();
        assert_eq!(report.submitted, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            store.get_attempt(attempt.id).await.unwrap().status,
            AttemptStatus::Submitted
        );
    }

    #[tokio::test]
    async fn storage_outage_propagates() {
        let store = MemoryAttemptStore::new();
        store.set_unavailable(true);
        let clock = ManualClock::new(t0());
        let err = sweeper(&store, MockSubmissionNotifier::new(), &clock)
            .run_once()
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn overlapping_pass_is_skipped() {
        let store = MemoryAttemptStore::new();
        let clock = ManualClock::new(t0());
        let sweeper = sweeper(&store, MockSubmissionNotifier::new(), &clock);

        let held = sweeper.running.clone();
        let _guard = held.lock().await;
        let report = sweeper.run_once().await.unwrap();
        assert!(report.overlapped);
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn concurrent_student_submit_wins_without_error() {
        let store = MemoryAttemptStore::new();
        let test = seed_test(&store, None, t0() - Duration::minutes(1));
        let attempt = TestAttempt::new(test.id, Uuid::new_v4(), t0() - Duration::hours(1));
        store.insert_attempt(attempt.clone());

        let clock = ManualClock::new(t0());
        let candidates = store.find_expired_in_progress_attempts(t0()).await.unwrap();

        // Student submits between selection and the sweeper's write.
        let student_fields = TransitionFields {
            submitted_at: Some(t0() - Duration::seconds(30)),
            ..Default::default()
        };
        assert!(store
            .update_attempt_status(attempt.id, AttemptStatus::InProgress, AttemptStatus::Submitted, &student_fields, t0())
            .await
            .unwrap());

        let sweeper = sweeper(&store, MockSubmissionNotifier::new(), &clock);
        let outcome = sweeper.finalize(&candidates[0], t0()).await.unwrap();
        assert!(matches!(outcome, Finalized::Conflict));
        assert_eq!(
            store.get_attempt(attempt.id).await.unwrap().submitted_at,
            Some(t0() - Duration::seconds(30))
        );
    }
}

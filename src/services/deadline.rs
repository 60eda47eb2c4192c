//! Remaining-time arithmetic for a test attempt.
//!
//! An attempt ends at the earlier of the test's due date and
//! `started_at + time_limit`. Remaining time is reported in whole seconds
//! and is never negative. Nothing here reads the wall clock; callers pass
//! `now` explicitly.

use chrono::{DateTime, Duration, Utc};

use crate::utils::time::floor_seconds_between;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeadlineError {
    #[error("time limit must not be negative, got {0} minutes")]
    NegativeTimeLimit(i64),

    #[error("time limit of {0} minutes is out of range")]
    OutOfRange(i64),
}

/// Seconds left for an attempt at `now`.
///
/// `max(0, min(limit*60 - floor(elapsed), floor(due - now)))`, with the
/// time-limit term ignored when there is no limit.
pub fn remaining_seconds(
    started_at: DateTime<Utc>,
    time_limit_minutes: Option<i32>,
    due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i64 {
    let due_remaining = floor_seconds_between(now, due_date);
    let remaining = match time_limit_minutes {
        Some(limit) => {
            let elapsed = floor_seconds_between(started_at, now);
            let limit_remaining = i64::from(limit) * 60 - elapsed;
            limit_remaining.min(due_remaining)
        }
        None => due_remaining,
    };
    remaining.max(0)
}

/// Validated timing inputs of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptWindow {
    started_at: DateTime<Utc>,
    time_limit_minutes: Option<i32>,
    due_date: DateTime<Utc>,
}

impl AttemptWindow {
    pub fn new(
        started_at: DateTime<Utc>,
        time_limit_minutes: Option<i32>,
        due_date: DateTime<Utc>,
    ) -> Result<Self, DeadlineError> {
        if let Some(limit) = time_limit_minutes {
            if limit < 0 {
                return Err(DeadlineError::NegativeTimeLimit(i64::from(limit)));
            }
            started_at
                .checked_add_signed(Duration::minutes(i64::from(limit)))
                .ok_or(DeadlineError::OutOfRange(i64::from(limit)))?;
        }
        Ok(Self {
            started_at,
            time_limit_minutes,
            due_date,
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn time_limit_minutes(&self) -> Option<i32> {
        self.time_limit_minutes
    }

    pub fn due_date(&self) -> DateTime<Utc> {
        self.due_date
    }

    /// The instant the attempt must be finished by.
    pub fn end_time(&self) -> DateTime<Utc> {
        match self.time_limit_minutes {
            Some(limit) => {
                // Range was checked in `new`.
                let by_limit = self.started_at + Duration::minutes(i64::from(limit));
                by_limit.min(self.due_date)
            }
            None => self.due_date,
        }
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time()
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        remaining_seconds(self.started_at, self.time_limit_minutes, self.due_date, now)
    }
}

/// Anything that can report remaining seconds at a given instant.
pub trait RemainingTime: Send + Sync + 'static {
    fn remaining_at(&self, now: DateTime<Utc>) -> Result<i64, DeadlineError>;
}

impl RemainingTime for AttemptWindow {
    fn remaining_at(&self, now: DateTime<Utc>) -> Result<i64, DeadlineError> {
        Ok(self.remaining_seconds(now))
    }
}

/// A window that failed validation keeps reporting its error.
impl RemainingTime for Result<AttemptWindow, DeadlineError> {
    fn remaining_at(&self, now: DateTime<Utc>) -> Result<i64, DeadlineError> {
        match self {
            Ok(window) => Ok(window.remaining_seconds(now)),
            Err(err) => Err(err.clone()),
        }
    }
}

/// Remaining seconds, or 0 when the inputs cannot be evaluated.
///
/// Bad inputs end the attempt rather than granting unlimited time.
pub fn remaining_or_zero<R: RemainingTime + ?Sized>(source: &R, now: DateTime<Utc>) -> i64 {
    match source.remaining_at(now) {
        Ok(remaining) => remaining,
        Err(err) => {
            tracing::warn!(error = %err, "invalid deadline input, treating remaining time as zero");
            0
        }
    }
}

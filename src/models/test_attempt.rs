use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Answers keyed by question id. Value shape depends on the question type.
pub type AnswerMap = HashMap<String, JsonValue>;

/// Uploaded file references keyed by question id.
pub type FileMap = HashMap<String, String>;

/// Stored lifecycle state of an attempt.
///
/// Lateness is not a state: see [`TestAttempt::is_late`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::Graded => "GRADED",
        }
    }

    pub fn is_terminal_for_student(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }

    /// Forward-only transitions: IN_PROGRESS -> SUBMITTED -> GRADED.
    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        matches!(
            (self, next),
            (AttemptStatus::InProgress, AttemptStatus::Submitted)
                | (AttemptStatus::Submitted, AttemptStatus::Graded)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attempt status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AttemptStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(AttemptStatus::InProgress),
            "SUBMITTED" => Ok(AttemptStatus::Submitted),
            "GRADED" => Ok(AttemptStatus::Graded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One student's attempt at one test (stored in `test_submissions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAttempt {
    pub id: Uuid,
    pub test_id: Uuid,
    pub student_id: Uuid,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub answers: AnswerMap,
    pub file_uploads: FileMap,
    pub score: Option<rust_decimal::Decimal>,
    pub feedback: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TestAttempt {
    pub fn new(test_id: Uuid, student_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            student_id,
            status: AttemptStatus::InProgress,
            started_at,
            submitted_at: None,
            answers: AnswerMap::new(),
            file_uploads: FileMap::new(),
            score: None,
            feedback: None,
            graded_at: None,
            created_at: Some(started_at),
            updated_at: Some(started_at),
        }
    }

    /// `None` while the attempt has not been submitted.
    pub fn is_late(&self, due_date: DateTime<Utc>) -> Option<bool> {
        self.submitted_at.map(|at| at > due_date)
    }
}

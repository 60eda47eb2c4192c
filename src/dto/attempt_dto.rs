use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::test_attempt::{AnswerMap, AttemptStatus, FileMap};

const MAX_ENTRIES: usize = 500;

fn validate_answer_keys(answers: &AnswerMap) -> Result<(), ValidationError> {
    check_keys(answers.len(), answers.keys())
}

fn validate_file_keys(files: &FileMap) -> Result<(), ValidationError> {
    check_keys(files.len(), files.keys())?;
    if files.values().any(|path| path.trim().is_empty()) {
        return Err(ValidationError::new("empty_file_reference"));
    }
    Ok(())
}

fn check_keys<'a>(len: usize, mut keys: impl Iterator<Item = &'a String>) -> Result<(), ValidationError> {
    if len > MAX_ENTRIES {
        return Err(ValidationError::new("too_many_entries"));
    }
    if keys.any(|k| k.trim().is_empty()) {
        return Err(ValidationError::new("empty_question_id"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptRequest {
    pub student_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub status: AttemptStatus,
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub time_limit_minutes: Option<i32>,
    pub remaining_seconds: i64,
    pub questions: JsonValue,
    pub answers: AnswerMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveProgressRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_answer_keys"))]
    pub answers: AnswerMap,
    #[serde(default)]
    #[validate(custom(function = "validate_file_keys"))]
    pub files: FileMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveProgressResponse {
    pub saved: bool,
    pub attempt_id: Uuid,
    pub saved_answers: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_answer_keys"))]
    pub answers: AnswerMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub already_submitted: bool,
    pub late: bool,
    /// Answers sent after the time limit are not stored.
    pub answers_discarded: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradeAttemptRequest {
    #[validate(range(min = 0.0, max = 1000.0))]
    pub score: f64,
    #[validate(length(max = 5000))]
    pub feedback: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_question_ids_are_rejected() {
        let req: SaveProgressRequest = serde_json::from_value(json!({
            "answers": { " ": "x" }
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let ok: SaveProgressRequest = serde_json::from_value(json!({
            "answers": { "q1": "x" },
            "files": { "q2": "uploads/essay.pdf" }
        }))
        .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn empty_file_reference_is_rejected() {
        let req: SaveProgressRequest = serde_json::from_value(json!({
            "files": { "q2": "" }
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn grade_score_must_be_in_range() {
        let req = GradeAttemptRequest {
            score: -1.0,
            feedback: None,
        };
        assert!(req.validate().is_err());
    }
}

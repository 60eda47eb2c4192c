use serde_json::Value as JsonValue;

use crate::models::test_attempt::{AnswerMap, TestAttempt};

/// In-memory view of an attempt while the student is answering.
///
/// Not durable: state only survives through an explicit save-progress call.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    question_ids: Vec<String>,
    current_index: usize,
    answers: AnswerMap,
}

/// Snapshot for status responses.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionProgress {
    pub current_index: usize,
    pub answered: usize,
    pub total: usize,
    pub percentage: f64,
}

impl SessionTracker {
    pub fn new(question_ids: Vec<String>) -> Self {
        Self {
            question_ids,
            current_index: 0,
            answers: AnswerMap::new(),
        }
    }

    /// Rehydrates a tracker from a stored attempt.
    pub fn from_attempt(question_ids: Vec<String>, attempt: &TestAttempt) -> Self {
        Self {
            question_ids,
            current_index: 0,
            answers: attempt.answers.clone(),
        }
    }

    pub fn question_count(&self) -> usize {
        self.question_ids.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question_id(&self) -> Option<&str> {
        self.question_ids.get(self.current_index).map(String::as_str)
    }

    /// Moves to `index`. Out-of-range indices are ignored.
    pub fn select_question(&mut self, index: usize) -> bool {
        if index >= self.question_ids.len() {
            return false;
        }
        self.current_index = index;
        true
    }

    pub fn next_question(&mut self) -> bool {
        self.select_question(self.current_index.saturating_add(1))
    }

    pub fn previous_question(&mut self) -> bool {
        match self.current_index.checked_sub(1) {
            Some(index) => self.select_question(index),
            None => false,
        }
    }

    /// Upserts an answer. The value is not checked against the question type.
    pub fn record_answer(&mut self, question_id: impl Into<String>, value: JsonValue) {
        self.answers.insert(question_id.into(), value);
    }

    pub fn answer(&self, question_id: &str) -> Option<&JsonValue> {
        self.answers.get(question_id)
    }

    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|v| !is_empty_answer(v)).count()
    }

    pub fn progress_percentage(&self) -> f64 {
        let total = self.question_ids.len();
        if total == 0 {
            return 0.0;
        }
        (self.answered_count() as f64 / total as f64 * 100.0).min(100.0)
    }

    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            current_index: self.current_index,
            answered: self.answered_count(),
            total: self.question_count(),
            percentage: self.progress_percentage(),
        }
    }
}

fn is_empty_answer(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}

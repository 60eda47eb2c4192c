use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Test {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub questions: JsonValue,
    pub time_limit_minutes: Option<i32>,
    pub due_date: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Test {
    /// Ids of the questions on the test, in order.
    ///
    /// Only the `id` of each entry is read, so an entry of a type this
    /// service does not know still counts toward progress.
    pub fn question_ids(&self) -> Vec<String> {
        self.questions
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|q| q.get("id").and_then(JsonValue::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_questions(questions: JsonValue) -> Test {
        Test {
            id: Uuid::new_v4(),
            title: "Chemistry".into(),
            description: None,
            questions,
            time_limit_minutes: None,
            due_date: Utc::now(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn unknown_question_types_keep_their_ids() {
        let test = with_questions(json!([
            { "id": "q1", "type": "multiple_choice", "prompt": "pH of water?" },
            { "id": "q2", "type": "matching" },
            { "type": "essay", "prompt": "no id" },
            { "id": "q3" }
        ]));
        assert_eq!(test.question_ids(), vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn non_array_questions_yield_nothing() {
        assert!(with_questions(json!({ "q1": {} })).question_ids().is_empty());
    }
}

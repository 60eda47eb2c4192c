use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::database::attempt_store::{AttemptStore, ExpiredAttempt, TransitionFields};
use crate::error::{Error, Result};
use crate::models::test::Test;
use crate::models::test_attempt::{AnswerMap, AttemptStatus, FileMap, TestAttempt};

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_attempt_row(row: &PgRow) -> Result<TestAttempt> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<AttemptStatus>()
        .map_err(|e| Error::Internal(e.to_string()))?;
    let answers: Json<AnswerMap> = row.try_get("answers")?;
    let file_uploads: Json<FileMap> = row.try_get("file_uploads")?;

    Ok(TestAttempt {
        id: row.try_get("id")?,
        test_id: row.try_get("test_id")?,
        student_id: row.try_get("student_id")?,
        status,
        started_at: row.try_get("started_at")?,
        submitted_at: row.try_get("submitted_at")?,
        answers: answers.0,
        file_uploads: file_uploads.0,
        score: row.try_get("score")?,
        feedback: row.try_get("feedback")?,
        graded_at: row.try_get("graded_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn get_test(&self, test_id: Uuid) -> Result<Test> {
        let test = sqlx::query_as::<_, Test>(
            r#"
            SELECT id, title, description, questions, time_limit_minutes, due_date, created_at, updated_at
            FROM tests WHERE id = $1
            "#,
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;
        test.ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<TestAttempt> {
        let row = sqlx::query(r#"SELECT * FROM test_submissions WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => map_attempt_row(&row),
            None => Err(Error::NotFound(format!("Attempt {} not found", attempt_id))),
        }
    }

    async fn find_attempt_for_student(
        &self,
        test_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<TestAttempt>> {
        let row = sqlx::query(
            r#"SELECT * FROM test_submissions WHERE test_id = $1 AND student_id = $2"#,
        )
        .bind(test_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_attempt_row).transpose()
    }

    async fn create_attempt(&self, attempt: &TestAttempt) -> Result<TestAttempt> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO test_submissions (
                id, test_id, student_id, status, started_at, answers, file_uploads, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $5, $5)
            ON CONFLICT (test_id, student_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.test_id)
        .bind(attempt.student_id)
        .bind(attempt.status.as_str())
        .bind(attempt.started_at)
        .bind(Json(&attempt.answers))
        .bind(Json(&attempt.file_uploads))
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => map_attempt_row(&row),
            None => self
                .find_attempt_for_student(attempt.test_id, attempt.student_id)
                .await?
                .ok_or_else(|| Error::Internal("Attempt vanished after insert conflict".to_string())),
        }
    }

    async fn save_progress(
        &self,
        attempt_id: Uuid,
        answers: &AnswerMap,
        files: &FileMap,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE test_submissions
            SET answers = answers || $2::jsonb,
                file_uploads = file_uploads || $3::jsonb,
                updated_at = $4
            WHERE id = $1 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(attempt_id)
        .bind(Json(answers))
        .bind(Json(files))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_attempt_status(
        &self,
        attempt_id: Uuid,
        from: AttemptStatus,
        to: AttemptStatus,
        fields: &TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            tracing::warn!(%attempt_id, %from, %to, "refusing backward status transition");
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            UPDATE test_submissions
            SET status = $3,
                submitted_at = COALESCE(submitted_at, $4),
                answers = COALESCE(answers || $5::jsonb, answers),
                score = COALESCE($6, score),
                feedback = COALESCE($7, feedback),
                graded_at = COALESCE($8, graded_at),
                updated_at = $9
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(attempt_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(fields.submitted_at)
        .bind(fields.answers.as_ref().map(Json))
        .bind(fields.score)
        .bind(fields.feedback.as_deref())
        .bind(fields.graded_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_expired_in_progress_attempts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*, t.due_date AS test_due_date, t.time_limit_minutes AS test_time_limit_minutes
            FROM test_submissions s
            JOIN tests t ON t.id = s.test_id
            WHERE s.status = 'IN_PROGRESS'
              AND (
                t.due_date < $1
                OR (
                  t.time_limit_minutes IS NOT NULL
                  AND s.started_at + make_interval(mins => t.time_limit_minutes) < $1
                )
              )
            ORDER BY s.started_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ExpiredAttempt {
                    attempt: map_attempt_row(row)?,
                    due_date: row.try_get("test_due_date")?,
                    time_limit_minutes: row.try_get("test_time_limit_minutes")?,
                })
            })
            .collect()
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::notification_log::NotificationLog;

/// A row stuck in `sending` this long (worker crashed mid-delivery) is
/// claimed again.
const SENDING_LEASE_SECS: f64 = 300.0;

/// Who finalized an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Student,
    AutoSubmit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub student_id: Uuid,
    pub trigger: SubmitTrigger,
    pub submitted_at: DateTime<Utc>,
    pub late: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedEvent {
    pub attempt_id: Uuid,
    pub student_id: Uuid,
    pub score: Decimal,
    pub feedback: Option<String>,
}

/// Informs students about finalized attempts.
///
/// Callers treat failures as non-fatal: a failed notification never undoes
/// the transition that triggered it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionNotifier: Send + Sync {
    async fn attempt_submitted(&self, event: &SubmissionEvent) -> Result<()>;

    async fn attempt_graded(&self, event: &GradedEvent) -> Result<()>;
}

/// Outbox-backed notifier: events are queued in `notification_logs` and
/// delivered to a webhook by [`NotificationService::run_once`].
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    target_url: String,
    webhook_secret: String,
}

impl NotificationService {
    pub fn new(pool: PgPool, target_url: String, webhook_secret: String) -> Self {
        Self {
            pool,
            client: Client::new(),
            target_url,
            webhook_secret,
        }
    }

    pub async fn enqueue(
        &self,
        event_type: &str,
        attempt_id: Option<Uuid>,
        payload: &JsonValue,
    ) -> Result<NotificationLog> {
        let row = sqlx::query_as::<_, NotificationLog>(
            r#"
            INSERT INTO notification_logs (event_type, attempt_id, payload, target_url, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
            "#,
        )
        .bind(event_type)
        .bind(attempt_id)
        .bind(payload)
        .bind(&self.target_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn deliver_once(&self, log_id: Uuid) -> Result<()> {
        let log = sqlx::query_as::<_, NotificationLog>(r#"SELECT * FROM notification_logs WHERE id = $1"#)
            .bind(log_id)
            .fetch_one(&self.pool)
            .await?;

        let res = self
            .client
            .post(&log.target_url)
            .header("X-Webhook-Secret", &self.webhook_secret)
            .json(&log.payload)
            .send()
            .await;
        match res {
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                sqlx::query(
                    r#"
                    UPDATE notification_logs
                    SET http_status = $1, response_body = $2,
                        status = CASE WHEN $1 BETWEEN 200 AND 299 THEN 'success' ELSE 'failed' END,
                        attempts = attempts + 1, updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(status)
                .bind(body)
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                sqlx::query(
                    r#"
                    UPDATE notification_logs
                    SET response_body = $1, status = 'failed', attempts = attempts + 1, updated_at = NOW()
                    WHERE id = $2
                    "#,
                )
                .bind(err.to_string())
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Delivers one due notification. Returns `false` when the queue is empty.
    pub async fn run_once(&self) -> Result<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE notification_logs SET status = 'sending', updated_at = NOW()
            WHERE id = (
                SELECT id FROM notification_logs
                WHERE (status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW()))
                   OR (status = 'failed' AND attempts < max_attempts AND next_retry_at <= NOW())
                   OR (status = 'sending' AND updated_at < NOW() - make_interval(secs => $1))
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(SENDING_LEASE_SECS)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = claimed else { return Ok(false) };
        let id: Uuid = row.try_get("id")?;

        if let Err(e) = self.deliver_once(id).await {
            tracing::warn!(notification_id = %id, error = ?e, "notification delivery errored");
            // Never leave a claimed row in 'sending'.
            sqlx::query(
                r#"
                UPDATE notification_logs
                SET response_body = $1, status = 'failed', attempts = attempts + 1, updated_at = NOW()
                WHERE id = $2 AND status = 'sending'
                "#,
            )
            .bind(e.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        // Failed deliveries back off exponentially, capped at one hour.
        sqlx::query(
            r#"
            UPDATE notification_logs
            SET next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts - 1))::int))
            WHERE id = $1 AND status = 'failed' AND attempts < max_attempts
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }
}

#[async_trait]
impl SubmissionNotifier for NotificationService {
    async fn attempt_submitted(&self, event: &SubmissionEvent) -> Result<()> {
        let mut payload = serde_json::to_value(event)?;
        payload["event"] = JsonValue::from("attempt_submitted");
        self.enqueue("attempt_submitted", Some(event.attempt_id), &payload)
            .await?;
        Ok(())
    }

    async fn attempt_graded(&self, event: &GradedEvent) -> Result<()> {
        let mut payload = serde_json::to_value(event)?;
        payload["event"] = JsonValue::from("attempt_graded");
        self.enqueue("attempt_graded", Some(event.attempt_id), &payload)
            .await?;
        Ok(())
    }
}

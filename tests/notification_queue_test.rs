//! Runs against a real database: `DATABASE_URL=... cargo test -- --ignored`.

use std::env;

use lms_backend::services::notification_service::NotificationService;
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

// Nothing listens on the discard port, so every delivery fails fast.
const UNREACHABLE: &str = "http://127.0.0.1:9/hook";

async fn setup_pool() -> PgPool {
    dotenvy::dotenv().ok();
    let url = env::var("DATABASE_URL").expect("DATABASE_URL");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

async fn insert_sending(pool: &PgPool, claimed_minutes_ago: i32) -> Uuid {
    let row = sqlx::query(
        r#"
        INSERT INTO notification_logs (event_type, payload, target_url, status, updated_at)
        VALUES ('attempt_submitted', $1, $2, 'sending', NOW() - make_interval(mins => $3))
        RETURNING id
        "#,
    )
    .bind(json!({ "event": "attempt_submitted" }))
    .bind(UNREACHABLE)
    .bind(claimed_minutes_ago)
    .fetch_one(pool)
    .await
    .expect("insert");
    row.get("id")
}

async fn drain(svc: &NotificationService) {
    for _ in 0..50 {
        if !svc.run_once().await.expect("run_once") {
            break;
        }
    }
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn abandoned_delivery_is_claimed_again() {
    let pool = setup_pool().await;
    let svc = NotificationService::new(pool.clone(), UNREACHABLE.into(), "whsec_test".into());
    let id = insert_sending(&pool, 10).await;

    drain(&svc).await;

    let row = sqlx::query("SELECT status, attempts, next_retry_at FROM notification_logs WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("status"), "failed");
    assert_eq!(row.get::<i32, _>("attempts"), 1);
    assert!(row
        .get::<Option<chrono::DateTime<chrono::Utc>>, _>("next_retry_at")
        .is_some());
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn delivery_in_flight_is_left_alone() {
    let pool = setup_pool().await;
    let svc = NotificationService::new(pool.clone(), UNREACHABLE.into(), "whsec_test".into());
    let id = insert_sending(&pool, 0).await;

    drain(&svc).await;

    let status: String = sqlx::query("SELECT status FROM notification_logs WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("status");
    assert_eq!(status, "sending");
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn enqueued_event_fails_over_to_retry() {
    let pool = setup_pool().await;
    let svc = NotificationService::new(pool.clone(), UNREACHABLE.into(), "whsec_test".into());
    let log = svc
        .enqueue("attempt_graded", None, &json!({ "event": "attempt_graded" }))
        .await
        .unwrap();

    drain(&svc).await;

    let row = sqlx::query("SELECT status, attempts FROM notification_logs WHERE id = $1")
        .bind(log.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("status"), "failed");
    assert_eq!(row.get::<i32, _>("attempts"), 1);
}

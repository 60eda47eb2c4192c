pub mod attempts;
pub mod countdown;
pub mod health;
pub mod sweep;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::AppState;

pub fn router(state: AppState) -> Router {
    let base_routes = Router::new().route("/health", get(health::health));

    let attempt_api = Router::new()
        .route("/api/tests/:test_id/attempts", post(attempts::start_attempt))
        .route("/api/attempts/:id", get(attempts::get_attempt_status))
        .route("/api/attempts/:id/progress", patch(attempts::save_progress))
        .route("/api/attempts/:id/submit", post(attempts::submit_attempt))
        .route("/api/attempts/:id/grade", post(attempts::grade_attempt))
        .route("/api/attempts/:id/countdown", get(countdown::countdown));

    let internal_api = Router::new().route("/api/internal/sweep", post(sweep::run_sweep));

    base_routes
        .merge(attempt_api)
        .merge(internal_api)
        .with_state(state)
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{
    GradeAttemptRequest, SaveProgressRequest, SaveProgressResponse, StartAttemptRequest,
    StartAttemptResponse, SubmitAttemptRequest, SubmitAttemptResponse,
};
use crate::error::{Error, Result};
use crate::AppState;

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Path(test_id): Path<Uuid>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<Response> {
    let started = state
        .attempt_service
        .start_attempt(test_id, payload.student_id)
        .await?;

    let status = if started.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let response = StartAttemptResponse {
        attempt_id: started.attempt.id,
        test_id: started.test.id,
        status: started.attempt.status,
        resumed: started.resumed,
        started_at: started.attempt.started_at,
        due_date: started.test.due_date,
        time_limit_minutes: started.test.time_limit_minutes,
        remaining_seconds: started.remaining_seconds,
        questions: started.test.questions,
        answers: started.attempt.answers,
    };
    Ok((status, Json(response)).into_response())
}

#[axum::debug_handler]
pub async fn get_attempt_status(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let view = state.attempt_service.status(attempt_id).await?;
    Ok(Json(view).into_response())
}

#[axum::debug_handler]
pub async fn save_progress(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SaveProgressRequest>,
) -> Result<Response> {
    payload.validate()?;
    let attempt = state
        .attempt_service
        .save_progress(attempt_id, &payload.answers, &payload.files)
        .await?;

    Ok(Json(SaveProgressResponse {
        saved: true,
        attempt_id: attempt.id,
        saved_answers: attempt.answers.len(),
        updated_at: attempt.updated_at,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    payload: Option<Json<SubmitAttemptRequest>>,
) -> Result<Response> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;
    let answers = (!payload.answers.is_empty()).then_some(payload.answers);

    let outcome = state.attempt_service.submit(attempt_id, answers).await?;
    state.tickers.stop(attempt_id);

    let message = if outcome.already_submitted {
        "Attempt was already submitted"
    } else if outcome.answers_discarded {
        "Time limit reached, answers sent after it were not saved"
    } else if outcome.late {
        "Attempt submitted after the due date"
    } else {
        "Attempt submitted"
    };
    Ok(Json(SubmitAttemptResponse {
        attempt_id: outcome.attempt.id,
        status: outcome.attempt.status,
        submitted_at: outcome.attempt.submitted_at,
        already_submitted: outcome.already_submitted,
        late: outcome.late,
        answers_discarded: outcome.answers_discarded,
        message: message.to_string(),
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn grade_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<GradeAttemptRequest>,
) -> Result<Response> {
    payload.validate()?;
    let score = Decimal::try_from(payload.score)
        .map_err(|_| Error::BadRequest(format!("Invalid score: {}", payload.score)))?
        .round_dp(2);

    let attempt = state
        .attempt_service
        .mark_graded(attempt_id, score, payload.feedback)
        .await?;
    Ok(Json(attempt).into_response())
}

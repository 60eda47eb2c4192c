//! One subscriber's view of an attempt countdown.
//!
//! Ticker signals are forwarded as JSON frames. When the countdown expires
//! the attempt is submitted server side and the outcome is sent as the last
//! frame.

use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::services::attempt_service::AttemptService;
use crate::services::ticker::{TickerReceiver, TickerRegistry, TickerSignal};

const SUBMIT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct CountdownFeed {
    attempts: AttemptService,
    tickers: TickerRegistry,
    retry_delay: Duration,
}

impl CountdownFeed {
    pub fn new(attempts: AttemptService, tickers: TickerRegistry, retry_delay: Duration) -> Self {
        Self {
            attempts,
            tickers,
            retry_delay,
        }
    }

    /// Starts (or restarts) the countdown of an attempt that is still open.
    pub async fn open(&self, attempt_id: Uuid) -> Result<TickerReceiver> {
        let (attempt, test) = self.attempts.attempt_with_test(attempt_id).await?;
        if attempt.status.is_terminal_for_student() {
            return Err(Error::Conflict(format!(
                "Attempt is {}, there is no countdown",
                attempt.status
            )));
        }
        // An invalid window is still started: the ticker reports the error.
        let window = AttemptService::window(&attempt, &test);
        Ok(self.tickers.start(attempt_id, window))
    }

    /// Forwards frames until the countdown ends or `frames` is closed.
    pub async fn pump(
        &self,
        attempt_id: Uuid,
        mut signals: TickerReceiver,
        frames: mpsc::Sender<JsonValue>,
    ) {
        while let Some(signal) = signals.recv().await {
            let expired = matches!(signal, TickerSignal::Expired { .. });
            let frame = match serde_json::to_value(&signal) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(%attempt_id, error = ?e, "cannot encode countdown signal");
                    return;
                }
            };
            if frames.send(frame).await.is_err() {
                tracing::debug!(%attempt_id, "countdown subscriber went away");
                return;
            }
            if expired {
                let outcome = self.submit_on_expiry(attempt_id).await;
                let _ = frames.send(outcome).await;
            }
        }
    }

    /// Submits an expired attempt, retrying while storage is unreachable.
    pub async fn submit_on_expiry(&self, attempt_id: Uuid) -> JsonValue {
        let mut delay = self.retry_delay;
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.attempts.finalize_if_expired(attempt_id).await {
                Ok(Some(outcome)) => {
                    return json!({
                        "submitted": true,
                        "already_submitted": outcome.already_submitted,
                        "late": outcome.late,
                    });
                }
                Ok(None) => {
                    tracing::warn!(%attempt_id, "countdown expired before the stored deadline");
                    return json!({ "submitted": false });
                }
                Err(e) if e.is_recoverable() && attempt < SUBMIT_ATTEMPTS => {
                    tracing::warn!(%attempt_id, error = ?e, attempt, "auto-submit failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(%attempt_id, error = ?e, "auto-submit failed");
                    break;
                }
            }
        }
        json!({
            "submitted": false,
            "error": "Could not submit, please check your connection and retry",
        })
    }
}

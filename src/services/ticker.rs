//! Per-attempt countdown tasks.
//!
//! Each running countdown is a tokio task that recomputes the remaining time
//! once per period and pushes a [`TickerSignal`] to its subscriber. The
//! [`TickerRegistry`] keeps at most one task per attempt: starting a new one
//! cancels the previous one first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::deadline::RemainingTime;
use crate::utils::clock::Clock;

const SIGNAL_BUFFER: usize = 16;

/// What a countdown reports to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TickerSignal {
    Tick { remaining: i64 },
    Expired { expired: bool },
    Failed { error: String },
}

impl TickerSignal {
    pub fn expired() -> Self {
        TickerSignal::Expired { expired: true }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TickerSignal::Tick { .. })
    }
}

/// Receiving end of one countdown.
///
/// Once the countdown is stopped or replaced, `recv` returns `None` even if
/// signals are still buffered.
pub struct TickerReceiver {
    rx: mpsc::Receiver<TickerSignal>,
    cancel: CancellationToken,
}

impl TickerReceiver {
    pub async fn recv(&mut self) -> Option<TickerSignal> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            signal = self.rx.recv() => signal,
        }
    }
}

struct TickerHandle {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct TickerRegistry {
    clock: Arc<dyn Clock>,
    period: Duration,
    active: Arc<Mutex<HashMap<Uuid, TickerHandle>>>,
    next_generation: Arc<AtomicU64>,
}

impl TickerRegistry {
    pub fn new(clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            clock,
            period: period.max(Duration::from_millis(1)),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Starts the countdown for `attempt_id`, replacing any running one.
    ///
    /// The first signal is emitted immediately. The stream ends after a
    /// terminal signal, after [`stop`](Self::stop), or once replaced.
    pub fn start<R: RemainingTime>(&self, attempt_id: Uuid, source: R) -> TickerReceiver {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut active = self.lock_active();
            if let Some(previous) = active.remove(&attempt_id) {
                previous.cancel.cancel();
                tracing::debug!(%attempt_id, generation = previous.generation, "replaced running countdown");
            }
            active.insert(
                attempt_id,
                TickerHandle {
                    generation,
                    cancel: cancel.clone(),
                },
            );
        }

        let registry = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            registry.run(attempt_id, source, tx, task_cancel).await;
            registry.forget(attempt_id, generation);
        });

        TickerReceiver { rx, cancel }
    }

    /// Stops the countdown for `attempt_id`. Returns whether one was running.
    pub fn stop(&self, attempt_id: Uuid) -> bool {
        match self.lock_active().remove(&attempt_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, attempt_id: Uuid) -> bool {
        self.lock_active().contains_key(&attempt_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    async fn run<R: RemainingTime>(
        &self,
        attempt_id: Uuid,
        source: R,
        tx: mpsc::Sender<TickerSignal>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let signal = match source.remaining_at(self.clock.now()) {
                Ok(remaining) if remaining > 0 => TickerSignal::Tick { remaining },
                Ok(_) => TickerSignal::expired(),
                Err(err) => {
                    tracing::warn!(%attempt_id, error = %err, "countdown computation failed");
                    TickerSignal::Failed {
                        error: err.to_string(),
                    }
                }
            };
            let terminal = signal.is_terminal();

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(signal) => sent,
            };
            if sent.is_err() {
                tracing::debug!(%attempt_id, "countdown subscriber went away");
                break;
            }
            if terminal {
                tracing::info!(%attempt_id, "countdown finished");
                break;
            }
        }
    }

    fn forget(&self, attempt_id: Uuid, generation: u64) {
        let mut active = self.lock_active();
        if active.get(&attempt_id).map(|h| h.generation) == Some(generation) {
            active.remove(&attempt_id);
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TickerHandle>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::deadline::AttemptWindow;
    use crate::utils::clock::ManualClock;
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 14, 0, 0).unwrap()
    }

    fn registry(clock: &ManualClock) -> TickerRegistry {
        TickerRegistry::new(Arc::new(clock.clone()), Duration::from_secs(1))
    }

    #[test]
    fn signals_serialize_to_flat_shapes() {
        assert_eq!(
            serde_json::to_value(TickerSignal::Tick { remaining: 42 }).unwrap(),
            serde_json::json!({ "remaining": 42 })
        );
        assert_eq!(
            serde_json::to_value(TickerSignal::expired()).unwrap(),
            serde_json::json!({ "expired": true })
        );
        assert_eq!(
            serde_json::to_value(TickerSignal::Failed { error: "bad".into() }).unwrap(),
            serde_json::json!({ "error": "bad" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_then_expires_once() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), None, t0() + chrono::Duration::seconds(2)).unwrap();
        let attempt_id = Uuid::new_v4();

        let mut rx = tickers.start(attempt_id, window);
        assert_eq!(rx.recv().await, Some(TickerSignal::Tick { remaining: 2 }));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(rx.recv().await, Some(TickerSignal::Tick { remaining: 1 }));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(rx.recv().await, Some(TickerSignal::expired()));

        // No repeated tick(0): the stream closes after expiry.
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(rx.recv().await, None);
        tokio::task::yield_now().await;
        assert!(!tickers.is_running(attempt_id));
    }

    #[tokio::test(start_paused = true)]
    async fn already_expired_window_signals_immediately() {
        let clock = ManualClock::new(t0() + chrono::Duration::seconds(200));
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), None, t0() + chrono::Duration::seconds(120)).unwrap();

        let mut rx = tickers.start(Uuid::new_v4(), window);
        assert_eq!(rx.recv().await, Some(TickerSignal::expired()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_silences_the_first() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), Some(60), t0() + chrono::Duration::hours(1)).unwrap();
        let attempt_id = Uuid::new_v4();

        let mut first = tickers.start(attempt_id, window);
        assert_eq!(first.recv().await, Some(TickerSignal::Tick { remaining: 3600 }));

        let mut second = tickers.start(attempt_id, window);
        assert_eq!(second.recv().await, Some(TickerSignal::Tick { remaining: 3600 }));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(second.recv().await, Some(TickerSignal::Tick { remaining: 3599 }));
        assert_eq!(first.recv().await, None);
        assert_eq!(tickers.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), None, t0() + chrono::Duration::hours(1)).unwrap();
        let attempt_id = Uuid::new_v4();

        let mut rx = tickers.start(attempt_id, window);
        assert!(rx.recv().await.is_some());

        assert!(tickers.stop(attempt_id));
        assert!(!tickers.stop(attempt_id));
        assert!(!tickers.stop(Uuid::new_v4()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_window_reports_error_and_halts() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let invalid = AttemptWindow::new(t0(), Some(-30), t0() + chrono::Duration::days(1));
        let attempt_id = Uuid::new_v4();

        let mut rx = tickers.start(attempt_id, invalid);
        match rx.recv().await {
            Some(TickerSignal::Failed { error }) => assert!(error.contains("negative")),
            other => panic!("expected failure signal, got {:?}", other),
        }
        assert_eq!(rx.recv().await, None);
        tokio::task::yield_now().await;
        assert!(!tickers.is_running(attempt_id));
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_signals_of_a_replaced_countdown_are_dropped() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), None, t0() + chrono::Duration::hours(1)).unwrap();
        let attempt_id = Uuid::new_v4();

        // Let the first countdown fill its buffer while nobody reads.
        let mut first = tickers.start(attempt_id, window);
        tokio::time::sleep(Duration::from_millis(4_500)).await;

        let mut second = tickers.start(attempt_id, window);
        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(TickerSignal::Tick { remaining: 3600 }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_buffered_signals() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), None, t0() + chrono::Duration::hours(1)).unwrap();
        let attempt_id = Uuid::new_v4();

        let mut rx = tickers.start(attempt_id, window);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(tickers.stop(attempt_id));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_receiver_ends_the_task() {
        let clock = ManualClock::new(t0());
        let tickers = registry(&clock);
        let window = AttemptWindow::new(t0(), None, t0() + chrono::Duration::hours(1)).unwrap();
        let attempt_id = Uuid::new_v4();

        let rx = tickers.start(attempt_id, window);
        drop(rx);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!tickers.is_running(attempt_id));
    }
}

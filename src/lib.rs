pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::database::attempt_store::AttemptStore;
use crate::database::pg_store::PgAttemptStore;
use crate::services::{
    attempt_service::AttemptService,
    countdown_feed::CountdownFeed,
    notification_service::{NotificationService, SubmissionNotifier},
    sweeper::AutoSubmitSweeper,
    ticker::TickerRegistry,
};
use crate::utils::clock::{Clock, SystemClock};

const EXPIRY_SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub sweeper: AutoSubmitSweeper,
    pub tickers: TickerRegistry,
    pub countdown: CountdownFeed,
    pub sweep_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let store: Arc<dyn AttemptStore> = Arc::new(PgAttemptStore::new(pool.clone()));
        let notifier: Arc<dyn SubmissionNotifier> = Arc::new(NotificationService::new(
            pool,
            config.notification_webhook_url.clone(),
            config.webhook_secret.clone(),
        ));

        Self::from_parts(
            store,
            notifier,
            Arc::new(SystemClock),
            Duration::from_millis(config.countdown_tick_ms),
            &config.webhook_secret,
        )
    }

    pub fn from_parts(
        store: Arc<dyn AttemptStore>,
        notifier: Arc<dyn SubmissionNotifier>,
        clock: Arc<dyn Clock>,
        tick_period: Duration,
        sweep_secret: &str,
    ) -> Self {
        let attempt_service = AttemptService::new(store.clone(), notifier.clone(), clock.clone());
        let sweeper = AutoSubmitSweeper::new(store, notifier, clock.clone());
        let tickers = TickerRegistry::new(clock, tick_period);
        let countdown = CountdownFeed::new(
            attempt_service.clone(),
            tickers.clone(),
            EXPIRY_SUBMIT_RETRY_DELAY,
        );

        Self {
            attempt_service,
            sweeper,
            tickers,
            countdown,
            sweep_secret: Arc::from(sweep_secret),
        }
    }
}

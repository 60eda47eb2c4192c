use lms_backend::{
    config::{get_config, init_config, LogFormat},
    database::pool::{create_pool, run_migrations},
    routes,
    services::{notification_service::NotificationService, sweep_schedule::schedule_sweeps},
    AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let pool = create_pool().await?;
    run_migrations(&pool).await?;

    let app_state = AppState::new(pool.clone());

    {
        let notif = NotificationService::new(
            pool.clone(),
            config.notification_webhook_url.clone(),
            config.webhook_secret.clone(),
        );
        tokio::spawn(async move {
            loop {
                match notif.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Notification worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    // Without a cron expression the sweep falls back to a fixed one-minute loop.
    let _scheduler = match config.sweep_cron.as_deref() {
        Some(cron) => Some(schedule_sweeps(app_state.sweeper.clone(), cron).await?),
        None => {
            let sweeper = app_state.sweeper.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(e) = sweeper.run_once().await {
                        tracing::error!("Auto-submit sweep error: {:?}", e);
                    }
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            });
            None
        }
    };

    let app = routes::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

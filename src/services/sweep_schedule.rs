use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{Error, Result};
use crate::services::sweeper::AutoSubmitSweeper;

/// Starts an in-process scheduler that runs a sweep on every `cron` match.
///
/// The returned scheduler must be kept alive for the jobs to keep firing.
pub async fn schedule_sweeps(sweeper: AutoSubmitSweeper, cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| Error::Internal(format!("Failed to create sweep scheduler: {:?}", e)))?;

    let job = Job::new_async(cron, move |_job_id, _scheduler| {
        let sweeper = sweeper.clone();
        Box::pin(async move {
            if let Err(e) = sweeper.run_once().await {
                tracing::error!(error = ?e, "scheduled sweep failed");
            }
        })
    })
    .map_err(|e| Error::Config(format!("Invalid SWEEP_CRON '{}': {:?}", cron, e)))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| Error::Internal(format!("Failed to register sweep job: {:?}", e)))?;
    scheduler
        .start()
        .await
        .map_err(|e| Error::Internal(format!("Failed to start sweep scheduler: {:?}", e)))?;

    tracing::info!(cron, "auto-submit sweeps scheduled");
    Ok(scheduler)
}

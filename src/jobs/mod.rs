// Background jobs - scheduled lifecycle transitions

pub mod block_scheduler;

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::services::lifecycle::LifecycleEngine;

/// Starts the periodic lifecycle jobs on `cron` (six-field, seconds first).
///
/// Each job holds its own guard, so a run that outlasts the period makes the
/// next tick of that job a no-op instead of overlapping it.
pub async fn start(
    engine: Arc<LifecycleEngine>,
    cron: &str,
    batch_size: i64,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let guard = Arc::new(Mutex::new(()));
    let job_engine = engine.clone();
    scheduler
        .add(Job::new_async(cron, move |_id, _scheduler| {
            let engine = job_engine.clone();
            let guard = guard.clone();
            Box::pin(async move {
                run_exclusive(&guard, "scheduled_blocks", async {
                    if let Err(e) =
                        block_scheduler::activate_scheduled_blocks(&engine, Utc::now(), batch_size)
                            .await
                    {
                        tracing::error!(error = %e, "Could not load due scheduled blocks");
                    }
                })
                .await;
            })
        })?)
        .await?;

    let guard = Arc::new(Mutex::new(()));
    let job_engine = engine.clone();
    scheduler
        .add(Job::new_async(cron, move |_id, _scheduler| {
            let engine = job_engine.clone();
            let guard = guard.clone();
            Box::pin(async move {
                run_exclusive(&guard, "block_expiry", async {
                    if let Err(e) =
                        block_scheduler::expire_blocks(&engine, Utc::now(), batch_size).await
                    {
                        tracing::error!(error = %e, "Could not load expired blocks");
                    }
                })
                .await;
            })
        })?)
        .await?;

    let guard = Arc::new(Mutex::new(()));
    let job_engine = engine;
    scheduler
        .add(Job::new_async(cron, move |_id, _scheduler| {
            let engine = job_engine.clone();
            let guard = guard.clone();
            Box::pin(async move {
                run_exclusive(&guard, "archive_sweep", async {
                    if let Err(e) = block_scheduler::sweep_unarchived_accounts(
                        &engine,
                        Utc::now(),
                        batch_size,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Could not load unarchived accounts");
                    }
                })
                .await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!(cron = %cron, batch_size, "Lifecycle jobs scheduled");

    Ok(scheduler)
}

/// Runs `job` unless a previous run of the same job still holds `guard`.
/// Returns whether it ran.
async fn run_exclusive<F>(guard: &Mutex<()>, name: &'static str, job: F) -> bool
where
    F: Future<Output = ()>,
{
    let Ok(_running) = guard.try_lock() else {
        tracing::warn!(job = name, "Previous run still in progress, skipping tick");
        return false;
    };

    job.await;
    true
}

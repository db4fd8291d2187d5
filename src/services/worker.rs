use {
    crate::domain::{error::PipelineError, queue::JobQueue},
    crate::services::reconciliation::{ReconciliationService, WebhookOutcome},
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

const CLAIM_BATCH: i64 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Poll for pending jobs and run them through reconciliation.
pub async fn run_worker(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    reconciler: Arc<ReconciliationService>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker_id, "job worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!(worker_id, "job worker shutting down");
                return;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        if let Err(e) = poll_once(&*queue, &reconciler).await {
            tracing::error!(worker_id, error = %e, "worker poll error");
        }
    }
}

/// Claim one batch and process it. Returns how many jobs were claimed.
pub async fn poll_once(
    queue: &dyn JobQueue,
    reconciler: &ReconciliationService,
) -> Result<usize, PipelineError> {
    let jobs = queue.claim(CLAIM_BATCH).await?;
    let claimed = jobs.len();

    for job in jobs {
        match reconciler.reconcile_from_webhook(&job.user_id, &job.event).await {
            WebhookOutcome::Dropped(error) => {
                tracing::error!(job_id = %job.id, attempts = job.attempts, %error, "job failed, scheduling retry");
                queue.fail(job.id, &error).await?;
            }
            WebhookOutcome::Discarded(error) => {
                tracing::warn!(job_id = %job.id, %error, "permanent failure, completing (no retry)");
                queue.complete(job.id).await?;
            }
            outcome => {
                tracing::debug!(job_id = %job.id, ?outcome, "job processed");
                queue.complete(job.id).await?;
            }
        }
    }

    Ok(claimed)
}

/// Periodically reset jobs stuck in processing back to pending.
pub async fn run_reaper(queue: Arc<dyn JobQueue>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("stale job reaper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("stale job reaper shutting down");
                return;
            }
            _ = tokio::time::sleep(REAP_INTERVAL) => {}
        }

        match queue.reap_stale().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reaped stale jobs"),
            Err(e) => tracing::error!(error = %e, "reaper error"),
        }
    }
}

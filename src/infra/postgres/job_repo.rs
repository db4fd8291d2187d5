use {
    crate::domain::{
        error::PipelineError,
        event::SubscriptionEvent,
        id::UserId,
        queue::{DEFAULT_MAX_ATTEMPTS, Job, JobQueue, NewJob},
        store::BoxFuture,
    },
    sqlx::{PgPool, Row},
    uuid::Uuid,
};

/// Enqueue a webhook event for async processing.
/// Returns `true` if inserted, `false` if duplicate (already enqueued).
pub async fn enqueue(pool: &PgPool, job: &NewJob) -> Result<bool, PipelineError> {
    let event = serde_json::to_value(&job.event)?;
    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO subscription_jobs (dedup_key, user_id, event, max_attempts)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (dedup_key) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(job.dedup_key.as_str())
    .bind(job.user_id.as_str())
    .bind(&event)
    .bind(DEFAULT_MAX_ATTEMPTS)
    .fetch_optional(pool)
    .await?;

    Ok(inserted.is_some())
}

/// Claim up to `limit` pending jobs for processing.
/// Uses SKIP LOCKED to avoid contention with other workers.
pub async fn claim(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    limit: i64,
) -> Result<Vec<Job>, PipelineError> {
    let rows = sqlx::query(
        r#"
        UPDATE subscription_jobs
        SET status = 'processing', updated_at = now()
        WHERE id IN (
            SELECT id FROM subscription_jobs
            WHERE status = 'pending' AND scheduled_at <= now()
            ORDER BY scheduled_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, user_id, event, attempts
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let id: Uuid = row.try_get("id")?;
        let user_id: String = row.try_get("user_id")?;
        let event: serde_json::Value = row.try_get("event")?;
        let event = match serde_json::from_value::<SubscriptionEvent>(event) {
            Ok(event) => event,
            Err(e) => {
                // Unreadable payloads will never succeed; park them.
                tracing::warn!(job_id = %id, error = %e, "undecodable job, marking failed");
                mark_failed(tx, id, &e.to_string()).await?;
                continue;
            }
        };
        jobs.push(Job {
            id,
            user_id: UserId::new(user_id)?,
            event,
            attempts: row.try_get("attempts")?,
        });
    }

    Ok(jobs)
}

async fn mark_failed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    error: &str,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE subscription_jobs SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Mark a job as completed.
pub async fn complete(pool: &PgPool, id: Uuid) -> Result<(), PipelineError> {
    sqlx::query("UPDATE subscription_jobs SET status = 'completed', updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failure. Exponential backoff via scheduled_at.
/// If max attempts reached, mark as 'failed' permanently.
pub async fn fail(pool: &PgPool, id: Uuid, error: &str) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE subscription_jobs
        SET attempts = attempts + 1,
            last_error = $2,
            status = CASE
                WHEN attempts + 1 >= max_attempts THEN 'failed'
                ELSE 'pending'
            END,
            scheduled_at = CASE
                WHEN attempts + 1 >= max_attempts THEN scheduled_at
                ELSE now() + make_interval(secs => power(2, attempts + 1)::int)
            END,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Reset jobs stuck in 'processing' for >2 minutes back to 'pending'.
/// Returns the number of reaped jobs.
pub async fn reap_stale(pool: &PgPool) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE subscription_jobs
        SET status = 'pending', updated_at = now()
        WHERE status = 'processing' AND updated_at < now() - interval '2 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl JobQueue for PgJobQueue {
    fn enqueue(&self, job: NewJob) -> BoxFuture<'_, Result<bool, PipelineError>> {
        Box::pin(async move { enqueue(&self.pool, &job).await })
    }

    fn claim(&self, limit: i64) -> BoxFuture<'_, Result<Vec<Job>, PipelineError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            let jobs = claim(&mut tx, limit).await?;
            tx.commit().await?;
            Ok(jobs)
        })
    }

    fn complete(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move { complete(&self.pool, id).await })
    }

    fn fail<'a>(&'a self, id: Uuid, error: &'a str) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move { fail(&self.pool, id, error).await })
    }

    fn reap_stale(&self) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(async move { reap_stale(&self.pool).await })
    }
}

use {
    super::error::PipelineError,
    super::event::SubscriptionEvent,
    super::id::{DedupKey, UserId},
    super::store::BoxFuture,
    uuid::Uuid,
};

/// Max delivery attempts before a job is parked as `failed`.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone)]
pub struct NewJob {
    pub dedup_key: DedupKey,
    pub user_id: UserId,
    pub event: SubscriptionEvent,
}

impl NewJob {
    pub fn new(user_id: UserId, event: SubscriptionEvent) -> Self {
        Self {
            dedup_key: event.dedup_key(),
            user_id,
            event,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub user_id: UserId,
    pub event: SubscriptionEvent,
    pub attempts: i32,
}

/// At-least-once work queue between webhook ingress and the workers.
pub trait JobQueue: Send + Sync {
    /// `true` if inserted, `false` if a job with the same dedup key exists.
    fn enqueue(&self, job: NewJob) -> BoxFuture<'_, Result<bool, PipelineError>>;

    /// Claim up to `limit` due jobs, marking them as processing.
    fn claim(&self, limit: i64) -> BoxFuture<'_, Result<Vec<Job>, PipelineError>>;

    fn complete(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Reschedule with exponential backoff, or park as failed once
    /// attempts run out.
    fn fail<'a>(&'a self, id: Uuid, error: &'a str) -> BoxFuture<'a, Result<(), PipelineError>>;

    /// Return jobs stuck in processing back to pending.
    fn reap_stale(&self) -> BoxFuture<'_, Result<u64, PipelineError>>;
}

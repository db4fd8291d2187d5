//! In-process store and queue with the same contracts as the Postgres
//! implementations. Used by the test suite and for running without a
//! database.

use {
    crate::domain::{
        audit::{NewAuditEntry, SubscriptionEventRecord},
        error::PipelineError,
        event::EventKind,
        id::UserId,
        queue::{DEFAULT_MAX_ATTEMPTS, Job, JobQueue, NewJob},
        store::{BoxFuture, Commit, CommitOutcome, SubscriptionStore},
        subscription::Subscription,
    },
    chrono::Utc,
    std::{collections::HashMap, time::Duration},
    tokio::{sync::Mutex, time::Instant},
    uuid::Uuid,
};

const STALE_AFTER: Duration = Duration::from_secs(120);

#[derive(Default)]
struct StoreInner {
    subscriptions: HashMap<UserId, Subscription>,
    audit: Vec<SubscriptionEventRecord>,
    failing_commits: u32,
    commit_delay: Option<Duration>,
    unavailable: bool,
    corrupt: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` commits fail with a transient error and write nothing.
    pub async fn fail_next_commits(&self, n: u32) {
        self.inner.lock().await.failing_commits = n;
    }

    /// While set, every operation fails with a transient error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// While set, every operation fails with a decode error that no
    /// retry can fix.
    pub async fn set_corrupt(&self, corrupt: bool) {
        self.inner.lock().await.corrupt = corrupt;
    }

    /// Every commit sleeps this long before touching state.
    pub async fn set_commit_delay(&self, delay: Option<Duration>) {
        self.inner.lock().await.commit_delay = delay;
    }

    /// Seed a row directly, bypassing the state machine.
    pub async fn insert(&self, subscription: Subscription) {
        let mut inner = self.inner.lock().await;
        inner
            .subscriptions
            .insert(subscription.user_id.clone(), subscription);
    }

    /// Full trail, including records with no resolved user.
    pub async fn audit_log(&self) -> Vec<SubscriptionEventRecord> {
        self.inner.lock().await.audit.clone()
    }

    fn check_available(inner: &StoreInner) -> Result<(), PipelineError> {
        if inner.unavailable {
            return Err(PipelineError::PersistenceTransient("store unavailable".into()));
        }
        if inner.corrupt {
            return Err(PipelineError::Database(sqlx::Error::Decode(
                "corrupt subscription row".into(),
            )));
        }
        Ok(())
    }

    fn record(inner: &mut StoreInner, entry: &NewAuditEntry) {
        inner.audit.push(SubscriptionEventRecord {
            id: entry.id,
            user_id: entry.user_id.clone(),
            event_kind: entry.event_kind,
            provider: entry.provider.clone(),
            product_id: entry.product_id.clone(),
            transaction_id: entry.transaction_id.clone(),
            outcome: entry.outcome,
            actor: entry.actor.clone(),
            metadata: entry.metadata.clone(),
            created_at: Utc::now(),
        });
    }

    async fn commit_inner(&self, commit: Commit) -> Result<CommitOutcome, PipelineError> {
        let delay = self.inner.lock().await.commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        Self::check_available(&inner)?;
        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            return Err(PipelineError::PersistenceTransient(
                "injected commit failure".into(),
            ));
        }

        let current = inner.subscriptions.get(&commit.user_id).map(|s| s.version);
        if current != commit.expected_version {
            return Ok(CommitOutcome::Conflict);
        }

        let saved = commit.next.map(|mut next| {
            next.version = commit.expected_version.unwrap_or(0) + 1;
            inner
                .subscriptions
                .insert(commit.user_id.clone(), next.clone());
            next
        });
        Self::record(&mut inner, &commit.audit);
        Ok(CommitOutcome::Committed(saved))
    }
}

impl SubscriptionStore for MemoryStore {
    fn load<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<Subscription>, PipelineError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Self::check_available(&inner)?;
            Ok(inner.subscriptions.get(user_id).cloned())
        })
    }

    fn find_user_by_lineage<'a>(
        &'a self,
        original_transaction_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserId>, PipelineError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Self::check_available(&inner)?;
            Ok(inner
                .subscriptions
                .values()
                .filter(|s| s.original_transaction_id.as_deref() == Some(original_transaction_id))
                .max_by_key(|s| s.updated_at)
                .map(|s| s.user_id.clone()))
        })
    }

    fn commit(&self, commit: Commit) -> BoxFuture<'_, Result<CommitOutcome, PipelineError>> {
        Box::pin(self.commit_inner(commit))
    }

    fn append_audit<'a>(
        &'a self,
        entry: &'a NewAuditEntry,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            Self::check_available(&inner)?;
            Self::record(&mut inner, entry);
            Ok(())
        })
    }

    fn list_audit<'a>(
        &'a self,
        user_id: &'a UserId,
        kind: Option<EventKind>,
    ) -> BoxFuture<'a, Result<Vec<SubscriptionEventRecord>, PipelineError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .audit
                .iter()
                .filter(|r| r.user_id.as_ref() == Some(user_id))
                .filter(|r| kind.is_none_or(|k| r.event_kind == k))
                .cloned()
                .collect())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub dedup_key: String,
    pub user_id: UserId,
    pub state: JobState,
    pub attempts: i32,
    pub last_error: Option<String>,
    scheduled_at: Instant,
    updated_at: Instant,
    job: NewJob,
}

#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.clone()
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, job: NewJob) -> BoxFuture<'_, Result<bool, PipelineError>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            if jobs.iter().any(|j| j.dedup_key == job.dedup_key.as_str()) {
                return Ok(false);
            }
            let now = Instant::now();
            jobs.push(QueuedJob {
                id: Uuid::now_v7(),
                dedup_key: job.dedup_key.as_str().to_string(),
                user_id: job.user_id.clone(),
                state: JobState::Pending,
                attempts: 0,
                last_error: None,
                scheduled_at: now,
                updated_at: now,
                job,
            });
            Ok(true)
        })
    }

    fn claim(&self, limit: i64) -> BoxFuture<'_, Result<Vec<Job>, PipelineError>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            let now = Instant::now();
            let mut due: Vec<&mut QueuedJob> = jobs
                .iter_mut()
                .filter(|j| j.state == JobState::Pending && j.scheduled_at <= now)
                .collect();
            due.sort_by_key(|j| j.scheduled_at);

            let limit = usize::try_from(limit).unwrap_or(0);
            Ok(due
                .into_iter()
                .take(limit)
                .map(|j| {
                    j.state = JobState::Processing;
                    j.updated_at = now;
                    Job {
                        id: j.id,
                        user_id: j.job.user_id.clone(),
                        event: j.job.event.clone(),
                        attempts: j.attempts,
                    }
                })
                .collect())
        })
    }

    fn complete(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.state = JobState::Completed;
                job.updated_at = Instant::now();
            }
            Ok(())
        })
    }

    fn fail<'a>(&'a self, id: Uuid, error: &'a str) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
                return Ok(());
            };
            let now = Instant::now();
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.updated_at = now;
            if job.attempts >= DEFAULT_MAX_ATTEMPTS {
                job.state = JobState::Failed;
            } else {
                job.state = JobState::Pending;
                job.scheduled_at = now + Duration::from_secs(2u64.pow(job.attempts as u32));
            }
            Ok(())
        })
    }

    fn reap_stale(&self) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            let now = Instant::now();
            let mut reaped = 0;
            for job in jobs.iter_mut() {
                if job.state == JobState::Processing && now.duration_since(job.updated_at) > STALE_AFTER
                {
                    job.state = JobState::Pending;
                    job.updated_at = now;
                    reaped += 1;
                }
            }
            Ok(reaped)
        })
    }
}

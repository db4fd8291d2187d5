use {
    super::audit::{NewAuditEntry, SubscriptionEventRecord},
    super::error::PipelineError,
    super::event::EventKind,
    super::id::UserId,
    super::subscription::Subscription,
    std::{future::Future, pin::Pin},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One atomic write: the subscription row (if the event was accepted) and
/// its audit record, guarded by the version the decision was based on.
#[derive(Debug, Clone)]
pub struct Commit {
    pub user_id: UserId,
    /// `None` when the decision was made against a user with no row.
    pub expected_version: Option<i64>,
    /// `None` for rejected events: only the audit record is written, and
    /// only if the row still has `expected_version`.
    pub next: Option<Subscription>,
    pub audit: NewAuditEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Option<Subscription>),
    /// Another writer got there first. Reload and decide again.
    Conflict,
}

/// Persistence collaborator. Implementations must make `commit`
/// compare-and-swap on `version` so concurrent writers for one user
/// serialize.
pub trait SubscriptionStore: Send + Sync {
    fn load<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<Subscription>, PipelineError>>;

    fn find_user_by_lineage<'a>(
        &'a self,
        original_transaction_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserId>, PipelineError>>;

    fn commit(&self, commit: Commit) -> BoxFuture<'_, Result<CommitOutcome, PipelineError>>;

    fn append_audit<'a>(
        &'a self,
        entry: &'a NewAuditEntry,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;

    fn list_audit<'a>(
        &'a self,
        user_id: &'a UserId,
        kind: Option<EventKind>,
    ) -> BoxFuture<'a, Result<Vec<SubscriptionEventRecord>, PipelineError>>;
}

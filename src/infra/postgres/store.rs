use {
    super::{audit_repo, subscription_repo},
    crate::domain::{
        audit::{NewAuditEntry, SubscriptionEventRecord},
        error::PipelineError,
        event::EventKind,
        id::UserId,
        store::{BoxFuture, Commit, CommitOutcome, SubscriptionStore},
        subscription::Subscription,
    },
    sqlx::PgPool,
};

#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn commit_inner(&self, commit: Commit) -> Result<CommitOutcome, PipelineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET LOCAL lock_timeout = '5s'")
            .execute(&mut *tx)
            .await?;

        let saved = match (commit.next, commit.expected_version) {
            (Some(mut next), None) => {
                next.version = 1;
                if !subscription_repo::insert_subscription(&mut tx, &next).await? {
                    tx.rollback().await?;
                    return Ok(CommitOutcome::Conflict);
                }
                Some(next)
            }
            (Some(mut next), Some(expected)) => {
                next.version = expected + 1;
                if !subscription_repo::update_subscription(&mut tx, &next, expected).await? {
                    tx.rollback().await?;
                    return Ok(CommitOutcome::Conflict);
                }
                Some(next)
            }
            (None, expected) => {
                let current = subscription_repo::lock_version(&mut tx, &commit.user_id).await?;
                if current != expected {
                    tx.rollback().await?;
                    return Ok(CommitOutcome::Conflict);
                }
                None
            }
        };

        audit_repo::insert_audit_entry(&mut tx, &commit.audit).await?;
        tx.commit().await?;
        Ok(CommitOutcome::Committed(saved))
    }
}

impl SubscriptionStore for PgSubscriptionStore {
    fn load<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<Subscription>, PipelineError>> {
        Box::pin(subscription_repo::get_subscription(&self.pool, user_id))
    }

    fn find_user_by_lineage<'a>(
        &'a self,
        original_transaction_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserId>, PipelineError>> {
        Box::pin(subscription_repo::find_user_by_lineage(
            &self.pool,
            original_transaction_id,
        ))
    }

    fn commit(&self, commit: Commit) -> BoxFuture<'_, Result<CommitOutcome, PipelineError>> {
        Box::pin(self.commit_inner(commit))
    }

    fn append_audit<'a>(
        &'a self,
        entry: &'a NewAuditEntry,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            audit_repo::insert_audit_entry(&mut tx, entry).await?;
            tx.commit().await?;
            Ok(())
        })
    }

    fn list_audit<'a>(
        &'a self,
        user_id: &'a UserId,
        kind: Option<EventKind>,
    ) -> BoxFuture<'a, Result<Vec<SubscriptionEventRecord>, PipelineError>> {
        Box::pin(audit_repo::list_for_user(&self.pool, user_id, kind))
    }
}

use {
    crate::domain::{
        audit::{AuditOutcome, NewAuditEntry},
        error::PipelineError,
        event::{EventKind, EventSource, SubscriptionEvent},
        id::UserId,
        provider::Platform,
        receipt::ReceiptValidator,
        state_machine::{Outcome, RejectReason, SubscriptionStateMachine, Transition},
        store::{Commit, CommitOutcome, SubscriptionStore},
        subscription::{Subscription, SubscriptionStatusView},
    },
    chrono::Utc,
    std::{sync::Arc, time::Duration},
};

const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Bound on one load-decide-commit round trip.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(50),
            attempt_timeout: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// What happened to one webhook event. Never an error: the webhook path
/// absorbs everything.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Applied(Subscription),
    Rejected(RejectReason),
    Ignored(RejectReason),
    /// Retries exhausted; the event was not persisted.
    Dropped(String),
    /// Failed in a way no retry can fix; the event was not persisted.
    Discarded(String),
}

pub struct ReconciliationService {
    store: Arc<dyn SubscriptionStore>,
    receipts: Arc<dyn ReceiptValidator>,
    machine: SubscriptionStateMachine,
    retry: RetryPolicy,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        receipts: Arc<dyn ReceiptValidator>,
        machine: SubscriptionStateMachine,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            receipts,
            machine,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    #[tracing::instrument(
        name = "reconcile_webhook",
        skip_all,
        fields(user_id = %user_id, kind = %event.kind, transaction_id = %event.effective_transaction_id())
    )]
    pub async fn reconcile_from_webhook(
        &self,
        user_id: &UserId,
        event: &SubscriptionEvent,
    ) -> WebhookOutcome {
        let actor = format!("webhook:{}", event.source.label());
        match self.reconcile(user_id, event, &actor).await {
            Ok(transition) => match transition.outcome {
                Outcome::Accepted => {
                    tracing::info!(
                        from = %transition.previous_status,
                        to = %transition.state.status,
                        "subscription updated"
                    );
                    WebhookOutcome::Applied(transition.state)
                }
                Outcome::Rejected(reason) if reason.is_ignored() => {
                    tracing::info!(error = %reason.to_error(), "event ignored");
                    WebhookOutcome::Ignored(reason)
                }
                Outcome::Rejected(reason @ RejectReason::RefundConflict) => {
                    tracing::warn!(
                        error = %reason.to_error(),
                        occurred_at = %event.occurred_at,
                        "refund older than last applied event, needs manual review"
                    );
                    WebhookOutcome::Rejected(reason)
                }
                Outcome::Rejected(reason) => {
                    tracing::info!(
                        error = %reason.to_error(),
                        status = %transition.state.status,
                        "event rejected"
                    );
                    WebhookOutcome::Rejected(reason)
                }
            },
            Err(e @ PipelineError::PersistenceFatal(_)) => {
                tracing::error!(error = %e, "event dropped, not persisted");
                WebhookOutcome::Dropped(e.to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "event discarded, permanent failure");
                WebhookOutcome::Discarded(e.to_string())
            }
        }
    }

    /// Client-submitted receipt. Joins the webhook path at the state
    /// machine and the same compare-and-swap commit.
    #[tracing::instrument(name = "reconcile_receipt", skip_all, fields(user_id = %user_id, %platform))]
    pub async fn reconcile_from_receipt(
        &self,
        user_id: &UserId,
        receipt: &str,
        product_id: &str,
        platform: Platform,
    ) -> Result<SubscriptionStatusView, PipelineError> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(PipelineError::Validation("productId is required".into()));
        }
        if receipt.trim().is_empty() {
            return Err(PipelineError::Validation("receipt is required".into()));
        }
        if self.machine.catalog().plan_for(product_id).is_none() {
            return Err(PipelineError::Validation(format!(
                "unknown product: {product_id}"
            )));
        }

        let validated = tokio::time::timeout(
            self.retry.attempt_timeout,
            self.receipts.validate(receipt, product_id, platform),
        )
        .await
        .map_err(|_| PipelineError::Timeout)??;

        let now = Utc::now();
        let event = SubscriptionEvent {
            kind: EventKind::Purchased,
            source: EventSource::Receipt(platform),
            original_transaction_id: validated.original_transaction_id,
            transaction_id: validated.transaction_id,
            product_id: product_id.to_string(),
            occurred_at: now,
            is_trial: false,
            expires_at: None,
            app_user_id: None,
            raw_payload: serde_json::json!({
                "product_id": product_id,
                "platform": platform.as_str(),
            }),
        };

        let transition = self.reconcile(user_id, &event, "client:receipt").await?;
        match transition.reject_reason() {
            None => tracing::info!(status = %transition.state.status, "receipt applied"),
            Some(RejectReason::UnknownProduct) => {
                return Err(PipelineError::Validation(format!(
                    "unknown product: {product_id}"
                )));
            }
            Some(reason) => {
                tracing::info!(error = %reason.to_error(), "receipt did not change subscription")
            }
        }
        Ok(transition.state.status_view(Utc::now()))
    }

    pub async fn get_status(&self, user_id: &UserId) -> Result<SubscriptionStatusView, PipelineError> {
        let current = self.store.load(user_id).await?;
        Ok(current
            .map(|s| s.status_view(Utc::now()))
            .unwrap_or_else(SubscriptionStatusView::empty))
    }

    /// Webhook account link first, then the stored lineage.
    pub async fn resolve_user(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<Option<UserId>, PipelineError> {
        if let Some(id) = event.app_user_id.as_deref() {
            if let Ok(user_id) = UserId::new(id) {
                return Ok(Some(user_id));
            }
        }
        let lineage = event.lineage();
        if lineage.is_empty() {
            return Ok(None);
        }
        self.store.find_user_by_lineage(lineage).await
    }

    /// Audit an event that will not reach the state machine.
    pub async fn record_unprocessed(
        &self,
        user_id: Option<&UserId>,
        event: &SubscriptionEvent,
        outcome: AuditOutcome,
        reason: &str,
    ) -> Result<(), PipelineError> {
        let actor = format!("webhook:{}", event.source.label());
        let entry = NewAuditEntry::for_event(user_id, event, outcome, &actor, Some(reason));
        tokio::time::timeout(self.retry.attempt_timeout, self.store.append_audit(&entry))
            .await
            .map_err(|_| PipelineError::Timeout)?
    }

    /// Load, decide, compare-and-swap. Conflicts and transient failures
    /// are retried with backoff up to `max_attempts`.
    async fn reconcile(
        &self,
        user_id: &UserId,
        event: &SubscriptionEvent,
        actor: &str,
    ) -> Result<Transition, PipelineError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(
                self.retry.attempt_timeout,
                self.attempt(user_id, event, actor),
            )
            .await
            .unwrap_or(Err(PipelineError::Timeout));

            let err = match result {
                Ok(Some(transition)) => return Ok(transition),
                Ok(None) => PipelineError::PersistenceTransient("version conflict".into()),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.retry.max_attempts {
                return Err(PipelineError::PersistenceFatal(err.to_string()));
            }
            let backoff = self.retry.backoff(attempt);
            tracing::warn!(attempt, error = %err, ?backoff, "reconcile attempt failed, retrying");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt(
        &self,
        user_id: &UserId,
        event: &SubscriptionEvent,
        actor: &str,
    ) -> Result<Option<Transition>, PipelineError> {
        let current = self.store.load(user_id).await?;
        let mut transition = self
            .machine
            .apply(user_id, current.as_ref(), event, Utc::now());

        let commit = Commit {
            user_id: user_id.clone(),
            expected_version: current.as_ref().map(|s| s.version),
            next: transition.accepted().then(|| transition.state.clone()),
            audit: NewAuditEntry::for_transition(user_id, event, &transition, actor),
        };

        match self.store.commit(commit).await? {
            CommitOutcome::Committed(saved) => {
                if let Some(saved) = saved {
                    transition.state = saved;
                }
                Ok(Some(transition))
            }
            CommitOutcome::Conflict => Ok(None),
        }
    }
}

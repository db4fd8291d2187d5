//! Pure subscription transition function.
//!
//! `apply` never touches storage. Linearizability per user comes from the
//! store's compare-and-swap on `Subscription::version`: if two writers
//! race, the loser reloads and runs `apply` again against the winner's
//! state.

use {
    super::catalog::ProductCatalog,
    super::error::PipelineError,
    super::event::{EventKind, SubscriptionEvent},
    super::id::UserId,
    super::subscription::{Plan, Subscription, SubscriptionStatus},
    chrono::{DateTime, Duration, Months, Utc},
    serde::Serialize,
    std::fmt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Kind could not be mapped, or identity fields were missing.
    UnknownKind,
    /// Same transaction already applied.
    Replay,
    /// Event would not change anything (already expired, already refunded).
    NoChange,
    /// Event belongs to a different purchase lineage.
    LineageMismatch,
    /// Event is older than the lineage's last applied event.
    StaleEvent,
    /// Refund older than the last applied event. Needs manual review.
    RefundConflict,
    /// Grant for a lineage that was refunded. Never un-refunded automatically.
    RefundedLineage,
    /// An active lifetime entitlement is not replaced by a finite plan.
    LifetimeOwned,
    /// Product id does not map to a plan.
    UnknownProduct,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownKind => "unknown_kind",
            Self::Replay => "replay",
            Self::NoChange => "no_change",
            Self::LineageMismatch => "lineage_mismatch",
            Self::StaleEvent => "stale_event",
            Self::RefundConflict => "refund_conflict",
            Self::RefundedLineage => "refunded_lineage",
            Self::LifetimeOwned => "lifetime_owned",
            Self::UnknownProduct => "unknown_product",
        }
    }

    /// Unknown kinds are dropped rather than rejected.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::UnknownKind)
    }

    pub fn to_error(&self) -> PipelineError {
        match self {
            Self::UnknownKind => PipelineError::UnknownEventKind(self.as_str().into()),
            Self::Replay | Self::NoChange => PipelineError::ReplayNoop,
            Self::UnknownProduct => PipelineError::Validation("unknown product".into()),
            Self::LineageMismatch
            | Self::StaleEvent
            | Self::RefundConflict
            | Self::RefundedLineage
            | Self::LifetimeOwned => PipelineError::OrderingConflict(self.as_str().into()),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected(RejectReason),
}

/// Result of `apply`. On rejection `state` is the unchanged input state.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: Subscription,
    pub previous_status: SubscriptionStatus,
    pub outcome: Outcome,
}

impl Transition {
    pub fn accepted(&self) -> bool {
        self.outcome == Outcome::Accepted
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self.outcome {
            Outcome::Accepted => None,
            Outcome::Rejected(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionStateMachine {
    catalog: ProductCatalog,
}

impl SubscriptionStateMachine {
    pub fn new(catalog: ProductCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn apply(
        &self,
        user_id: &UserId,
        current: Option<&Subscription>,
        event: &SubscriptionEvent,
        now: DateTime<Utc>,
    ) -> Transition {
        let base = current
            .cloned()
            .unwrap_or_else(|| Subscription::none(user_id.clone(), now));
        match self.decide(&base, event, now) {
            Ok(next) => Transition {
                previous_status: base.status,
                state: next,
                outcome: Outcome::Accepted,
            },
            Err(reason) => Transition {
                previous_status: base.status,
                state: base,
                outcome: Outcome::Rejected(reason),
            },
        }
    }

    fn decide(
        &self,
        base: &Subscription,
        event: &SubscriptionEvent,
        now: DateTime<Utc>,
    ) -> Result<Subscription, RejectReason> {
        if event.kind == EventKind::Unknown || !event.has_identity() {
            return Err(RejectReason::UnknownKind);
        }

        let txn = event.effective_transaction_id();
        let lineage = event.lineage();
        let same_txn = base.latest_transaction_id.as_deref() == Some(txn);
        let same_lineage = base.original_transaction_id.as_deref() == Some(lineage);

        // A purchase happens once per transaction. A renewal may reuse the
        // transaction id (storeB tokens) but then carries a newer timestamp.
        if same_txn && event.kind.is_grant() {
            let redelivered = event.kind == EventKind::Purchased
                || base.last_event_at.is_none_or(|frontier| event.occurred_at <= frontier);
            if redelivered {
                return Err(RejectReason::Replay);
            }
        }

        // Only a purchase may move a running entitlement to another lineage.
        if base.status.is_entitled()
            && base.original_transaction_id.is_some()
            && !same_lineage
            && event.kind != EventKind::Purchased
        {
            return Err(RejectReason::LineageMismatch);
        }

        // Strict `<`: providers often stamp related events with the same time.
        if let Some(frontier) = base.last_event_at {
            if event.occurred_at < frontier {
                return Err(match event.kind {
                    EventKind::Refunded => RejectReason::RefundConflict,
                    _ => RejectReason::StaleEvent,
                });
            }
        }

        let mut next = base.clone();
        match event.kind {
            EventKind::Purchased => self.purchase(base, &mut next, event, same_lineage, now)?,
            EventKind::Renewed => self.renew(base, &mut next, event, same_lineage, now)?,
            EventKind::Expired => {
                if !base.status.is_entitled() {
                    return Err(RejectReason::NoChange);
                }
                next.status = SubscriptionStatus::Expired;
                next.auto_renew = false;
                next.expiry_date = base.expiry_date.map(|exp| exp.min(now));
            }
            EventKind::Refunded => {
                if base.status == SubscriptionStatus::Refunded {
                    return Err(RejectReason::NoChange);
                }
                next.status = SubscriptionStatus::Refunded;
                next.refunded = true;
                next.refund_date = Some(now);
                next.auto_renew = false;
            }
            EventKind::Unknown => return Err(RejectReason::UnknownKind),
        }

        if same_txn && next.same_entitlement(base) {
            return Err(RejectReason::NoChange);
        }

        next.original_transaction_id = Some(lineage.to_string());
        next.latest_transaction_id = Some(txn.to_string());
        next.platform = Some(event.source.platform());
        next.last_event_at = Some(match base.last_event_at {
            Some(frontier) => frontier.max(event.occurred_at),
            None => event.occurred_at,
        });
        next.updated_at = now;
        Ok(next)
    }

    fn purchase(
        &self,
        base: &Subscription,
        next: &mut Subscription,
        event: &SubscriptionEvent,
        same_lineage: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        let plan = self
            .catalog
            .plan_for(&event.product_id)
            .ok_or(RejectReason::UnknownProduct)?;

        match base.status {
            SubscriptionStatus::Refunded if same_lineage => Err(RejectReason::RefundedLineage),
            SubscriptionStatus::Active | SubscriptionStatus::Trial
                if base.plan == Plan::Lifetime && plan != Plan::Lifetime =>
            {
                Err(RejectReason::LifetimeOwned)
            }
            SubscriptionStatus::Active | SubscriptionStatus::Trial if same_lineage => {
                if base.plan == Plan::Lifetime {
                    return Err(RejectReason::NoChange);
                }
                // New transaction on the running lineage: extend, never shorten.
                let from = base.expiry_date.map_or(now, |exp| exp.max(now));
                self.grant(next, event, plan, from, false, now);
                Ok(())
            }
            _ => {
                let trial = event.is_trial || self.catalog.signals_trial(&event.product_id);
                self.grant(next, event, plan, now, trial, now);
                Ok(())
            }
        }
    }

    fn renew(
        &self,
        base: &Subscription,
        next: &mut Subscription,
        event: &SubscriptionEvent,
        same_lineage: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        if base.status == SubscriptionStatus::Refunded && same_lineage {
            return Err(RejectReason::RefundedLineage);
        }
        let plan = match self.catalog.plan_for(&event.product_id) {
            Some(plan) => plan,
            None if base.plan != Plan::None => base.plan,
            None => return Err(RejectReason::UnknownProduct),
        };
        if base.plan == Plan::Lifetime && base.status.is_entitled() {
            return Err(RejectReason::NoChange);
        }
        // Refunded time is not carried over into another lineage.
        let from = match base.expiry_date {
            Some(exp) if base.status != SubscriptionStatus::Refunded => exp.max(now),
            _ => now,
        };
        self.grant(next, event, plan, from, false, now);
        Ok(())
    }

    fn grant(
        &self,
        next: &mut Subscription,
        event: &SubscriptionEvent,
        plan: Plan,
        from: DateTime<Utc>,
        trial: bool,
        now: DateTime<Utc>,
    ) {
        next.plan = plan;
        next.product_id = Some(event.product_id.clone());
        next.refunded = false;
        next.refund_date = None;

        match plan.cadence_months() {
            None => {
                next.status = SubscriptionStatus::Active;
                next.expiry_date = None;
                next.auto_renew = false;
            }
            Some(_) if trial => {
                next.status = SubscriptionStatus::Trial;
                next.expiry_date = Some(now + Duration::days(i64::from(self.catalog.trial_days())));
                next.auto_renew = true;
            }
            Some(months) => {
                next.status = SubscriptionStatus::Active;
                next.expiry_date = Some(add_months(from, months));
                next.auto_renew = true;
            }
        }
    }
}

fn add_months(from: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    from.checked_add_months(Months::new(months))
        .unwrap_or_else(|| from + Duration::days(30 * i64::from(months)))
}

use {
    super::error::PipelineError,
    super::id::UserId,
    super::provider::Platform,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    None,
    Monthly,
    Yearly,
    Lifetime,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Lifetime => "lifetime",
        }
    }

    /// Billing cadence in months. `None` for plans that never expire or
    /// grant nothing.
    pub fn cadence_months(&self) -> Option<u32> {
        match self {
            Self::Monthly => Some(1),
            Self::Yearly => Some(12),
            Self::Lifetime | Self::None => None,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Plan {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "none" => Ok(Self::None),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "lifetime" => Ok(Self::Lifetime),
            other => Err(PipelineError::Validation(format!("unknown plan: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Pending,
    Trial,
    Active,
    Expired,
    Canceled,
    Refunded,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }

    /// Active or trial: the user currently holds an entitlement.
    pub fn is_entitled(&self) -> bool {
        matches!(self, Self::Active | Self::Trial)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "none" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "canceled" => Ok(Self::Canceled),
            "refunded" => Ok(Self::Refunded),
            other => Err(PipelineError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

/// Persisted per-user subscription record.
///
/// `version` is the compare-and-swap token the store checks on every
/// write; `last_event_at` is the lineage's monotonicity frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub platform: Option<Platform>,
    pub product_id: Option<String>,
    pub original_transaction_id: Option<String>,
    pub latest_transaction_id: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub refunded: bool,
    pub refund_date: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Subscription {
    /// Initial state for a user the store has never seen.
    pub fn none(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan: Plan::None,
            status: SubscriptionStatus::None,
            platform: None,
            product_id: None,
            original_transaction_id: None,
            latest_transaction_id: None,
            expiry_date: None,
            auto_renew: false,
            refunded: false,
            refund_date: None,
            last_event_at: None,
            updated_at: now,
            version: 0,
        }
    }

    /// Entitlement evaluated at `now`, never stored.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.refunded || !self.status.is_entitled() {
            return false;
        }
        match self.plan {
            Plan::Lifetime => true,
            Plan::None => false,
            Plan::Monthly | Plan::Yearly => self.expiry_date.is_some_and(|exp| exp > now),
        }
    }

    /// Same entitlement-relevant fields, ignoring bookkeeping
    /// (`updated_at`, `version`, `last_event_at`, `latest_transaction_id`).
    pub fn same_entitlement(&self, other: &Subscription) -> bool {
        self.plan == other.plan
            && self.status == other.status
            && self.original_transaction_id == other.original_transaction_id
            && self.expiry_date == other.expiry_date
            && self.auto_renew == other.auto_renew
            && self.refunded == other.refunded
    }

    pub fn status_view(&self, now: DateTime<Utc>) -> SubscriptionStatusView {
        let is_trial = self.status == SubscriptionStatus::Trial;
        SubscriptionStatusView {
            is_active: self.is_active_at(now),
            plan: self.plan,
            expiry_date: self.expiry_date,
            is_lifetime: self.plan == Plan::Lifetime && !self.refunded,
            is_trial_active: is_trial && self.is_active_at(now),
            trial_end_date: if is_trial { self.expiry_date } else { None },
        }
    }
}

/// What clients see. Derived at read time so background expiry never
/// leaves a stale `is_active` behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusView {
    pub is_active: bool,
    pub plan: Plan,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_lifetime: bool,
    pub is_trial_active: bool,
    pub trial_end_date: Option<DateTime<Utc>>,
}

impl SubscriptionStatusView {
    pub fn empty() -> Self {
        Self {
            is_active: false,
            plan: Plan::None,
            expiry_date: None,
            is_lifetime: false,
            is_trial_active: false,
            trial_end_date: None,
        }
    }
}

use {
    super::error::PipelineError,
    super::id::DedupKey,
    super::provider::{Platform, Provider},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Provider-agnostic notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Purchased,
    Renewed,
    Expired,
    Refunded,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchased => "purchased",
            Self::Renewed => "renewed",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds that grant or extend an entitlement.
    pub fn is_grant(&self) -> bool {
        matches!(self, Self::Purchased | Self::Renewed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EventKind {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "purchased" => Ok(Self::Purchased),
            "renewed" => Ok(Self::Renewed),
            "expired" => Ok(Self::Expired),
            "refunded" => Ok(Self::Refunded),
            "unknown" => Ok(Self::Unknown),
            other => Err(PipelineError::Validation(format!(
                "unknown event kind: {other}"
            ))),
        }
    }
}

/// Where an event came from: a signed provider webhook or a receipt the
/// client submitted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "via", rename_all = "snake_case")]
pub enum EventSource {
    Webhook(Provider),
    Receipt(Platform),
}

impl EventSource {
    pub fn platform(&self) -> Platform {
        match self {
            Self::Webhook(provider) => Platform::from(*provider),
            Self::Receipt(platform) => *platform,
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::Webhook(provider) => Some(*provider),
            Self::Receipt(Platform::StoreA) => Some(Provider::StoreA),
            Self::Receipt(Platform::StoreB) => Some(Provider::StoreB),
            Self::Receipt(Platform::Web) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Webhook(provider) => provider.as_str(),
            Self::Receipt(_) => "receipt",
        }
    }
}

/// Canonical event produced by a provider normalizer, consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub kind: EventKind,
    pub source: EventSource,
    pub original_transaction_id: String,
    pub transaction_id: String,
    pub product_id: String,
    /// Claimed by the provider; checked against the lineage frontier,
    /// never trusted as the only ordering key.
    pub occurred_at: DateTime<Utc>,
    pub is_trial: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Account link supplied by the provider, if the app set one.
    pub app_user_id: Option<String>,
    pub raw_payload: serde_json::Value,
}

impl SubscriptionEvent {
    /// Redeliveries repeat the provider timestamp; storeB renewals that
    /// reuse a purchase token do not.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            self.source.label(),
            self.kind.as_str(),
            self.effective_transaction_id(),
            self.occurred_at.timestamp_millis(),
        )
    }

    /// Lineage id, falling back to the transaction id for providers
    /// without a separate original-transaction concept.
    pub fn lineage(&self) -> &str {
        if self.original_transaction_id.is_empty() {
            &self.transaction_id
        } else {
            &self.original_transaction_id
        }
    }

    pub fn effective_transaction_id(&self) -> &str {
        if self.transaction_id.is_empty() {
            &self.original_transaction_id
        } else {
            &self.transaction_id
        }
    }

    /// Identity fields present: something the state machine can act on.
    pub fn has_identity(&self) -> bool {
        !self.product_id.is_empty()
            && !(self.transaction_id.is_empty() && self.original_transaction_id.is_empty())
    }
}

use {
    super::error::PipelineError,
    super::event::{EventKind, SubscriptionEvent},
    super::id::UserId,
    super::state_machine::{Outcome, Transition},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Rejected,
    Ignored,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AuditOutcome {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "applied" => Ok(Self::Applied),
            "rejected" => Ok(Self::Rejected),
            "ignored" => Ok(Self::Ignored),
            other => Err(PipelineError::Validation(format!(
                "unknown audit outcome: {other}"
            ))),
        }
    }
}

/// For INSERT into the append-only event trail.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub user_id: Option<UserId>,
    pub event_kind: EventKind,
    pub provider: Option<String>,
    pub product_id: Option<String>,
    pub transaction_id: Option<String>,
    pub outcome: AuditOutcome,
    pub actor: String,
    pub metadata: serde_json::Value,
}

impl NewAuditEntry {
    /// Record of one state-machine run, accepted or not.
    pub fn for_transition(
        user_id: &UserId,
        event: &SubscriptionEvent,
        transition: &Transition,
        actor: &str,
    ) -> Self {
        let (outcome, reason) = match transition.outcome {
            Outcome::Accepted => (AuditOutcome::Applied, None),
            Outcome::Rejected(reason) if reason.is_ignored() => {
                (AuditOutcome::Ignored, Some(reason.as_str()))
            }
            Outcome::Rejected(reason) => (AuditOutcome::Rejected, Some(reason.as_str())),
        };
        let mut entry = Self::for_event(Some(user_id), event, outcome, actor, reason);
        entry.metadata["old_status"] = transition.previous_status.as_str().into();
        entry.metadata["new_status"] = transition.state.status.as_str().into();
        entry
    }

    /// Record of an event that never reached the state machine.
    pub fn for_event(
        user_id: Option<&UserId>,
        event: &SubscriptionEvent,
        outcome: AuditOutcome,
        actor: &str,
        reason: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.cloned(),
            event_kind: event.kind,
            provider: Some(event.source.label().to_string()),
            product_id: non_empty(&event.product_id),
            transaction_id: non_empty(event.effective_transaction_id()),
            outcome,
            actor: actor.to_string(),
            metadata: serde_json::json!({
                "outcome": outcome.as_str(),
                "reason": reason,
                "original_transaction_id": event.lineage(),
                "occurred_at": event.occurred_at,
                "payload": event.raw_payload,
            }),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Row read back from the trail.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionEventRecord {
    pub id: Uuid,
    pub user_id: Option<UserId>,
    pub event_kind: EventKind,
    pub provider: Option<String>,
    pub product_id: Option<String>,
    pub transaction_id: Option<String>,
    pub outcome: AuditOutcome,
    pub actor: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

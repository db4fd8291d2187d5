use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

const MAX_ID_LEN: usize = 256;

/// Opaque, stable user identifier. Primary key of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Validation("UserId cannot be empty".into()));
        }
        if trimmed.len() > MAX_ID_LEN {
            return Err(PipelineError::Validation(format!(
                "UserId longer than {MAX_ID_LEN} chars"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Queue deduplication key: one job per provider, kind, transaction and
/// provider timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(provider: &str, kind: &str, transaction_id: &str, occurred_at_ms: i64) -> Self {
        Self(format!("{provider}:{kind}:{transaction_id}:{occurred_at_ms}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

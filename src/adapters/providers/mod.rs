//! Per-provider webhook handling behind one dispatch table.

pub mod store_a;
pub mod store_b;

use {
    crate::adapters::signature,
    crate::domain::{
        event::{EventKind, SubscriptionEvent},
        provider::Provider,
    },
    axum::http::HeaderMap,
    chrono::{DateTime, TimeZone, Utc},
    secrecy::{ExposeSecret, SecretString},
    std::collections::HashMap,
};

pub use store_a::StoreA;
pub use store_b::StoreB;

/// What the ingress needs from each provider: recognise its requests and
/// turn its payloads into canonical events.
pub trait WebhookProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn matches_headers(&self, headers: &HeaderMap) -> bool;

    fn matches_shape(&self, payload: &serde_json::Value) -> bool;

    /// Never fails: missing identity fields yield an `Unknown` event.
    fn normalize(&self, payload: &serde_json::Value, received_at: DateTime<Utc>)
    -> SubscriptionEvent;
}

fn adapter_for(provider: Provider) -> &'static dyn WebhookProvider {
    match provider {
        Provider::StoreA => &StoreA,
        Provider::StoreB => &StoreB,
    }
}

pub fn normalize(provider: Provider, payload: &serde_json::Value) -> SubscriptionEvent {
    normalize_at(provider, payload, Utc::now())
}

/// `received_at` stands in for a missing provider timestamp.
pub fn normalize_at(
    provider: Provider,
    payload: &serde_json::Value,
    received_at: DateTime<Utc>,
) -> SubscriptionEvent {
    let mut event = adapter_for(provider).normalize(payload, received_at);
    if !event.has_identity() {
        event.kind = EventKind::Unknown;
    }
    event
}

/// Webhook secrets resolved once at start-up.
pub struct ProviderRegistry {
    secrets: HashMap<Provider, SecretString>,
}

impl ProviderRegistry {
    pub fn new(secrets: HashMap<Provider, SecretString>) -> Self {
        Self { secrets }
    }

    /// Headers first, then payload shape.
    pub fn detect(&self, headers: &HeaderMap, payload: Option<&serde_json::Value>) -> Option<Provider> {
        let adapters = Provider::ALL.map(adapter_for);
        if let Some(adapter) = adapters.iter().find(|a| a.matches_headers(headers)) {
            return Some(adapter.provider());
        }
        let payload = payload?;
        adapters
            .iter()
            .find(|a| a.matches_shape(payload))
            .map(|a| a.provider())
    }

    pub fn verify(&self, provider: Provider, headers: &HeaderMap, raw_body: &[u8]) -> bool {
        let Some(secret) = self.secrets.get(&provider) else {
            tracing::warn!(%provider, "no webhook secret configured");
            return false;
        };
        let header = headers
            .get(signature::signature_header(provider))
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        signature::verify(raw_body, header, provider, secret.expose_secret())
    }
}

// ── JSON field helpers ─────────────────────────────────────────────────────

/// String field; numbers are stringified since some ids arrive numeric.
fn json_str(v: &serde_json::Value, key: &str) -> Option<String> {
    match v.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_bool(v: &serde_json::Value, key: &str) -> Option<bool> {
    match v.get(key)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Epoch-millis timestamp, as a number or a numeric string.
fn json_millis(v: &serde_json::Value, key: &str) -> Option<DateTime<Utc>> {
    let millis = match v.get(key)? {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

use {
    super::{json_millis, json_str, WebhookProvider},
    crate::adapters::signature::STORE_B_SIGNATURE_HEADER,
    crate::domain::{
        event::{EventKind, EventSource, SubscriptionEvent},
        provider::Provider,
    },
    axum::http::HeaderMap,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    chrono::{DateTime, Utc},
};

/// storeB developer notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreB;

pub fn map_message_type(message_type: &str) -> EventKind {
    match message_type {
        "SUBSCRIPTION_PURCHASED" => EventKind::Purchased,
        "SUBSCRIPTION_RENEWED" => EventKind::Renewed,
        "SUBSCRIPTION_EXPIRED" | "SUBSCRIPTION_CANCELED" => EventKind::Expired,
        "SUBSCRIPTION_REVOKED" => EventKind::Refunded,
        _ => EventKind::Unknown,
    }
}

/// Numeric `notificationType` for senders that omit `messageType`.
pub fn map_numeric_type(code: i64) -> EventKind {
    match code {
        1 | 2 | 7 => EventKind::Renewed,
        4 => EventKind::Purchased,
        3 | 13 => EventKind::Expired,
        12 => EventKind::Refunded,
        _ => EventKind::Unknown,
    }
}

/// Unwrap a push envelope (`{"message": {"data": <base64 JSON>}}`).
/// Anything else comes back unchanged.
pub fn unwrap_envelope(payload: serde_json::Value) -> serde_json::Value {
    let inner = payload
        .get("message")
        .and_then(|m| m.get("data"))
        .and_then(|d| d.as_str())
        .and_then(|d| BASE64.decode(d).ok())
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok());
    inner.unwrap_or(payload)
}

impl WebhookProvider for StoreB {
    fn provider(&self) -> Provider {
        Provider::StoreB
    }

    fn matches_headers(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(STORE_B_SIGNATURE_HEADER)
    }

    fn matches_shape(&self, payload: &serde_json::Value) -> bool {
        let payload = unwrap_envelope(payload.clone());
        payload.get("subscriptionNotification").is_some()
            || payload.get("oneTimeProductNotification").is_some()
    }

    fn normalize(&self, payload: &serde_json::Value, received_at: DateTime<Utc>) -> SubscriptionEvent {
        let unwrapped = unwrap_envelope(payload.clone());
        let notification = unwrapped
            .get("subscriptionNotification")
            .or_else(|| unwrapped.get("oneTimeProductNotification"))
            .unwrap_or(&serde_json::Value::Null);

        let kind = json_str(&unwrapped, "messageType")
            .or_else(|| json_str(notification, "messageType"))
            .map(|t| map_message_type(&t))
            .or_else(|| {
                notification
                    .get("notificationType")
                    .and_then(|v| v.as_i64())
                    .map(map_numeric_type)
            })
            .unwrap_or(EventKind::Unknown);

        // No separate original-id concept: the purchase token is the lineage.
        // `orderId` changes per renewal (`GPA.x..0`, `GPA.x..1`) when sent.
        let transaction_id = json_str(notification, "transactionId")
            .or_else(|| json_str(notification, "orderId"))
            .or_else(|| json_str(notification, "purchaseToken"))
            .unwrap_or_default();
        let original_transaction_id = json_str(notification, "originalTransactionId")
            .or_else(|| json_str(notification, "purchaseToken"))
            .unwrap_or_else(|| transaction_id.clone());
        let product_id = json_str(notification, "productId")
            .or_else(|| json_str(notification, "subscriptionId"))
            .or_else(|| json_str(notification, "sku"))
            .unwrap_or_default();

        let occurred_at = json_millis(&unwrapped, "eventTimeMillis")
            .or_else(|| json_millis(notification, "eventTimeMillis"))
            .unwrap_or(received_at);

        SubscriptionEvent {
            kind,
            source: EventSource::Webhook(Provider::StoreB),
            original_transaction_id,
            transaction_id,
            product_id,
            occurred_at,
            is_trial: notification.get("paymentState").and_then(|v| v.as_i64()) == Some(2),
            expires_at: json_millis(notification, "expiryTimeMillis"),
            app_user_id: json_str(notification, "obfuscatedExternalAccountId")
                .or_else(|| json_str(&unwrapped, "obfuscatedExternalAccountId")),
            raw_payload: unwrapped,
        }
    }
}

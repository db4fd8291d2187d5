use {
    super::{json_bool, json_millis, json_str, WebhookProvider},
    crate::adapters::signature::STORE_A_SIGNATURE_HEADER,
    crate::domain::{
        event::{EventKind, EventSource, SubscriptionEvent},
        provider::Provider,
    },
    axum::http::HeaderMap,
    chrono::{DateTime, Utc},
};

/// storeA server notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreA;

/// Notification type → canonical kind. Purchase-group types resolve to
/// `Purchased` or `Renewed` depending on whether the lineage has an
/// earlier transaction.
pub fn map_notification_type(notification_type: &str, first_in_lineage: bool) -> EventKind {
    match notification_type {
        "INITIAL_BUY" => EventKind::Purchased,
        "DID_RENEW" | "INTERACTIVE_RENEWAL" | "CONSUMPTION_REQUEST" | "SUBSCRIBED" => {
            if first_in_lineage {
                EventKind::Purchased
            } else {
                EventKind::Renewed
            }
        }
        "EXPIRED" | "DID_FAIL_TO_RENEW" | "GRACE_PERIOD" => EventKind::Expired,
        "REFUND" | "REVOKE" => EventKind::Refunded,
        _ => EventKind::Unknown,
    }
}

impl WebhookProvider for StoreA {
    fn provider(&self) -> Provider {
        Provider::StoreA
    }

    fn matches_headers(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(STORE_A_SIGNATURE_HEADER)
    }

    fn matches_shape(&self, payload: &serde_json::Value) -> bool {
        payload.get("notificationType").is_some()
            && payload.get("data").is_some()
            && payload.get("signedPayload").is_some()
    }

    fn normalize(&self, payload: &serde_json::Value, received_at: DateTime<Utc>) -> SubscriptionEvent {
        let data = payload.get("data").unwrap_or(&serde_json::Value::Null);

        let transaction_id = json_str(data, "transactionId").unwrap_or_default();
        let original_transaction_id =
            json_str(data, "originalTransactionId").unwrap_or_else(|| transaction_id.clone());
        let product_id = json_str(data, "productId").unwrap_or_default();

        let first_in_lineage = original_transaction_id == transaction_id;
        let kind = json_str(payload, "notificationType")
            .map(|t| map_notification_type(&t, first_in_lineage))
            .unwrap_or(EventKind::Unknown);

        let occurred_at = json_millis(data, "signedDate")
            .or_else(|| json_millis(payload, "signedDate"))
            .or_else(|| json_millis(data, "purchaseDate"))
            .unwrap_or(received_at);

        let is_trial = json_bool(data, "isTrialPeriod").unwrap_or(false)
            || data.get("offerType").and_then(|v| v.as_i64()) == Some(1);

        SubscriptionEvent {
            kind,
            source: EventSource::Webhook(Provider::StoreA),
            original_transaction_id,
            transaction_id,
            product_id,
            occurred_at,
            is_trial,
            expires_at: json_millis(data, "expiresDate"),
            app_user_id: json_str(data, "appAccountToken"),
            raw_payload: payload.clone(),
        }
    }
}

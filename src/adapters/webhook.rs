use {
    crate::{
        AppState,
        adapters::providers,
        domain::{
            audit::AuditOutcome,
            error::PipelineError,
            event::EventKind,
            queue::NewJob,
        },
    },
    axum::{
        Json,
        body::Bytes,
        extract::{State, rejection::BytesRejection},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    std::time::Duration,
};

/// Upper bound on one delivery, well inside the router timeout so the
/// sender always gets our 200 rather than a gateway error.
const INGEST_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    /// Acknowledged without processing.
    Skipped(&'static str),
}

/// Webhook boundary policy: every result is HTTP 200. Senders retry on
/// anything else, and a retry cannot fix what went wrong here. Detail
/// stays in the logs.
pub fn always_ok(result: Result<IngestOutcome, PipelineError>) -> (StatusCode, Json<serde_json::Value>) {
    let body = match result {
        Ok(outcome) => {
            tracing::debug!(?outcome, "webhook acknowledged");
            serde_json::json!({ "status": "ok" })
        }
        Err(
            err @ (PipelineError::UnknownProvider
            | PipelineError::UnknownEventKind(_)
            | PipelineError::ReplayNoop),
        ) => {
            tracing::info!(reason = %err, "webhook acknowledged without processing");
            serde_json::json!({ "status": "ok" })
        }
        Err(PipelineError::SignatureInvalid(reason)) => {
            tracing::warn!(%reason, "webhook signature rejected");
            serde_json::json!({ "status": "error", "message": "invalid signature" })
        }
        Err(err) => {
            tracing::error!(error = %err, "webhook processing failed");
            serde_json::json!({ "status": "error", "message": "processing failed" })
        }
    };
    (StatusCode::OK, Json(body))
}

/// The request timeout answers 408 before the handler runs when a body
/// streams in too slowly. Senders must still see a 200.
pub async fn acknowledge_timeout(response: Response) -> Response {
    if response.status() != StatusCode::REQUEST_TIMEOUT {
        return response;
    }
    always_ok(Err(PipelineError::Timeout)).into_response()
}

#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(
        provider = tracing::field::Empty,
        event_kind = tracing::field::Empty,
        transaction_id = tracing::field::Empty,
    )
)]
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    let result = match body {
        Ok(body) => tokio::time::timeout(INGEST_DEADLINE, ingest(&state, &headers, &body))
            .await
            .unwrap_or(Err(PipelineError::Timeout)),
        Err(rejection) => Err(PipelineError::Validation(rejection.body_text())),
    };
    always_ok(result)
}

/// detect → verify → normalize → resolve user → enqueue.
pub async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<IngestOutcome, PipelineError> {
    let parsed = serde_json::from_slice::<serde_json::Value>(body).ok();

    let Some(provider) = state.providers.detect(headers, parsed.as_ref()) else {
        tracing::warn!(body_len = body.len(), "webhook from unknown provider, skipping");
        return Err(PipelineError::UnknownProvider);
    };
    tracing::Span::current().record("provider", tracing::field::display(provider));

    if !state.providers.verify(provider, headers, body) {
        return Err(PipelineError::SignatureInvalid(format!(
            "{provider} signature did not verify"
        )));
    }

    let payload = parsed.ok_or_else(|| PipelineError::Validation("body is not JSON".into()))?;
    let event = providers::normalize(provider, &payload);
    tracing::Span::current()
        .record("event_kind", tracing::field::display(event.kind))
        .record(
            "transaction_id",
            tracing::field::display(event.effective_transaction_id()),
        );

    let user_id = state.reconciler.resolve_user(&event).await?;

    if event.kind == EventKind::Unknown || !event.has_identity() {
        state
            .reconciler
            .record_unprocessed(user_id.as_ref(), &event, AuditOutcome::Ignored, "unknown_event_kind")
            .await?;
        let raw_type = payload
            .get("notificationType")
            .or_else(|| payload.get("messageType"))
            .and_then(|t| t.as_str())
            .unwrap_or("unrecognized");
        return Err(PipelineError::UnknownEventKind(raw_type.to_string()));
    }

    let Some(user_id) = user_id else {
        tracing::warn!(lineage = event.lineage(), "no user linked to this lineage");
        state
            .reconciler
            .record_unprocessed(None, &event, AuditOutcome::Ignored, "unresolved_user")
            .await?;
        return Ok(IngestOutcome::Skipped("unresolved user"));
    };

    let inserted = state
        .queue
        .enqueue(NewJob::new(user_id.clone(), event.clone()))
        .await?;
    if !inserted {
        tracing::info!(dedup_key = %event.dedup_key(), "duplicate delivery");
        state
            .reconciler
            .record_unprocessed(Some(&user_id), &event, AuditOutcome::Rejected, "duplicate_delivery")
            .await?;
        return Err(PipelineError::ReplayNoop);
    }

    tracing::info!(%user_id, "webhook event queued");
    Ok(IngestOutcome::Queued)
}

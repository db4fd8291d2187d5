use {
    super::{api_errors::ApiError, auth::AuthUser},
    crate::{
        AppState,
        domain::{error::PipelineError, provider::Platform, subscription::SubscriptionStatusView},
    },
    axum::{
        Json,
        extract::{State, rejection::JsonRejection},
    },
    serde::Deserialize,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub receipt: String,
    pub product_id: String,
    pub platform: Platform,
}

pub async fn receipt_handler(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ReceiptRequest>, JsonRejection>,
) -> Result<Json<SubscriptionStatusView>, ApiError> {
    let Json(req) = payload.map_err(|e| PipelineError::Validation(e.body_text()))?;

    let view = state
        .reconciler
        .reconcile_from_receipt(&user_id, &req.receipt, &req.product_id, req.platform)
        .await?;
    Ok(Json(view))
}

pub async fn status_handler(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SubscriptionStatusView>, ApiError> {
    Ok(Json(state.reconciler.get_status(&user_id).await?))
}

pub mod api_errors;
pub mod auth;
pub mod client;
pub mod providers;
pub mod signature;
pub mod webhook;

use {
    crate::AppState,
    axum::{
        Router,
        extract::DefaultBodyLimit,
        middleware,
        routing::{get, post},
    },
    std::time::Duration,
    tower::ServiceBuilder,
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
};

/// Provider notifications are a few KB; anything near this is not one.
const BODY_LIMIT: usize = 64 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router(state: AppState) -> Router {
    let webhooks = Router::new()
        .route("/webhooks/subscriptions", post(webhook::webhook_handler))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::map_response(webhook::acknowledge_timeout))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        );

    let client = Router::new()
        .route("/subscriptions/receipt", post(client::receipt_handler))
        .route("/subscriptions/status", get(client::status_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .route("/", get(|| async { "ok" }))
        .merge(webhooks)
        .merge(client)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
        .with_state(state)
}

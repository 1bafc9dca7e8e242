//! Route Definitions
//!
//! `/health` and `/metrics` are open; everything else requires an
//! `X-Operator-Key`.

use super::{
    handlers::*,
    middleware::{request_id_middleware, require_operator},
    stream::stream_handler,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let operator_routes = Router::new()
        .route("/bets", post(place_bet_handler))
        .route("/bets/:id", get(bet_handler))
        .route("/players", post(register_player_handler))
        .route("/rounds/:id", get(round_handler))
        .route("/webhooks", get(list_webhooks_handler))
        .route("/webhooks/retry/:id", post(retry_webhook_handler))
        .route("/outbox", get(list_outbox_handler))
        .route("/audit", get(list_audit_handler))
        .route("/stream", get(stream_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_operator));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(operator_routes)
        .fallback(not_found_handler)
        // Outermost, so auth failures carry the request id too
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

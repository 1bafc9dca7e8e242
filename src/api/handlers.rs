//! Request Handlers
//!
//! Every handler below `/health` and `/metrics` runs for an authenticated
//! operator and only sees that operator's data.

use super::{errors::ApiError, middleware::RequestId};
use crate::compliance::{ComplianceService, DEFAULT_AUDIT_LIMIT};
use crate::events::EventBus;
use crate::games::settlement::{PlaceBetRequest, SettlementPipeline};
use crate::metrics::SettlementMetrics;
use crate::models::{AuditLog, Bet, Operator, OutboxEntry, Player, Round, WebhookEvent, WebhookStatus};
use crate::store::Store;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const REPLAY_HEADER: &str = "x-idempotent-replay";

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<SettlementPipeline>,
    pub compliance: ComplianceService,
    pub bus: EventBus,
    pub metrics: Arc<SettlementMetrics>,
    pub keepalive: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<SettlementPipeline>,
        bus: EventBus,
        metrics: Arc<SettlementMetrics>,
        keepalive: Duration,
    ) -> Self {
        Self {
            compliance: ComplianceService::new(store.clone()),
            store,
            pipeline,
            bus,
            metrics,
            keepalive,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus_format(state.bus.stats()),
    )
}

#[derive(Debug, Deserialize)]
pub struct PlaceBetBody {
    pub player_id: i64,
    pub amount: f64,
    pub idempotency_key: String,
}

/// POST /bets
///
/// A replayed idempotency key returns the original bet with
/// `X-Idempotent-Replay: true`.
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<PlaceBetBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(&request_id.0, e.body_text()))?;
    if body.idempotency_key.trim().is_empty() {
        return Err(ApiError::bad_request(&request_id.0, "idempotency_key is required"));
    }

    let outcome = state
        .pipeline
        .place_bet(PlaceBetRequest {
            operator_id: operator.id,
            player_id: body.player_id,
            amount: body.amount,
            idempotency_key: body.idempotency_key,
        })
        .await
        .map_err(|e| ApiError::from_settlement(&request_id.0, e))?;

    let replayed = outcome.is_replay();
    let mut response = Json(outcome.into_bet()).into_response();
    if replayed {
        response
            .headers_mut()
            .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct RegisterPlayerBody {
    pub external_player_id: String,
    pub jurisdiction: String,
}

/// POST /players
pub async fn register_player_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterPlayerBody>, JsonRejection>,
) -> Result<Json<Player>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(&request_id.0, e.body_text()))?;
    if body.external_player_id.trim().is_empty() || body.jurisdiction.trim().is_empty() {
        return Err(ApiError::bad_request(
            &request_id.0,
            "external_player_id and jurisdiction are required",
        ));
    }

    let player = state
        .store
        .get_or_create_player(operator.id, &body.external_player_id, &body.jurisdiction)
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?;
    Ok(Json(player))
}

/// GET /rounds/:id
pub async fn round_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<i64>,
) -> Result<Json<Round>, ApiError> {
    state
        .store
        .round(round_id)
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?
        .filter(|round| round.operator_id == operator.id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&request_id.0, format!("round {} not found", round_id)))
}

/// GET /bets/:id
pub async fn bet_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    Path(bet_id): Path<i64>,
) -> Result<Json<Bet>, ApiError> {
    state
        .store
        .bet(bet_id)
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?
        .filter(|bet| bet.operator_id == operator.id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&request_id.0, format!("bet {} not found", bet_id)))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

/// GET /webhooks?status=pending|processing|completed|failed
pub async fn list_webhooks_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<WebhookEvent>>, ApiError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<WebhookStatus>()
                .map_err(|e| ApiError::bad_request(&request_id.0, e))?,
        ),
        None => None,
    };

    let events = state
        .store
        .list_webhooks(operator.id, status)
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?;
    Ok(Json(events))
}

/// POST /webhooks/retry/:id
///
/// Puts a pending, failed or completed event back in the queue with a fresh
/// retry budget and expiry window. 409 while a worker is delivering it.
pub async fn retry_webhook_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<Json<WebhookEvent>, ApiError> {
    let event = state
        .store
        .reset_webhook(operator.id, event_id, Utc::now())
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?
        .ok_or_else(|| ApiError::not_found(&request_id.0, format!("webhook event {} not found", event_id)))?;

    info!(operator_id = operator.id, event_id, "Webhook retry scheduled");
    Ok(Json(event))
}

/// `processed`/`completed` and `pending`/`retrying` are synonyms; anything
/// else lists every entry.
pub fn outbox_filter(status: Option<&str>) -> Option<bool> {
    match status {
        Some("processed") | Some("completed") => Some(true),
        Some("pending") | Some("retrying") => Some(false),
        _ => None,
    }
}

/// GET /outbox?status=
pub async fn list_outbox_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    let entries = state
        .store
        .list_outbox(operator.id, outbox_filter(query.status.as_deref()))
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?;
    Ok(Json(entries))
}

/// Malformed numbers fall back to the defaults instead of failing the call
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub player_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// GET /audit?player_id=&limit=50&offset=0
pub async fn list_audit_handler(
    Extension(request_id): Extension<RequestId>,
    Extension(operator): Extension<Operator>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLog>>, ApiError> {
    let player_id = query.player_id.as_deref().and_then(|v| v.parse::<i64>().ok());
    let limit = query
        .limit
        .as_deref()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_AUDIT_LIMIT);
    let offset = query.offset.as_deref().and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);

    let logs = state
        .compliance
        .list_logs(operator.id, player_id, limit, offset)
        .await
        .map_err(|e| ApiError::from_store(&request_id.0, e))?;
    Ok(Json(logs))
}

/// Fallback for unknown routes
pub async fn not_found_handler(Extension(request_id): Extension<RequestId>) -> ApiError {
    ApiError::not_found(&request_id.0, "no such route")
}

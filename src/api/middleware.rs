//! Middleware Components
//!
//! CORS, request tracking and operator authentication.

use super::{errors::ApiError, handlers::AppState};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, ExposeHeaders};
use tracing::{debug, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(ExposeHeaders::list([HeaderName::from_static(REQUEST_ID_HEADER)]))
}

/// Request ID wrapper for extracting in handlers
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Reuse the caller's request id when present, otherwise mint one
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Resolve the calling operator from its API key and attach it to the request
pub async fn require_operator(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let api_key = request
        .headers()
        .get(OPERATOR_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::unauthorized(&request_id, "missing X-Operator-Key"))?
        .to_string();

    let operator = state
        .store
        .operator_by_api_key(&api_key)
        .await
        .map_err(|e| ApiError::from_store(&request_id, e))?
        .ok_or_else(|| {
            warn!(request_id = %request_id, "Rejected unknown operator key");
            ApiError::unauthorized(&request_id, "invalid operator api key")
        })?;

    debug!(request_id = %request_id, operator_id = operator.id, "Operator authenticated");
    request.extensions_mut().insert(operator);
    Ok(next.run(request).await)
}

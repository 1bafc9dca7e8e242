//! API Error Handling
//!
//! Structured error responses with HTTP status codes and request tracking.

use crate::errors::{SettlementError, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// NOT_FOUND, BAD_REQUEST, INSUFFICIENT_FUNDS, ...
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    /// Business decline; the code names the reason
    Declined { code: &'static str, message: String },
    InternalError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    fn new(request_id: &str, kind: ApiErrorKind) -> Self {
        Self {
            kind,
            request_id: request_id.to_string(),
        }
    }

    pub fn not_found(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::NotFound(message.into()))
    }

    pub fn bad_request(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::BadRequest(message.into()))
    }

    pub fn unauthorized(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::Unauthorized(message.into()))
    }

    pub fn internal_error(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::InternalError(message.into()))
    }

    pub fn service_unavailable(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::ServiceUnavailable(message.into()))
    }

    pub fn conflict(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::Conflict(message.into()))
    }

    /// Storage failures are logged here and reported without detail. A
    /// conflicting write is the caller's problem and keeps its message.
    pub fn from_store(request_id: &str, err: StoreError) -> Self {
        if let StoreError::Conflict(message) = err {
            return Self::conflict(request_id, message);
        }
        error!(request_id, error = %err, "Storage failure");
        Self::internal_error(request_id, "storage failure")
    }

    pub fn from_settlement(request_id: &str, err: SettlementError) -> Self {
        let kind = match err {
            SettlementError::PlayerNotFound { .. } => ApiErrorKind::Declined {
                code: "PLAYER_NOT_FOUND",
                message: err.to_string(),
            },
            SettlementError::ComplianceViolation(ref violation) => ApiErrorKind::Declined {
                code: "COMPLIANCE_VIOLATION",
                message: violation.to_string(),
            },
            SettlementError::InsufficientFunds => ApiErrorKind::Declined {
                code: "INSUFFICIENT_FUNDS",
                message: err.to_string(),
            },
            SettlementError::InvalidAmount(_) => ApiErrorKind::BadRequest(err.to_string()),
            SettlementError::WalletUnavailable(_) => ApiErrorKind::ServiceUnavailable(err.to_string()),
            SettlementError::Entropy(_) | SettlementError::Persistence(_) => {
                error!(request_id, error = %err, "Bet settlement failed");
                ApiErrorKind::InternalError("bet could not be settled".to_string())
            }
        };
        Self::new(request_id, kind)
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Conflict(_) => StatusCode::CONFLICT,
            ApiErrorKind::Declined { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorKind::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorKind::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code_and_message(&self) -> (&'static str, &str) {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => ("NOT_FOUND", msg.as_str()),
            ApiErrorKind::BadRequest(msg) => ("BAD_REQUEST", msg.as_str()),
            ApiErrorKind::Unauthorized(msg) => ("UNAUTHORIZED", msg.as_str()),
            ApiErrorKind::Conflict(msg) => ("CONFLICT", msg.as_str()),
            ApiErrorKind::Declined { code, message } => (*code, message.as_str()),
            ApiErrorKind::InternalError(msg) => ("INTERNAL_ERROR", msg.as_str()),
            ApiErrorKind::ServiceUnavailable(msg) => ("SERVICE_UNAVAILABLE", msg.as_str()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (code, message) = self.code_and_message();
        write!(f, "[{}] {}: {}", self.request_id, code, message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = self.code_and_message();
        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        });

        (status, body).into_response()
    }
}

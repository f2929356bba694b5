// API error type shared by all handlers

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::stripe::ProcessorError;
use crate::services::webhook::WebhookError;
use crate::stores::StoreError;

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Affiliate code not found or inactive")]
    AffiliateNotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(
        "Minimum payout amount is {minimum_cents} cents / El importe mínimo de retiro es {minimum_cents} céntimos"
    )]
    BelowMinimumPayout { minimum_cents: i64 },

    #[error(
        "Requested amount exceeds available balance of {available_cents} cents / El importe solicitado supera el saldo disponible de {available_cents} céntimos"
    )]
    InsufficientBalance {
        requested_cents: i64,
        available_cents: i64,
    },

    #[error("Payout account not ready: {0}")]
    PayoutAccountNotReady(String),

    #[error("Payment processor error: {0}")]
    PaymentProcessor(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    InternalError,
}

// =============================================================================
// ERROR CONVERSIONS
// =============================================================================

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Record".to_string()),
            StoreError::Conflict(constraint) => {
                tracing::debug!(constraint = %constraint, "Unique constraint violated");
                ApiError::Conflict("Resource already exists".to_string())
            },
            StoreError::InsufficientBalance => {
                ApiError::Conflict("Balance changed while the request was processed".to_string())
            },
            StoreError::Unavailable => {
                ApiError::ServiceUnavailable("datastore unreachable".to_string())
            },
            StoreError::Database(msg) | StoreError::Pool(msg) | StoreError::Cache(msg) => {
                ApiError::DatabaseError(msg)
            },
        }
    }
}

impl From<ProcessorError> for ApiError {
    fn from(err: ProcessorError) -> Self {
        ApiError::PaymentProcessor(err.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidPayload(msg) => ApiError::BadRequest(msg),
            other => ApiError::InvalidSignature(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors
                    .iter()
                    .map(move |e| format!("{}: {}", field, e.message.as_ref().unwrap_or(&e.code)))
            })
            .collect();
        messages.sort();

        ApiError::ValidationError(messages.join(", "))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::ValidationError(_)
            | ApiError::InvalidSignature(_)
            | ApiError::BelowMinimumPayout { .. }
            | ApiError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,

            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,

            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,

            ApiError::NotFound(_) | ApiError::AffiliateNotFound => StatusCode::NOT_FOUND,

            ApiError::Conflict(_) | ApiError::PayoutAccountNotReady(_) => StatusCode::CONFLICT,

            ApiError::PaymentProcessor(_) => StatusCode::BAD_GATEWAY,

            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            ApiError::DatabaseError(_) | ApiError::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Get error code for API response
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::AffiliateNotFound => "AFFILIATE_NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::BelowMinimumPayout { .. } => "BELOW_MINIMUM_PAYOUT",
            ApiError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ApiError::PayoutAccountNotReady(_) => "PAYOUT_ACCOUNT_NOT_READY",
            ApiError::PaymentProcessor(_) => "PAYMENT_PROCESSOR_ERROR",
            ApiError::InvalidSignature(_) => "INVALID_SIGNATURE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Create error response
    pub fn to_response(&self) -> ApiErrorResponse {
        let details = match self {
            ApiError::BelowMinimumPayout { minimum_cents } => {
                Some(serde_json::json!({ "minimum_cents": minimum_cents }))
            },
            ApiError::InsufficientBalance {
                requested_cents,
                available_cents,
            } => Some(serde_json::json!({
                "requested_cents": requested_cents,
                "available_cents": available_cents,
            })),
            ApiError::ValidationError(msg) => {
                Some(serde_json::json!({ "validation_errors": msg }))
            },
            _ => None,
        };

        // Driver messages stay in the logs
        let error = match self {
            ApiError::DatabaseError(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        ApiErrorResponse {
            error,
            code: self.error_code().to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "Request failed: {}", self);
        }

        (status, Json(self.to_response())).into_response()
    }
}

// =============================================================================
// RESULT TYPE
// =============================================================================

pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// TESTS
// =============================================================================

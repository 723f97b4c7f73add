use axum::http::StatusCode;
use serde::Serialize;

/// Core failure taxonomy. Everything a money-moving operation can surface
/// to a caller maps onto one of these variants with a stable error code.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("idempotency key reused with a different payload")]
    KeyConflict,

    #[error("transaction {0} already posted")]
    DuplicateTransaction(uuid::Uuid),

    #[error("unbalanced transaction: {0}")]
    UnbalancedTransaction(String),

    #[error("rail {rail} failed: {code}: {message}")]
    Rail {
        rail: String,
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("no healthy rail available")]
    NoHealthyRail,

    #[error("payment blocked by risk assessment")]
    RiskBlocked,

    #[error("compensation failed for intent {0}; frozen for manual intervention")]
    SagaCompensationFailure(uuid::Uuid),

    #[error("webhook delivery {0} exhausted its attempts")]
    DeliveryExhausted(uuid::Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::KeyConflict => "KEY_CONFLICT",
            CoreError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            CoreError::UnbalancedTransaction(_) => "UNBALANCED_TRANSACTION",
            CoreError::Rail { .. } => "RAIL_ERROR",
            CoreError::NoHealthyRail => "NO_HEALTHY_RAIL",
            CoreError::RiskBlocked => "RISK_BLOCKED",
            CoreError::SagaCompensationFailure(_) => "COMPENSATION_FAILED",
            CoreError::DeliveryExhausted(_) => "DELIVERY_EXHAUSTED",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::KeyConflict => StatusCode::BAD_REQUEST,
            CoreError::DuplicateTransaction(_) => StatusCode::CONFLICT,
            CoreError::UnbalancedTransaction(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Rail { retryable, .. } => {
                if *retryable {
                    StatusCode::BAD_GATEWAY
                } else {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            }
            CoreError::NoHealthyRail => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::RiskBlocked => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::SagaCompensationFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::DeliveryExhausted(_) => StatusCode::GONE,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

pub fn envelope(code: &str, message: &str) -> ErrorEnvelope {
    ErrorEnvelope {
        error: ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        },
    }
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(e: &CoreError) -> Self {
        envelope(e.code(), &e.to_string())
    }
}

pub type HandlerError = (StatusCode, axum::Json<ErrorEnvelope>);

pub fn reject(e: CoreError) -> HandlerError {
    (e.status(), axum::Json((&e).into()))
}

pub fn internal(e: anyhow::Error) -> HandlerError {
    reject(CoreError::Internal(e))
}

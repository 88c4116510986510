//! Unified error type for the order pipeline
//!
//! `WorkflowError` carries the business-failure taxonomy the task workers
//! use to decide between retry and dead-letter, and maps onto HTTP responses
//! for the API surface. Infrastructure errors are logged but never exposed
//! to clients.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("insufficient stock for SKU {sku}: need {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: i64,
        available: i64,
    },

    #[error("refund amount must be greater than zero")]
    InvalidRefundAmount,

    #[error("refund amount exceeds remaining refundable amount for order")]
    RefundExceedsRefundable,

    #[error("unknown payment reference: {0}")]
    UnknownPaymentReference(String),

    #[error("payment gateway error: {0}")]
    GatewayTransientFailure(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("refund not found: {0}")]
    RefundNotFound(String),

    #[error("product not found: {0}")]
    ProductNotFound(i64),

    #[error("invalid order record: {0}")]
    InvalidIntake(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("storage error: {0}")]
    Store(#[source] BoxError),
}

impl WorkflowError {
    /// Whether a failed task carrying this error should be dead-lettered
    /// immediately instead of retried.
    ///
    /// `InsufficientStock` stays retryable: concurrent rollbacks can free
    /// stock between deliveries. `GatewayTransientFailure` and storage errors
    /// are retried up to the task's attempt budget.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkflowError::InvalidRefundAmount
                | WorkflowError::RefundExceedsRefundable
                | WorkflowError::UnknownPaymentReference(_)
                | WorkflowError::InvalidIntake(_)
                | WorkflowError::InvalidTransition(_)
        )
    }

    pub fn store<E: Into<BoxError>>(err: E) -> Self {
        WorkflowError::Store(err.into())
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(e: sqlx::Error) -> Self {
        WorkflowError::Store(e.into())
    }
}

impl From<redis::RedisError> for WorkflowError {
    fn from(e: redis::RedisError) -> Self {
        WorkflowError::Store(e.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            WorkflowError::OrderNotFound(_)
            | WorkflowError::RefundNotFound(_)
            | WorkflowError::ProductNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            WorkflowError::InsufficientStock { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_stock")
            }
            WorkflowError::InvalidRefundAmount | WorkflowError::RefundExceedsRefundable => {
                (StatusCode::UNPROCESSABLE_ENTITY, "refund_rejected")
            }
            WorkflowError::UnknownPaymentReference(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unknown_payment_reference")
            }
            WorkflowError::InvalidIntake(_) => (StatusCode::BAD_REQUEST, "invalid_record"),
            WorkflowError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            WorkflowError::GatewayTransientFailure(_) => (StatusCode::BAD_GATEWAY, "gateway_error"),
            WorkflowError::Store(err) => {
                tracing::error!(error = %err, "Storage error");
                let body = ErrorResponse {
                    error: "internal_error".to_string(),
                    message: "An internal error occurred".to_string(),
                };
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result alias used throughout the pipeline
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors_dead_letter() {
        assert!(WorkflowError::UnknownPaymentReference("pay_x".into()).is_permanent());
        assert!(WorkflowError::RefundExceedsRefundable.is_permanent());
        assert!(WorkflowError::InvalidRefundAmount.is_permanent());
        assert!(WorkflowError::InvalidIntake("missing external_ref".into()).is_permanent());
    }

    #[test]
    fn transient_errors_retry() {
        assert!(!WorkflowError::GatewayTransientFailure("timeout".into()).is_permanent());
        assert!(
            !WorkflowError::InsufficientStock {
                sku: "SKU-1".into(),
                requested: 3,
                available: 2
            }
            .is_permanent()
        );
        assert!(!WorkflowError::store("connection reset").is_permanent());
    }
}

//! Refund request endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::{Result, WorkflowError};
use crate::model::Refund;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Omitted means a full refund of the order total.
    pub amount_cents: Option<i64>,
    /// Caller-supplied idempotency key; generated when omitted.
    pub reference: Option<String>,
    pub reason: Option<String>,
}

/// POST /api/orders/{external_ref}/refunds
pub async fn request_refund(
    State(state): State<AppState>,
    Path(external_ref): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Refund>)> {
    let order = state
        .orders
        .order_by_external_ref(&external_ref)
        .await?
        .ok_or(WorkflowError::OrderNotFound(external_ref))?;

    let refund = match req.amount_cents {
        Some(amount) => {
            state
                .refund_engine
                .request_refund(order.id, amount, req.reference, req.reason.as_deref())
                .await?
        }
        None => {
            state
                .refund_engine
                .request_full_refund(order.id, req.reference, req.reason.as_deref())
                .await?
        }
    };
    Ok((StatusCode::ACCEPTED, Json(refund)))
}

/// GET /api/orders/{external_ref}/refunds
pub async fn list_refunds(
    State(state): State<AppState>,
    Path(external_ref): Path<String>,
) -> Result<Json<Vec<Refund>>> {
    let order = state
        .orders
        .order_by_external_ref(&external_ref)
        .await?
        .ok_or(WorkflowError::OrderNotFound(external_ref))?;
    Ok(Json(state.refunds.refunds_for_order(order.id).await?))
}

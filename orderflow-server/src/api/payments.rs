//! Payment gateway callback endpoint
//!
//! Real gateways retry callbacks until acknowledged, so this endpoint only
//! enqueues the callback for the workers and answers 202. The queue's
//! at-least-once delivery plus the terminal-state check in the workflow
//! make duplicate deliveries harmless.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::queue::Task;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentCallbackRequest {
    pub payment_ref: String,
    pub success: bool,
    pub reason: Option<String>,
}

/// POST /api/payments/callback
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(req): Json<PaymentCallbackRequest>,
) -> Result<StatusCode> {
    state
        .queue
        .enqueue(&Task::PaymentCallback {
            payment_ref: req.payment_ref,
            success: req.success,
            reason: req.reason,
        })
        .await?;
    Ok(StatusCode::ACCEPTED)
}

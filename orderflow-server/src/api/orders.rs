//! Order ingestion and lookup endpoints
//!
//! Ingestion is asynchronous: each record is validated, then enqueued as
//! its own task. Malformed rows are reported back per index and skipped;
//! they never block the rest of the batch.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::intake::{OrderIntake, RawOrderRecord};
use crate::model::{Order, OrderLine, Refund};
use crate::queue::Task;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub records: Vec<RawOrderRecord>,
}

#[derive(Debug, Serialize)]
pub struct RowError {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub enqueued: usize,
    pub rejected: usize,
    pub errors: Vec<RowError>,
}

/// POST /api/orders/ingest
pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let mut enqueued = 0;
    let mut errors = Vec::new();

    for (index, record) in req.records.into_iter().enumerate() {
        // Validate up front so the caller sees malformed rows immediately;
        // the task body re-validates before touching the workflow.
        if let Err(err) = OrderIntake::from_record(&record) {
            errors.push(RowError {
                index,
                error: err.to_string(),
            });
            continue;
        }
        state.queue.enqueue(&Task::ProcessOrder { record }).await?;
        enqueued += 1;
    }

    tracing::info!(enqueued, rejected = errors.len(), "Ingestion batch accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            enqueued,
            rejected: errors.len(),
            errors,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderLine>,
    pub refunds: Vec<Refund>,
}

/// GET /api/orders/{external_ref}
pub async fn get_order(
    State(state): State<AppState>,
    Path(external_ref): Path<String>,
) -> Result<Json<OrderDetail>> {
    let order = state
        .orders
        .order_by_external_ref(&external_ref)
        .await?
        .ok_or(WorkflowError::OrderNotFound(external_ref))?;
    let items = state.orders.order_items(order.id).await?;
    let refunds = state.refunds.refunds_for_order(order.id).await?;
    Ok(Json(OrderDetail {
        order,
        items,
        refunds,
    }))
}

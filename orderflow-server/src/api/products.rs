//! Product admin endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::{Result, WorkflowError};
use crate::model::Product;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub stock: i64,
}

/// POST /api/products
pub async fn create_product(
    State(state): State<AppState>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    if req.sku.trim().is_empty() {
        return Err(WorkflowError::InvalidIntake("sku must not be empty".into()));
    }
    if req.price_cents < 0 || req.stock < 0 {
        return Err(WorkflowError::InvalidIntake(
            "price_cents and stock must be non-negative".into(),
        ));
    }
    let product = state
        .inventory
        .create_product(&req.sku, &req.name, req.price_cents, req.stock)
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// GET /api/products
pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.inventory.list_products().await?))
}

/// GET /api/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>> {
    let product = state
        .inventory
        .product(id)
        .await?
        .ok_or(WorkflowError::ProductNotFound(id))?;
    Ok(Json(product))
}

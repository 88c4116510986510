//! Persistence seams for the order pipeline
//!
//! Each trait groups the transaction-scoped operations of one component, so
//! implementations can guarantee atomicity without leaking transaction
//! handles across the seam. `store::postgres` is the production
//! implementation; `store::memory` backs tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::intake::OrderIntake;
use crate::model::{Order, OrderLine, Product, Refund};

/// Order rows and their line items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Find-or-create by `external_ref`: overwrites customer and total,
    /// resets status to `Created` and replaces all line items, in a single
    /// transaction. If the existing order still holds a reservation, it is
    /// released first so re-ingestion never leaks reserved units.
    async fn upsert_order(&self, intake: &OrderIntake) -> Result<Order>;

    async fn order(&self, id: i64) -> Result<Option<Order>>;

    async fn order_by_external_ref(&self, external_ref: &str) -> Result<Option<Order>>;

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderLine>>;

    /// Record the gateway reference and move the order to `Paid`. The order
    /// must currently be `Reserved`.
    async fn mark_paid(&self, order_id: i64, payment_ref: &str) -> Result<()>;
}

/// Inventory ledger: per-product stock/reserved counters under row locks.
///
/// Every mutation locks all of the order's product rows (in ascending
/// product-id order) inside one transaction, so an order is never partially
/// reserved. Operations that close the order's lifecycle also persist the
/// status transition in the same transaction.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn create_product(
        &self,
        sku: &str,
        name: &str,
        price_cents: i64,
        stock: i64,
    ) -> Result<Product>;

    async fn product(&self, id: i64) -> Result<Option<Product>>;

    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Read-only availability check: for every line item, lock the product
    /// row and verify `stock - reserved >= quantity`. Mutates nothing.
    async fn ensure_reservable(&self, order_id: i64) -> Result<()>;

    /// Re-validate availability under lock and increment `reserved` per
    /// item; moves the order to `Reserved` in the same transaction. Retried
    /// a bounded number of times on lock conflicts.
    async fn reserve_for(&self, order_id: i64) -> Result<()>;

    /// Convert the reservation into consumed stock (`reserved` and `stock`
    /// both decremented, clamped at zero) and move the order to `Finalized`.
    /// Returns `Ok(false)` without touching stock if the order is already
    /// terminal.
    async fn commit_for(&self, order_id: i64) -> Result<bool>;

    /// Release reserved units (clamped at zero) and move the order to
    /// `Failed`. Returns `Ok(false)` without touching stock if the order is
    /// already terminal; an order that never reserved releases nothing.
    async fn release_for(&self, order_id: i64) -> Result<bool>;
}

/// Outcome of a refund creation attempt.
#[derive(Debug, Clone)]
pub enum RefundCreation {
    Created(Refund),
    /// A refund with the same reference already existed; returned unchanged.
    Existing(Refund),
}

impl RefundCreation {
    pub fn refund(&self) -> &Refund {
        match self {
            RefundCreation::Created(r) | RefundCreation::Existing(r) => r,
        }
    }

    pub fn into_refund(self) -> Refund {
        match self {
            RefundCreation::Created(r) | RefundCreation::Existing(r) => r,
        }
    }
}

/// Refund rows, idempotent on `refund_reference`.
#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Create a pending refund inside one transaction: if the reference
    /// already exists the existing row is returned untouched; otherwise the
    /// amount is validated against `total - sum(processed)` and the type
    /// (full/partial) derived from the cumulative refunded amount.
    async fn create_refund(
        &self,
        order: &Order,
        amount_cents: i64,
        reference: &str,
        reason: Option<&str>,
    ) -> Result<RefundCreation>;

    async fn refund_by_reference(&self, reference: &str) -> Result<Option<Refund>>;

    async fn refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>>;

    /// Sum of `amount_cents` over this order's `processed` refunds.
    async fn processed_total(&self, order_id: i64) -> Result<i64>;

    /// Re-enter `pending` for a retry of a previously failed refund; clears
    /// the failure reason. The reference never changes.
    async fn reset_to_pending(&self, refund_id: i64) -> Result<()>;

    /// Mark the refund processed, storing execution metadata. No-op if
    /// already processed. The processed-sum invariant is re-checked under
    /// the order lock: if concurrent refunds consumed the remaining balance
    /// since creation, the row is marked failed and
    /// `RefundExceedsRefundable` is returned.
    async fn mark_processed(&self, refund_id: i64, metadata: serde_json::Value) -> Result<()>;

    async fn mark_failed(&self, refund_id: i64, reason: &str) -> Result<()>;
}

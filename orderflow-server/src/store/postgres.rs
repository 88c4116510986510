//! PostgreSQL persistence
//!
//! Product rows are the only pessimistically locked resource: every
//! inventory mutation runs `SELECT ... FOR UPDATE` on each product of the
//! order, in ascending product-id order, inside one transaction. Lock
//! conflicts (serialization failures, deadlocks) are retried a bounded
//! number of times before surfacing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{Result, WorkflowError};
use crate::intake::OrderIntake;
use crate::model::{Order, OrderLine, OrderStatus, Product, Refund, RefundStatus, RefundType};
use crate::store::{InventoryStore, OrderStore, RefundCreation, RefundStore};

/// Attempts per inventory mutation before a lock conflict is surfaced.
const LOCK_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ── row types ───────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    external_ref: String,
    customer_id: i64,
    status: String,
    total_cents: i64,
    payment_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order> {
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| WorkflowError::store(format!("unknown order status {}", self.status)))?;
        Ok(Order {
            id: self.id,
            external_ref: self.external_ref,
            customer_id: self.customer_id,
            status,
            total_cents: self.total_cents,
            payment_ref: self.payment_ref,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str =
    "id, external_ref, customer_id, status, total_cents, payment_ref, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: i64,
    order_id: i64,
    refund_reference: String,
    amount_cents: i64,
    refund_type: String,
    status: String,
    reason: Option<String>,
    metadata: Option<serde_json::Value>,
    failure_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_refund(self) -> Result<Refund> {
        let refund_type = RefundType::parse(&self.refund_type).ok_or_else(|| {
            WorkflowError::store(format!("unknown refund type {}", self.refund_type))
        })?;
        let status = RefundStatus::parse(&self.status).ok_or_else(|| {
            WorkflowError::store(format!("unknown refund status {}", self.status))
        })?;
        Ok(Refund {
            id: self.id,
            order_id: self.order_id,
            refund_reference: self.refund_reference,
            amount_cents: self.amount_cents,
            refund_type,
            status,
            reason: self.reason,
            metadata: self.metadata,
            failure_reason: self.failure_reason,
            processed_at: self.processed_at,
            created_at: self.created_at,
        })
    }
}

const REFUND_COLUMNS: &str = "id, order_id, refund_reference, amount_cents, type AS refund_type, \
     status, reason, metadata, failure_reason, processed_at, created_at";

// ── lock conflict handling ──────────────────────────────────────────────

/// 40001 serialization_failure, 40P01 deadlock_detected, 55P03 lock_not_available
fn is_lock_conflict(err: &WorkflowError) -> bool {
    let WorkflowError::Store(boxed) = err else {
        return false;
    };
    let Some(sqlx::Error::Database(db)) = boxed.downcast_ref::<sqlx::Error>() else {
        return false;
    };
    matches!(db.code().as_deref(), Some("40001" | "40P01" | "55P03"))
}

/// Run an inventory transaction, retrying on lock conflicts.
async fn with_lock_retry<F, Fut, T>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(err) if attempt < LOCK_RETRIES && is_lock_conflict(&err) => {
                tracing::warn!(op = op_name, attempt, "Lock conflict, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(50 * u64::from(attempt)))
                    .await;
            }
            other => return other,
        }
    }
}

// ── OrderStore ──────────────────────────────────────────────────────────

#[async_trait]
impl OrderStore for PgStore {
    async fn upsert_order(&self, intake: &OrderIntake) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        // If a prior incarnation of this order still holds a reservation,
        // release it before the reset to Created, so re-ingestion never
        // leaks reserved units.
        let existing: Option<(i64, String)> =
            sqlx::query_as("SELECT id, status FROM orders WHERE external_ref = $1 FOR UPDATE")
                .bind(&intake.external_ref)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some((existing_id, status)) = &existing {
            if status == "reserved" || status == "paid" {
                let items: Vec<(i64, i64)> = sqlx::query_as(
                    "SELECT product_id, quantity FROM order_items \
                     WHERE order_id = $1 ORDER BY product_id",
                )
                .bind(existing_id)
                .fetch_all(&mut *tx)
                .await?;
                for (product_id, quantity) in items {
                    sqlx::query(
                        "UPDATE products SET reserved = GREATEST(reserved - $2, 0), \
                         updated_at = now() WHERE id = $1",
                    )
                    .bind(product_id)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        let row: OrderRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO orders (external_ref, customer_id, status, total_cents, payment_ref, updated_at)
            VALUES ($1, $2, 'created', $3, NULL, now())
            ON CONFLICT (external_ref)
            DO UPDATE SET
                customer_id = EXCLUDED.customer_id, status = 'created',
                total_cents = EXCLUDED.total_cents, payment_ref = NULL,
                updated_at = now()
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(&intake.external_ref)
        .bind(intake.customer_id)
        .bind(intake.total_cents)
        .fetch_one(&mut *tx)
        .await?;

        // Replace items
        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        for item in &intake.items {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, quantity, price_cents) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        row.into_order()
    }

    async fn order(&self, id: i64) -> Result<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(OrderRow::into_order).transpose()
    }

    async fn order_by_external_ref(&self, external_ref: &str) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE external_ref = $1"
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OrderRow::into_order).transpose()
    }

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        let rows: Vec<(i64, i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT id, order_id, product_id, quantity, price_cents \
             FROM order_items WHERE order_id = $1 ORDER BY product_id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, order_id, product_id, quantity, price_cents)| OrderLine {
                id,
                order_id,
                product_id,
                quantity,
                price_cents,
            })
            .collect())
    }

    async fn mark_paid(&self, order_id: i64, payment_ref: &str) -> Result<()> {
        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE orders SET payment_ref = $2, status = 'paid', updated_at = now() \
             WHERE id = $1 AND status = 'reserved' RETURNING id",
        )
        .bind(order_id)
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(());
        }
        match self.order(order_id).await? {
            None => Err(WorkflowError::OrderNotFound(order_id.to_string())),
            Some(order) => Err(WorkflowError::InvalidTransition(format!(
                "cannot initiate payment for order {order_id} in status {}",
                order.status.as_str()
            ))),
        }
    }
}

// ── InventoryStore ──────────────────────────────────────────────────────

impl PgStore {
    /// Lock every product of the order and verify availability. Returns the
    /// locked (product_id, quantity) pairs for the caller to mutate.
    async fn lock_and_check(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_id: i64,
        check_availability: bool,
    ) -> Result<Vec<(i64, i64)>> {
        let items: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT product_id, quantity FROM order_items \
             WHERE order_id = $1 ORDER BY product_id",
        )
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;

        for (product_id, quantity) in &items {
            let product: Option<(String, i64, i64)> = sqlx::query_as(
                "SELECT sku, stock, reserved FROM products WHERE id = $1 FOR UPDATE",
            )
            .bind(product_id)
            .fetch_optional(&mut **tx)
            .await?;

            let Some((sku, stock, reserved)) = product else {
                return Err(WorkflowError::ProductNotFound(*product_id));
            };

            if check_availability {
                let available = stock - reserved;
                if available < *quantity {
                    return Err(WorkflowError::InsufficientStock {
                        sku,
                        requested: *quantity,
                        available,
                    });
                }
            }
        }

        Ok(items)
    }

    /// Lock the order row and return its current status.
    async fn lock_order_status(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_id: i64,
    ) -> Result<OrderStatus> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut **tx)
                .await?;
        let (status,) = row.ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        OrderStatus::parse(&status)
            .ok_or_else(|| WorkflowError::store(format!("unknown order status {status}")))
    }

    async fn try_reserve(&self, order_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let status = Self::lock_order_status(&mut tx, order_id).await?;
        if status != OrderStatus::Created {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot reserve order {order_id} in status {}",
                status.as_str()
            )));
        }

        // Availability is re-checked here, under the same locks as the
        // mutation: a prior ensure_reservable call is not atomic with this.
        let items = Self::lock_and_check(&mut tx, order_id, true).await?;
        for (product_id, quantity) in items {
            sqlx::query(
                "UPDATE products SET reserved = reserved + $2, updated_at = now() WHERE id = $1",
            )
            .bind(product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE orders SET status = 'reserved', updated_at = now() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn try_commit(&self, order_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let status = Self::lock_order_status(&mut tx, order_id).await?;
        if status.is_terminal() {
            return Ok(false);
        }
        if status == OrderStatus::Created {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot finalize order {order_id}: stock was never reserved"
            )));
        }

        let items = Self::lock_and_check(&mut tx, order_id, false).await?;
        for (product_id, quantity) in items {
            sqlx::query(
                "UPDATE products SET reserved = GREATEST(reserved - $2, 0), \
                 stock = GREATEST(stock - $2, 0), updated_at = now() WHERE id = $1",
            )
            .bind(product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE orders SET status = 'finalized', updated_at = now() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn try_release(&self, order_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let status = Self::lock_order_status(&mut tx, order_id).await?;
        if status.is_terminal() {
            return Ok(false);
        }

        // An order still in Created never incremented `reserved`; releasing
        // would over-decrement other orders' holds.
        if status != OrderStatus::Created {
            let items = Self::lock_and_check(&mut tx, order_id, false).await?;
            for (product_id, quantity) in items {
                sqlx::query(
                    "UPDATE products SET reserved = GREATEST(reserved - $2, 0), \
                     updated_at = now() WHERE id = $1",
                )
                .bind(product_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("UPDATE orders SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn create_product(
        &self,
        sku: &str,
        name: &str,
        price_cents: i64,
        stock: i64,
    ) -> Result<Product> {
        let row: (i64, String, String, i64, i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO products (sku, name, price_cents, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (sku)
            DO UPDATE SET name = EXCLUDED.name, price_cents = EXCLUDED.price_cents,
                          stock = EXCLUDED.stock, updated_at = now()
            RETURNING id, sku, name, price_cents, stock, reserved
            "#,
        )
        .bind(sku)
        .bind(name)
        .bind(price_cents)
        .bind(stock)
        .fetch_one(&self.pool)
        .await?;

        Ok(Product {
            id: row.0,
            sku: row.1,
            name: row.2,
            price_cents: row.3,
            stock: row.4,
            reserved: row.5,
        })
    }

    async fn product(&self, id: i64) -> Result<Option<Product>> {
        let row: Option<(i64, String, String, i64, i64, i64)> = sqlx::query_as(
            "SELECT id, sku, name, price_cents, stock, reserved FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, sku, name, price_cents, stock, reserved)| Product {
            id,
            sku,
            name,
            price_cents,
            stock,
            reserved,
        }))
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows: Vec<(i64, String, String, i64, i64, i64)> = sqlx::query_as(
            "SELECT id, sku, name, price_cents, stock, reserved FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, sku, name, price_cents, stock, reserved)| Product {
                id,
                sku,
                name,
                price_cents,
                stock,
                reserved,
            })
            .collect())
    }

    async fn ensure_reservable(&self, order_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_and_check(&mut tx, order_id, true).await?;
        // Read-only check: the transaction is dropped, releasing the locks.
        Ok(())
    }

    async fn reserve_for(&self, order_id: i64) -> Result<()> {
        with_lock_retry("reserve_for", || self.try_reserve(order_id)).await
    }

    async fn commit_for(&self, order_id: i64) -> Result<bool> {
        with_lock_retry("commit_for", || self.try_commit(order_id)).await
    }

    async fn release_for(&self, order_id: i64) -> Result<bool> {
        with_lock_retry("release_for", || self.try_release(order_id)).await
    }
}

// ── RefundStore ─────────────────────────────────────────────────────────

impl PgStore {
    async fn processed_total_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_id: i64,
    ) -> Result<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM refunds \
             WHERE order_id = $1 AND status = 'processed'",
        )
        .bind(order_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl RefundStore for PgStore {
    async fn create_refund(
        &self,
        order: &Order,
        amount_cents: i64,
        reference: &str,
        reason: Option<&str>,
    ) -> Result<RefundCreation> {
        let mut tx = self.pool.begin().await?;

        // Idempotency: an existing reference is returned untouched.
        let existing: Option<RefundRow> = sqlx::query_as(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE refund_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Ok(RefundCreation::Existing(row.into_refund()?));
        }

        if amount_cents <= 0 {
            return Err(WorkflowError::InvalidRefundAmount);
        }

        // The order-row lock serializes concurrent refund creations for the
        // same order, so both cannot validate against a stale total.
        sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        let processed = Self::processed_total_tx(&mut tx, order.id).await?;
        if amount_cents > order.total_cents - processed {
            return Err(WorkflowError::RefundExceedsRefundable);
        }

        let refund_type = if processed + amount_cents >= order.total_cents {
            RefundType::Full
        } else {
            RefundType::Partial
        };

        let row: RefundRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO refunds (order_id, refund_reference, amount_cents, type, status, reason)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING {REFUND_COLUMNS}
            "#
        ))
        .bind(order.id)
        .bind(reference)
        .bind(amount_cents)
        .bind(refund_type.as_str())
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RefundCreation::Created(row.into_refund()?))
    }

    async fn refund_by_reference(&self, reference: &str) -> Result<Option<Refund>> {
        let row: Option<RefundRow> = sqlx::query_as(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE refund_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RefundRow::into_refund).transpose()
    }

    async fn refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>> {
        let rows: Vec<RefundRow> = sqlx::query_as(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RefundRow::into_refund).collect()
    }

    async fn processed_total(&self, order_id: i64) -> Result<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM refunds \
             WHERE order_id = $1 AND status = 'processed'",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn reset_to_pending(&self, refund_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE refunds SET status = 'pending', failure_reason = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(refund_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processed(&self, refund_id: i64, metadata: serde_json::Value) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64, String)> = sqlx::query_as(
            "SELECT order_id, amount_cents, status FROM refunds WHERE id = $1 FOR UPDATE",
        )
        .bind(refund_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((order_id, amount_cents, status)) = row else {
            return Err(WorkflowError::RefundNotFound(refund_id.to_string()));
        };
        if status == "processed" {
            return Ok(());
        }

        // Final guard on the processed-sum invariant: concurrent executions
        // may have consumed the remaining balance since creation.
        let (total_cents,): (i64,) =
            sqlx::query_as("SELECT total_cents FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_one(&mut *tx)
                .await?;
        let processed = Self::processed_total_tx(&mut tx, order_id).await?;
        if processed + amount_cents > total_cents {
            sqlx::query(
                "UPDATE refunds SET status = 'failed', failure_reason = $2, updated_at = now() \
                 WHERE id = $1",
            )
            .bind(refund_id)
            .bind("refund amount exceeds remaining refundable amount for order")
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Err(WorkflowError::RefundExceedsRefundable);
        }

        sqlx::query(
            "UPDATE refunds SET status = 'processed', metadata = $2, failure_reason = NULL, \
             processed_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(refund_id)
        .bind(metadata)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, refund_id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE refunds SET status = 'failed', failure_reason = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(refund_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

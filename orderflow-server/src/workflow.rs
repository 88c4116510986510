//! Order workflow engine
//!
//! Owns the order state machine `Created → Reserved → Paid → {Finalized |
//! Failed}` and orchestrates the inventory ledger, payment simulator and
//! analytics store to move an order from ingestion to a terminal state.
//! Within one order the steps are causally ordered by task dependency: the
//! payment callback task is only enqueued once payment initiation
//! succeeded.

use std::sync::Arc;

use chrono::Utc;

use crate::analytics::AnalyticsStore;
use crate::error::{Result, WorkflowError};
use crate::intake::{OrderIntake, RawOrderRecord};
use crate::model::Order;
use crate::notify::{NotificationSink, OrderEvent};
use crate::payment::PaymentGateway;
use crate::queue::{JobQueue, Task};
use crate::store::{InventoryStore, OrderStore};

pub struct OrderWorkflow {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryStore>,
    gateway: Arc<dyn PaymentGateway>,
    analytics: Arc<dyn AnalyticsStore>,
    sink: Arc<dyn NotificationSink>,
    queue: Arc<dyn JobQueue>,
}

impl OrderWorkflow {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryStore>,
        gateway: Arc<dyn PaymentGateway>,
        analytics: Arc<dyn AnalyticsStore>,
        sink: Arc<dyn NotificationSink>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            orders,
            inventory,
            gateway,
            analytics,
            sink,
            queue,
        }
    }

    /// Task body for one ingested record: validate, upsert, reserve,
    /// initiate payment, then enqueue the (simulated) success callback.
    pub async fn process_record(&self, record: &RawOrderRecord) -> Result<()> {
        let intake = OrderIntake::from_record(record)?;
        let order = self.upsert_order(&intake).await?;
        self.reserve_stock(&order).await?;
        let payment_ref = self.initiate_payment(order.id).await?;

        // The simulated gateway confirms immediately; a real one would call
        // back on its own schedule.
        self.queue
            .enqueue(&Task::PaymentCallback {
                payment_ref,
                success: true,
                reason: None,
            })
            .await?;
        Ok(())
    }

    /// Find-or-create by external reference; replaces line items and resets
    /// the order to `Created` in one transaction.
    pub async fn upsert_order(&self, intake: &OrderIntake) -> Result<Order> {
        let order = self.orders.upsert_order(intake).await?;
        tracing::info!(
            order_id = order.id,
            external_ref = %order.external_ref,
            total_cents = order.total_cents,
            "Order upserted"
        );
        Ok(order)
    }

    /// Reserve stock for every line item. On insufficient stock the order
    /// stays `Created`; the caller decides whether to retry or abandon.
    pub async fn reserve_stock(&self, order: &Order) -> Result<()> {
        self.inventory.ensure_reservable(order.id).await?;
        self.inventory.reserve_for(order.id).await
    }

    /// Request a payment reference from the gateway, store it on the order
    /// and move it to `Paid`.
    pub async fn initiate_payment(&self, order_id: i64) -> Result<String> {
        let order = self
            .orders
            .order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        let payment_ref = self.gateway.initiate(&order).await?;
        self.orders.mark_paid(order.id, &payment_ref).await?;
        Ok(payment_ref)
    }

    /// Resolve a gateway callback to its order and finalize or roll back.
    /// An unresolvable reference (expired or never issued) is a permanent
    /// failure.
    pub async fn handle_payment_callback(
        &self,
        payment_ref: &str,
        success: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        let order_id = self
            .gateway
            .resolve(payment_ref)
            .await?
            .ok_or_else(|| WorkflowError::UnknownPaymentReference(payment_ref.to_string()))?;
        let order = self
            .orders
            .order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;

        if success {
            self.finalize(&order).await
        } else {
            self.rollback(&order, reason.unwrap_or("payment failed")).await
        }
    }

    /// Commit reserved stock and close the order as `Finalized`; then push
    /// the day's KPI and leaderboard updates. The aggregate updates run
    /// after the relational commit and are best-effort: on failure the
    /// aggregate stays stale and the order stays finalized. A duplicate
    /// callback delivery finds the order terminal and does nothing.
    pub async fn finalize(&self, order: &Order) -> Result<()> {
        let committed = self.inventory.commit_for(order.id).await?;
        if !committed {
            tracing::debug!(order_id = order.id, "Finalize skipped: order already terminal");
            return Ok(());
        }

        let day = Utc::now().date_naive();
        if let Err(err) = self
            .analytics
            .track_finalized(day, order.customer_id, order.total_cents)
            .await
        {
            tracing::error!(
                order_id = order.id,
                error = %err,
                "Analytics update failed after finalize; aggregate is stale"
            );
        }

        tracing::info!(
            order_id = order.id,
            total_cents = order.total_cents,
            "Order finalized"
        );
        self.sink.notify(order, OrderEvent::Finalized).await;
        Ok(())
    }

    /// Release reserved stock and close the order as `Failed`. Idempotent:
    /// a second rollback finds the order terminal and never re-releases.
    pub async fn rollback(&self, order: &Order, reason: &str) -> Result<()> {
        let released = self.inventory.release_for(order.id).await?;
        if !released {
            tracing::debug!(order_id = order.id, "Rollback skipped: order already terminal");
            return Ok(());
        }

        tracing::warn!(order_id = order.id, reason, "Order rolled back");
        self.sink.notify(order, OrderEvent::Failed).await;
        Ok(())
    }
}

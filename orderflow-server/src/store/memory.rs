//! In-memory persistence
//!
//! Backs tests and local development. A single async mutex guards the whole
//! state, so every trait operation is naturally transaction-scoped: an order
//! is never observed partially reserved, and concurrent reservations against
//! the same product serialize exactly as the row locks do in Postgres.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{Result, WorkflowError};
use crate::intake::OrderIntake;
use crate::model::{
    Order, OrderLine, OrderStatus, Product, Refund, RefundStatus, RefundType,
};
use crate::store::{InventoryStore, OrderStore, RefundCreation, RefundStore};

#[derive(Default)]
struct MemState {
    next_order: i64,
    next_item: i64,
    next_product: i64,
    next_refund: i64,
    orders: HashMap<i64, Order>,
    orders_by_ref: HashMap<String, i64>,
    items: HashMap<i64, Vec<OrderLine>>,
    products: BTreeMap<i64, Product>,
    refunds: BTreeMap<i64, Refund>,
    refunds_by_ref: HashMap<String, i64>,
}

impl MemState {
    fn release_reservation(&mut self, order_id: i64) {
        let lines = self.items.get(&order_id).cloned().unwrap_or_default();
        for line in lines {
            if let Some(product) = self.products.get_mut(&line.product_id) {
                product.reserved = (product.reserved - line.quantity).max(0);
            }
        }
    }

    fn processed_total(&self, order_id: i64) -> i64 {
        self.refunds
            .values()
            .filter(|r| r.order_id == order_id && r.status == RefundStatus::Processed)
            .map(|r| r.amount_cents)
            .sum()
    }

    fn check_reservable(&self, order_id: i64) -> Result<()> {
        for line in self.items.get(&order_id).into_iter().flatten() {
            let product = self
                .products
                .get(&line.product_id)
                .ok_or(WorkflowError::ProductNotFound(line.product_id))?;
            let available = product.available();
            if available < line.quantity {
                return Err(WorkflowError::InsufficientStock {
                    sku: product.sku.clone(),
                    requested: line.quantity,
                    available,
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn upsert_order(&self, intake: &OrderIntake) -> Result<Order> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let order_id = match state.orders_by_ref.get(&intake.external_ref).copied() {
            Some(id) => {
                let status = state.orders[&id].status;
                if matches!(status, OrderStatus::Reserved | OrderStatus::Paid) {
                    state.release_reservation(id);
                }
                let order = state
                    .orders
                    .get_mut(&id)
                    .ok_or_else(|| WorkflowError::OrderNotFound(id.to_string()))?;
                order.customer_id = intake.customer_id;
                order.total_cents = intake.total_cents;
                order.status = OrderStatus::Created;
                order.payment_ref = None;
                order.updated_at = now;
                id
            }
            None => {
                state.next_order += 1;
                let id = state.next_order;
                state.orders.insert(
                    id,
                    Order {
                        id,
                        external_ref: intake.external_ref.clone(),
                        customer_id: intake.customer_id,
                        status: OrderStatus::Created,
                        total_cents: intake.total_cents,
                        payment_ref: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
                state.orders_by_ref.insert(intake.external_ref.clone(), id);
                id
            }
        };

        let mut lines = Vec::with_capacity(intake.items.len());
        for item in &intake.items {
            state.next_item += 1;
            lines.push(OrderLine {
                id: state.next_item,
                order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                price_cents: item.price_cents,
            });
        }
        lines.sort_by_key(|l| l.product_id);
        state.items.insert(order_id, lines);

        Ok(state.orders[&order_id].clone())
    }

    async fn order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_external_ref(&self, external_ref: &str) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders_by_ref
            .get(external_ref)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        Ok(self
            .state
            .lock()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_paid(&self, order_id: i64, payment_ref: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        if order.status != OrderStatus::Reserved {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot initiate payment for order {order_id} in status {}",
                order.status.as_str()
            )));
        }
        order.payment_ref = Some(payment_ref.to_string());
        order.status = OrderStatus::Paid;
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn create_product(
        &self,
        sku: &str,
        name: &str,
        price_cents: i64,
        stock: i64,
    ) -> Result<Product> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.products.values_mut().find(|p| p.sku == sku) {
            existing.name = name.to_string();
            existing.price_cents = price_cents;
            existing.stock = stock;
            return Ok(existing.clone());
        }
        state.next_product += 1;
        let product = Product {
            id: state.next_product,
            sku: sku.to_string(),
            name: name.to_string(),
            price_cents,
            stock,
            reserved: 0,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.state.lock().await.products.values().cloned().collect())
    }

    async fn ensure_reservable(&self, order_id: i64) -> Result<()> {
        self.state.lock().await.check_reservable(order_id)
    }

    async fn reserve_for(&self, order_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let status = state
            .orders
            .get(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?
            .status;
        if status != OrderStatus::Created {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot reserve order {order_id} in status {}",
                status.as_str()
            )));
        }

        state.check_reservable(order_id)?;

        let lines = state.items.get(&order_id).cloned().unwrap_or_default();
        for line in lines {
            let product = state
                .products
                .get_mut(&line.product_id)
                .ok_or(WorkflowError::ProductNotFound(line.product_id))?;
            product.reserved += line.quantity;
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        order.status = OrderStatus::Reserved;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn commit_for(&self, order_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let status = state
            .orders
            .get(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?
            .status;
        if status.is_terminal() {
            return Ok(false);
        }
        if status == OrderStatus::Created {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot finalize order {order_id}: stock was never reserved"
            )));
        }

        let lines = state.items.get(&order_id).cloned().unwrap_or_default();
        for line in lines {
            let product = state
                .products
                .get_mut(&line.product_id)
                .ok_or(WorkflowError::ProductNotFound(line.product_id))?;
            product.reserved = (product.reserved - line.quantity).max(0);
            product.stock = (product.stock - line.quantity).max(0);
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        order.status = OrderStatus::Finalized;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_for(&self, order_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let status = state
            .orders
            .get(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?
            .status;
        if status.is_terminal() {
            return Ok(false);
        }

        if status != OrderStatus::Created {
            state.release_reservation(order_id);
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        order.status = OrderStatus::Failed;
        order.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl RefundStore for MemoryStore {
    async fn create_refund(
        &self,
        order: &Order,
        amount_cents: i64,
        reference: &str,
        reason: Option<&str>,
    ) -> Result<RefundCreation> {
        let mut state = self.state.lock().await;

        if let Some(id) = state.refunds_by_ref.get(reference) {
            return Ok(RefundCreation::Existing(state.refunds[id].clone()));
        }

        if amount_cents <= 0 {
            return Err(WorkflowError::InvalidRefundAmount);
        }

        let processed = state.processed_total(order.id);
        if amount_cents > order.total_cents - processed {
            return Err(WorkflowError::RefundExceedsRefundable);
        }

        let refund_type = if processed + amount_cents >= order.total_cents {
            RefundType::Full
        } else {
            RefundType::Partial
        };

        state.next_refund += 1;
        let refund = Refund {
            id: state.next_refund,
            order_id: order.id,
            refund_reference: reference.to_string(),
            amount_cents,
            refund_type,
            status: RefundStatus::Pending,
            reason: reason.map(str::to_string),
            metadata: None,
            failure_reason: None,
            processed_at: None,
            created_at: Utc::now(),
        };
        state.refunds.insert(refund.id, refund.clone());
        state
            .refunds_by_ref
            .insert(reference.to_string(), refund.id);
        Ok(RefundCreation::Created(refund))
    }

    async fn refund_by_reference(&self, reference: &str) -> Result<Option<Refund>> {
        let state = self.state.lock().await;
        Ok(state
            .refunds_by_ref
            .get(reference)
            .and_then(|id| state.refunds.get(id))
            .cloned())
    }

    async fn refunds_for_order(&self, order_id: i64) -> Result<Vec<Refund>> {
        Ok(self
            .state
            .lock()
            .await
            .refunds
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn processed_total(&self, order_id: i64) -> Result<i64> {
        Ok(self.state.lock().await.processed_total(order_id))
    }

    async fn reset_to_pending(&self, refund_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(refund) = state.refunds.get_mut(&refund_id) {
            refund.status = RefundStatus::Pending;
            refund.failure_reason = None;
        }
        Ok(())
    }

    async fn mark_processed(&self, refund_id: i64, metadata: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(refund) = state.refunds.get(&refund_id).cloned() else {
            return Err(WorkflowError::RefundNotFound(refund_id.to_string()));
        };
        if refund.status == RefundStatus::Processed {
            return Ok(());
        }

        let total_cents = state
            .orders
            .get(&refund.order_id)
            .map(|o| o.total_cents)
            .ok_or_else(|| WorkflowError::OrderNotFound(refund.order_id.to_string()))?;
        let processed = state.processed_total(refund.order_id);
        if processed + refund.amount_cents > total_cents {
            let entry = state
                .refunds
                .get_mut(&refund_id)
                .ok_or_else(|| WorkflowError::RefundNotFound(refund_id.to_string()))?;
            entry.status = RefundStatus::Failed;
            entry.failure_reason =
                Some("refund amount exceeds remaining refundable amount for order".to_string());
            return Err(WorkflowError::RefundExceedsRefundable);
        }

        let entry = state
            .refunds
            .get_mut(&refund_id)
            .ok_or_else(|| WorkflowError::RefundNotFound(refund_id.to_string()))?;
        entry.status = RefundStatus::Processed;
        entry.metadata = Some(metadata);
        entry.failure_reason = None;
        entry.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, refund_id: i64, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(refund) = state.refunds.get_mut(&refund_id) {
            refund.status = RefundStatus::Failed;
            refund.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_order_id_is_an_error_not_a_panic() {
        let store = MemoryStore::new();

        assert!(matches!(
            store.mark_paid(404, "pay_x").await,
            Err(WorkflowError::OrderNotFound(_))
        ));
        assert!(matches!(
            store.reserve_for(404).await,
            Err(WorkflowError::OrderNotFound(_))
        ));
        assert!(matches!(
            store.commit_for(404).await,
            Err(WorkflowError::OrderNotFound(_))
        ));
        assert!(matches!(
            store.release_for(404).await,
            Err(WorkflowError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_refund_id_is_an_error_not_a_panic() {
        let store = MemoryStore::new();

        assert!(matches!(
            store.mark_processed(404, serde_json::json!({})).await,
            Err(WorkflowError::RefundNotFound(_))
        ));
    }
}

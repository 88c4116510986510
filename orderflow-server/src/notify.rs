//! Notification sink
//!
//! The pipeline emits order/refund events to a sink after state
//! transitions; delivery is best-effort and never affects order state.

use async_trait::async_trait;

use crate::model::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Finalized,
    Failed,
    RefundProcessed,
}

impl OrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::Finalized => "order_finalized",
            OrderEvent::Failed => "order_failed",
            OrderEvent::RefundProcessed => "refund_processed",
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, order: &Order, event: OrderEvent);
}

/// Default sink: structured log lines. A real deployment would swap in an
/// email/SMS delivery implementation behind the same trait.
#[derive(Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, order: &Order, event: OrderEvent) {
        tracing::info!(
            order_id = order.id,
            external_ref = %order.external_ref,
            customer_id = order.customer_id,
            event = event.as_str(),
            "Order notification"
        );
    }
}

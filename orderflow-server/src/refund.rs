//! Refund engine
//!
//! Two halves: a request side that records a pending refund and enqueues
//! its execution, and an execution side run by workers against the
//! simulated gateway. Idempotency hangs off the unique refund reference,
//! so a redelivered execution task is harmless.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::analytics::AnalyticsStore;
use crate::error::{Result, WorkflowError};
use crate::model::{generate_refund_reference, Refund, RefundStatus};
use crate::notify::{NotificationSink, OrderEvent};
use crate::payment::PaymentGateway;
use crate::queue::{JobQueue, Task};
use crate::store::{OrderStore, RefundCreation, RefundStore};

pub struct RefundEngine {
    orders: Arc<dyn OrderStore>,
    refunds: Arc<dyn RefundStore>,
    gateway: Arc<dyn PaymentGateway>,
    analytics: Arc<dyn AnalyticsStore>,
    sink: Arc<dyn NotificationSink>,
    queue: Arc<dyn JobQueue>,
}

impl RefundEngine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        refunds: Arc<dyn RefundStore>,
        gateway: Arc<dyn PaymentGateway>,
        analytics: Arc<dyn AnalyticsStore>,
        sink: Arc<dyn NotificationSink>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            orders,
            refunds,
            gateway,
            analytics,
            sink,
            queue,
        }
    }

    /// Record a pending refund against an order and enqueue its execution.
    /// With no reference supplied one is generated from the order id and
    /// amount; supplying the same reference twice returns the existing
    /// refund without enqueueing a second execution.
    pub async fn request_refund(
        &self,
        order_id: i64,
        amount_cents: i64,
        reference: Option<String>,
        reason: Option<&str>,
    ) -> Result<Refund> {
        let order = self
            .orders
            .order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        let reference =
            reference.unwrap_or_else(|| generate_refund_reference(order_id, amount_cents));

        match self
            .refunds
            .create_refund(&order, amount_cents, &reference, reason)
            .await?
        {
            RefundCreation::Existing(refund) => {
                tracing::info!(
                    refund_reference = %refund.refund_reference,
                    order_id,
                    "Refund already exists, skipping"
                );
                Ok(refund)
            }
            RefundCreation::Created(refund) => {
                tracing::info!(
                    refund_reference = %refund.refund_reference,
                    order_id,
                    amount_cents,
                    "Refund requested"
                );
                self.queue
                    .enqueue(&Task::ExecuteRefund {
                        refund_reference: refund.refund_reference.clone(),
                    })
                    .await?;
                Ok(refund)
            }
        }
    }

    /// Request a refund of the order's full total.
    pub async fn request_full_refund(
        &self,
        order_id: i64,
        reference: Option<String>,
        reason: Option<&str>,
    ) -> Result<Refund> {
        let order = self
            .orders
            .order(order_id)
            .await?
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))?;
        self.request_refund(order.id, order.total_cents, reference, reason)
            .await
    }

    /// Task body for one refund execution. Already-processed refunds are a
    /// no-op; failed ones are reset to pending and retried. The refundable
    /// ceiling is re-checked here because other refunds may have been
    /// processed since this one was requested.
    pub async fn execute(&self, refund_reference: &str) -> Result<()> {
        let refund = self
            .refunds
            .refund_by_reference(refund_reference)
            .await?
            .ok_or_else(|| WorkflowError::RefundNotFound(refund_reference.to_string()))?;

        match refund.status {
            RefundStatus::Processed => {
                tracing::debug!(refund_reference, "Refund already processed, skipping");
                return Ok(());
            }
            RefundStatus::Failed => self.refunds.reset_to_pending(refund.id).await?,
            RefundStatus::Pending => {}
        }

        let order = self
            .orders
            .order(refund.order_id)
            .await?
            .ok_or_else(|| WorkflowError::OrderNotFound(refund.order_id.to_string()))?;

        let processed = self.refunds.processed_total(order.id).await?;
        if refund.amount_cents > order.total_cents - processed {
            let err = WorkflowError::RefundExceedsRefundable;
            self.refunds.mark_failed(refund.id, &err.to_string()).await?;
            return Err(err);
        }

        if let Err(err) = self.gateway.execute_refund(&refund).await {
            self.refunds.mark_failed(refund.id, &err.to_string()).await?;
            return Err(err);
        }

        let metadata = json!({
            "order_total_cents": order.total_cents,
            "customer_id": order.customer_id,
            "processed_by": "system",
        });
        self.refunds.mark_processed(refund.id, metadata).await?;

        // Refunds land on the day they are processed, not requested.
        let day = Utc::now().date_naive();
        if let Err(err) = self
            .analytics
            .track_refund(day, order.customer_id, refund.amount_cents)
            .await
        {
            tracing::error!(
                refund_reference = %refund.refund_reference,
                error = %err,
                "Analytics update failed after refund; aggregate is stale"
            );
        }

        tracing::info!(
            refund_reference = %refund.refund_reference,
            order_id = refund.order_id,
            amount_cents = refund.amount_cents,
            "Refund processed"
        );
        self.sink.notify(&order, OrderEvent::RefundProcessed).await;
        Ok(())
    }
}

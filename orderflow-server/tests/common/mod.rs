//! Shared in-memory harness: every trait seam backed by its memory
//! implementation, with a sequential drain loop in place of the workers.

use std::sync::Arc;

use serde_json::json;

use orderflow_server::analytics::memory::MemoryAnalytics;
use orderflow_server::analytics::AnalyticsStore;
use orderflow_server::intake::RawOrderRecord;
use orderflow_server::model::Product;
use orderflow_server::notify::{LogNotificationSink, NotificationSink};
use orderflow_server::payment::{MemoryPaymentSimulator, PaymentGateway};
use orderflow_server::queue::memory::MemoryQueue;
use orderflow_server::queue::{JobQueue, RetryPolicy, Task};
use orderflow_server::refund::RefundEngine;
use orderflow_server::store::memory::MemoryStore;
use orderflow_server::store::{InventoryStore, OrderStore, RefundStore};
use orderflow_server::workflow::OrderWorkflow;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub analytics: Arc<MemoryAnalytics>,
    pub queue: Arc<MemoryQueue>,
    pub workflow: Arc<OrderWorkflow>,
    pub refunds: Arc<RefundEngine>,
}

impl Harness {
    pub fn new(gateway: Arc<MemoryPaymentSimulator>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let analytics = Arc::new(MemoryAnalytics::new());
        let queue = Arc::new(MemoryQueue::new(RetryPolicy::default()));
        let sink: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);

        let orders: Arc<dyn OrderStore> = store.clone();
        let inventory: Arc<dyn InventoryStore> = store.clone();
        let refund_store: Arc<dyn RefundStore> = store.clone();
        let gateway: Arc<dyn PaymentGateway> = gateway;
        let analytics_dyn: Arc<dyn AnalyticsStore> = analytics.clone();
        let queue_dyn: Arc<dyn JobQueue> = queue.clone();

        let workflow = Arc::new(OrderWorkflow::new(
            orders.clone(),
            inventory,
            gateway.clone(),
            analytics_dyn.clone(),
            sink.clone(),
            queue_dyn.clone(),
        ));
        let refunds = Arc::new(RefundEngine::new(
            orders,
            refund_store,
            gateway,
            analytics_dyn,
            sink,
            queue_dyn,
        ));

        Self {
            store,
            analytics,
            queue,
            workflow,
            refunds,
        }
    }

    /// Gateway that never fails a refund call.
    pub fn reliable() -> Self {
        Self::new(Arc::new(MemoryPaymentSimulator::new(0.0)))
    }

    /// Drain the queue the way a worker would: claim, dispatch, report.
    /// Returns once no claimable job remains (all completed or dead).
    pub async fn drain(&self) {
        while let Some(job) = self.queue.claim().await.unwrap() {
            let result = match &job.task {
                Task::ProcessOrder { record } => self.workflow.process_record(record).await,
                Task::PaymentCallback {
                    payment_ref,
                    success,
                    reason,
                } => {
                    self.workflow
                        .handle_payment_callback(payment_ref, *success, reason.as_deref())
                        .await
                }
                Task::ExecuteRefund { refund_reference } => {
                    self.refunds.execute(refund_reference).await
                }
            };
            match result {
                Ok(()) => self.queue.complete(job.id).await.unwrap(),
                Err(err) => self
                    .queue
                    .fail(&job, &err.to_string(), err.is_permanent())
                    .await
                    .unwrap(),
            }
        }
    }

    pub async fn seed_product(&self, sku: &str, price_cents: i64, stock: i64) -> Product {
        self.store
            .create_product(sku, sku, price_cents, stock)
            .await
            .unwrap()
    }

    /// Seed a product, ingest one order against it and run it to
    /// `Finalized`. Returns the finalized order.
    pub async fn finalized_order(
        &self,
        external_ref: &str,
        customer_id: i64,
        total_cents: i64,
    ) -> orderflow_server::model::Order {
        let product = self.seed_product(&format!("SKU-{external_ref}"), total_cents, 100).await;
        let rec = record(
            external_ref,
            customer_id,
            total_cents,
            json!([{ "product_id": product.id, "quantity": 1, "unit_price_cents": total_cents }]),
        );
        self.queue
            .enqueue(&Task::ProcessOrder { record: rec })
            .await
            .unwrap();
        self.drain().await;
        self.store
            .order_by_external_ref(external_ref)
            .await
            .unwrap()
            .unwrap()
    }
}

pub fn record(
    external_ref: &str,
    customer_id: i64,
    total_cents: i64,
    items: serde_json::Value,
) -> RawOrderRecord {
    RawOrderRecord {
        external_ref: Some(external_ref.to_string()),
        customer_id: Some(json!(customer_id)),
        total_cents: Some(json!(total_cents)),
        items: Some(items),
    }
}

//! Application state

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::analytics::redis::RedisAnalytics;
use crate::analytics::AnalyticsStore;
use crate::config::Config;
use crate::error::BoxError;
use crate::notify::{LogNotificationSink, NotificationSink};
use crate::payment::{PaymentGateway, RedisPaymentSimulator};
use crate::queue::postgres::PgQueue;
use crate::queue::{JobQueue, RetryPolicy};
use crate::refund::RefundEngine;
use crate::store::postgres::PgStore;
use crate::store::{InventoryStore, OrderStore, RefundStore};
use crate::workflow::OrderWorkflow;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool
    pub pool: PgPool,
    pub orders: Arc<dyn OrderStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub refunds: Arc<dyn RefundStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub queue: Arc<dyn JobQueue>,
    pub workflow: Arc<OrderWorkflow>,
    pub refund_engine: Arc<RefundEngine>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let pool = PgPool::connect(&config.database_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let client = redis::Client::open(config.redis_url.as_str())?;
        let redis_conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis");

        let store = Arc::new(PgStore::new(pool.clone()));
        let orders: Arc<dyn OrderStore> = store.clone();
        let inventory: Arc<dyn InventoryStore> = store.clone();
        let refunds: Arc<dyn RefundStore> = store;
        let gateway: Arc<dyn PaymentGateway> = Arc::new(RedisPaymentSimulator::new(
            redis_conn.clone(),
            config.gateway_failure_rate,
        ));
        let analytics: Arc<dyn AnalyticsStore> = Arc::new(RedisAnalytics::new(redis_conn));
        let queue: Arc<dyn JobQueue> =
            Arc::new(PgQueue::new(pool.clone(), RetryPolicy::default()));
        let sink: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);

        let workflow = Arc::new(OrderWorkflow::new(
            orders.clone(),
            inventory.clone(),
            gateway.clone(),
            analytics.clone(),
            sink.clone(),
            queue.clone(),
        ));
        let refund_engine = Arc::new(RefundEngine::new(
            orders.clone(),
            refunds.clone(),
            gateway.clone(),
            analytics.clone(),
            sink,
            queue.clone(),
        ));

        Ok(Self {
            pool,
            orders,
            inventory,
            refunds,
            gateway,
            analytics,
            queue,
            workflow,
            refund_engine,
        })
    }
}

//! Simulated payment gateway
//!
//! Issues opaque `pay_*` references and keeps a bounded-lifetime mapping
//! back to the order. A reference that has expired (or never existed) is a
//! permanent failure: the callback can no longer be correlated. Refund
//! execution fails stochastically at a configurable rate to exercise the
//! orchestrator's retry path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::model::{Order, Refund};

/// Lifetime of a payment-reference mapping.
pub const PAYMENT_REF_TTL: Duration = Duration::from_secs(3600);

/// Default probability of a simulated gateway failure per refund call.
pub const DEFAULT_FAILURE_RATE: f64 = 0.05;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Issue an opaque payment reference for the order and store the
    /// reference → order mapping with a bounded TTL.
    async fn initiate(&self, order: &Order) -> Result<String>;

    /// Resolve a payment reference back to its order id. `None` after
    /// expiry or if the reference was never issued; callers must treat that
    /// as permanent, not transient.
    async fn resolve(&self, payment_ref: &str) -> Result<Option<i64>>;

    /// Execute a refund against the gateway. Fails with
    /// `GatewayTransientFailure` on (simulated) gateway errors.
    async fn execute_refund(&self, refund: &Refund) -> Result<()>;
}

fn new_payment_ref() -> String {
    format!("pay_{}", Uuid::new_v4().simple())
}

fn mapping_key(payment_ref: &str) -> String {
    format!("payment:ref:{payment_ref}")
}

fn simulate_gateway_call(failure_rate: f64) -> Result<()> {
    if rand::random::<f64>() < failure_rate {
        return Err(WorkflowError::GatewayTransientFailure(
            "refund processing failed".to_string(),
        ));
    }
    Ok(())
}

/// Production wiring: reference mappings live in Redis so every worker
/// process resolves the same references, and expiry is enforced by the
/// store itself.
pub struct RedisPaymentSimulator {
    conn: ConnectionManager,
    ttl: Duration,
    failure_rate: f64,
}

impl RedisPaymentSimulator {
    pub fn new(conn: ConnectionManager, failure_rate: f64) -> Self {
        Self {
            conn,
            ttl: PAYMENT_REF_TTL,
            failure_rate,
        }
    }
}

#[async_trait]
impl PaymentGateway for RedisPaymentSimulator {
    async fn initiate(&self, order: &Order) -> Result<String> {
        let payment_ref = new_payment_ref();
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(mapping_key(&payment_ref), order.id, self.ttl.as_secs())
            .await?;
        tracing::debug!(order_id = order.id, payment_ref = %payment_ref, "Payment initiated");
        Ok(payment_ref)
    }

    async fn resolve(&self, payment_ref: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let order_id: Option<i64> = conn.get(mapping_key(payment_ref)).await?;
        Ok(order_id)
    }

    async fn execute_refund(&self, refund: &Refund) -> Result<()> {
        tracing::debug!(
            refund_id = refund.id,
            amount_cents = refund.amount_cents,
            gateway_ref = %refund.refund_reference,
            "Processing refund with payment gateway"
        );
        simulate_gateway_call(self.failure_rate)
    }
}

/// In-memory gateway for tests and standalone development: same semantics,
/// expiry tracked per entry.
pub struct MemoryPaymentSimulator {
    mappings: Mutex<HashMap<String, (i64, Instant)>>,
    ttl: Duration,
    failure_rate: f64,
}

impl MemoryPaymentSimulator {
    pub fn new(failure_rate: f64) -> Self {
        Self::with_ttl(failure_rate, PAYMENT_REF_TTL)
    }

    pub fn with_ttl(failure_rate: f64, ttl: Duration) -> Self {
        Self {
            mappings: Mutex::new(HashMap::new()),
            ttl,
            failure_rate,
        }
    }
}

#[async_trait]
impl PaymentGateway for MemoryPaymentSimulator {
    async fn initiate(&self, order: &Order) -> Result<String> {
        let payment_ref = new_payment_ref();
        self.mappings
            .lock()
            .await
            .insert(payment_ref.clone(), (order.id, Instant::now() + self.ttl));
        Ok(payment_ref)
    }

    async fn resolve(&self, payment_ref: &str) -> Result<Option<i64>> {
        let mut mappings = self.mappings.lock().await;
        match mappings.get(payment_ref) {
            Some((order_id, expires_at)) if *expires_at > Instant::now() => Ok(Some(*order_id)),
            Some(_) => {
                mappings.remove(payment_ref);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn execute_refund(&self, _refund: &Refund) -> Result<()> {
        simulate_gateway_call(self.failure_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::model::OrderStatus;

    fn order(id: i64) -> Order {
        Order {
            id,
            external_ref: format!("ORD-{id}"),
            customer_id: 1,
            status: OrderStatus::Reserved,
            total_cents: 1000,
            payment_ref: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn initiate_then_resolve() {
        let gateway = MemoryPaymentSimulator::new(0.0);
        let payment_ref = gateway.initiate(&order(7)).await.unwrap();
        assert!(payment_ref.starts_with("pay_"));
        assert_eq!(gateway.resolve(&payment_ref).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn expired_reference_is_absent() {
        let gateway = MemoryPaymentSimulator::with_ttl(0.0, Duration::from_secs(0));
        let payment_ref = gateway.initiate(&order(7)).await.unwrap();
        assert_eq!(gateway.resolve(&payment_ref).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_reference_is_absent() {
        let gateway = MemoryPaymentSimulator::new(0.0);
        assert_eq!(gateway.resolve("pay_nope").await.unwrap(), None);
    }
}

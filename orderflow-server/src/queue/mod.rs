//! Asynchronous task orchestration
//!
//! A durable queue delivers one task per logical order, refund, or payment
//! callback, at least once. Retry budgets and backoff are explicit
//! configuration here, never ambient defaults; a task that exhausts its
//! budget (or fails permanently) is dead-lettered for manual inspection.
//! Correctness under duplicate delivery comes from the task bodies'
//! idempotency keys, not from the queue.
//!
//! A claim is a lease, not ownership: a worker that crashes mid-task never
//! reports back, so a `running` job whose lease has lapsed becomes
//! claimable again and counts another delivery attempt.

pub mod memory;
pub mod postgres;
pub mod worker;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::intake::RawOrderRecord;

/// Task payloads. Serialized as tagged JSON into the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Drive one ingested record through upsert → reserve → pay, then
    /// enqueue the (simulated) payment callback.
    ProcessOrder { record: RawOrderRecord },
    /// Resolve a payment reference and finalize or roll back its order.
    PaymentCallback {
        payment_ref: String,
        success: bool,
        reason: Option<String>,
    },
    /// Execute a pending refund against the gateway.
    ExecuteRefund { refund_reference: String },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::ProcessOrder { .. } => "process_order",
            Task::PaymentCallback { .. } => "payment_callback",
            Task::ExecuteRefund { .. } => "execute_refund",
        }
    }
}

/// One claimed job instance.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub task: Task,
    /// Delivery attempts including the current one.
    pub attempts: i32,
    pub max_attempts: i32,
}

/// How long a claimed job may stay `running` before it is presumed
/// orphaned by a worker crash and handed out again. Generous next to the
/// longest task body (one order's worth of row-locked transactions), so a
/// live worker is never raced by a redelivery.
pub const JOB_LEASE: Duration = Duration::from_secs(300);

/// Explicit retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next delivery after `attempts` failed ones:
    /// exponential, doubling per attempt.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exp = attempts.saturating_sub(1).clamp(0, 16) as u32;
        self.base_delay * 2_u32.saturating_pow(exp)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a task; returns the job id.
    async fn enqueue(&self, task: &Task) -> Result<i64>;

    /// Claim the oldest runnable job, marking it running and counting the
    /// delivery. `None` when the queue is idle.
    async fn claim(&self) -> Result<Option<Job>>;

    async fn complete(&self, job_id: i64) -> Result<()>;

    /// Record a failed delivery: re-schedule with backoff, or dead-letter
    /// when the error is permanent or the attempt budget is spent.
    async fn fail(&self, job: &Job, error: &str, permanent: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(20));
        assert_eq!(policy.backoff(4), Duration::from_secs(40));
    }

    #[test]
    fn task_serializes_with_tag() {
        let task = Task::ExecuteRefund {
            refund_reference: "refund_1_500_0".into(),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "execute_refund");
        assert_eq!(value["refund_reference"], "refund_1_500_0");

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), "execute_refund");
    }
}

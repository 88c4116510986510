//! Queue workers — background tasks that drain the durable job queue
//!
//! Each worker claims one job at a time, dispatches it to the owning
//! engine, and reports the outcome back to the queue. Delivery is
//! at-least-once; the task bodies are idempotent, so a crash between
//! execution and `complete` only costs a redundant retry.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::queue::{Job, JobQueue, Task};
use crate::refund::RefundEngine;
use crate::workflow::OrderWorkflow;

/// Poll interval when the queue is empty
const IDLE_SLEEP_MS: u64 = 500;

pub struct QueueWorker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    workflow: Arc<OrderWorkflow>,
    refunds: Arc<RefundEngine>,
    shutdown: CancellationToken,
}

impl QueueWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn JobQueue>,
        workflow: Arc<OrderWorkflow>,
        refunds: Arc<RefundEngine>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            workflow,
            refunds,
            shutdown,
        }
    }

    /// Claim-dispatch loop. Runs until the shutdown token fires; an
    /// in-flight job finishes before the worker exits.
    pub async fn run(self) {
        tracing::info!(worker = self.id, "Queue worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let job = match self.queue.claim().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(IDLE_SLEEP_MS)) => continue,
                    }
                }
                Err(err) => {
                    tracing::error!(worker = self.id, error = %err, "Failed to claim job");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(IDLE_SLEEP_MS)) => continue,
                    }
                }
            };

            self.handle(job).await;
        }

        tracing::info!(worker = self.id, "Queue worker shutting down");
    }

    async fn handle(&self, job: Job) {
        let job_id = job.id;
        let kind = job.task.kind();
        tracing::debug!(worker = self.id, job_id, kind, attempt = job.attempts, "Job claimed");

        match self.dispatch(&job.task).await {
            Ok(()) => {
                if let Err(err) = self.queue.complete(job_id).await {
                    tracing::error!(job_id, error = %err, "Failed to mark job completed");
                }
            }
            Err(err) => {
                let permanent = err.is_permanent();
                tracing::warn!(
                    job_id,
                    kind,
                    attempt = job.attempts,
                    permanent,
                    error = %err,
                    "Job failed"
                );
                if let Err(err) = self.queue.fail(&job, &err.to_string(), permanent).await {
                    tracing::error!(job_id, error = %err, "Failed to record job failure");
                }
            }
        }
    }

    async fn dispatch(&self, task: &Task) -> crate::error::Result<()> {
        match task {
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
            Task::ExecuteRefund { refund_reference } => self.refunds.execute(refund_reference).await,
        }
    }
}

/// Spawn `count` workers sharing one queue and one shutdown token.
pub fn spawn_workers(
    count: usize,
    queue: Arc<dyn JobQueue>,
    workflow: Arc<OrderWorkflow>,
    refunds: Arc<RefundEngine>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let worker = QueueWorker::new(
                id,
                queue.clone(),
                workflow.clone(),
                refunds.clone(),
                shutdown.clone(),
            );
            tokio::spawn(worker.run())
        })
        .collect()
}

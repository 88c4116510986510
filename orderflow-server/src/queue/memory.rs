//! In-memory job queue for tests and standalone development
//!
//! Same contract as the Postgres queue, minus durability. Retry delays are
//! not simulated: a failed-but-retryable job becomes claimable again
//! immediately, which keeps tests deterministic. Claim leases are honored:
//! a claimed job whose worker never reports back is redelivered once the
//! lease lapses.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::queue::{JOB_LEASE, Job, JobQueue, RetryPolicy, Task};

#[derive(Default)]
struct MemQueueState {
    next_id: i64,
    pending: VecDeque<Job>,
    running: HashMap<i64, (Job, Instant)>,
    completed: Vec<i64>,
    dead: Vec<(Job, String)>,
}

impl MemQueueState {
    /// Move jobs whose lease has lapsed back to the head of the queue.
    fn reclaim_orphans(&mut self, now: Instant) {
        let expired: Vec<i64> = self
            .running
            .iter()
            .filter(|(_, (_, lease_until))| *lease_until <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            if let Some((job, _)) = self.running.remove(&id) {
                self.pending.push_front(job);
            }
        }
    }
}

pub struct MemoryQueue {
    state: Mutex<MemQueueState>,
    policy: RetryPolicy,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(MemQueueState::default()),
            policy,
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn completed_len(&self) -> usize {
        self.state.lock().await.completed.len()
    }

    pub async fn dead_jobs(&self) -> Vec<(Job, String)> {
        self.state.lock().await.dead.clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, task: &Task) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.pending.push_back(Job {
            id,
            task: task.clone(),
            attempts: 0,
            max_attempts: self.policy.max_attempts,
        });
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.reclaim_orphans(now);

        Ok(state.pending.pop_front().map(|mut job| {
            job.attempts += 1;
            state.running.insert(job.id, (job.clone(), now + JOB_LEASE));
            job
        }))
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.remove(&job_id);
        state.completed.push(job_id);
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str, permanent: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.remove(&job.id);
        if permanent || job.attempts >= job.max_attempts {
            state.dead.push((job.clone(), error.to_string()));
        } else {
            state.pending.push_back(job.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback_task() -> Task {
        Task::PaymentCallback {
            payment_ref: "pay_x".into(),
            success: true,
            reason: None,
        }
    }

    #[tokio::test]
    async fn retry_until_budget_then_dead_letter() {
        let queue = MemoryQueue::new(RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_secs(1),
        });
        queue.enqueue(&callback_task()).await.unwrap();

        for _ in 0..3 {
            let job = queue.claim().await.unwrap().unwrap();
            queue.fail(&job, "transient", false).await.unwrap();
        }

        assert!(queue.claim().await.unwrap().is_none());
        let dead = queue.dead_jobs().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.attempts, 3);
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters_immediately() {
        let queue = MemoryQueue::default();
        queue.enqueue(&callback_task()).await.unwrap();

        let job = queue.claim().await.unwrap().unwrap();
        queue.fail(&job, "unknown payment reference", true).await.unwrap();

        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.dead_jobs().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_job_is_invisible_while_leased() {
        let queue = MemoryQueue::default();
        queue.enqueue(&callback_task()).await.unwrap();

        let job = queue.claim().await.unwrap().unwrap();
        assert!(queue.claim().await.unwrap().is_none());

        queue.complete(job.id).await.unwrap();
        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.completed_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn orphaned_claim_is_redelivered_after_lease() {
        let queue = MemoryQueue::default();
        queue.enqueue(&callback_task()).await.unwrap();

        // Worker claims the job and dies without reporting back.
        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert!(queue.claim().await.unwrap().is_none());

        tokio::time::advance(JOB_LEASE + std::time::Duration::from_secs(1)).await;

        let redelivered = queue.claim().await.unwrap().unwrap();
        assert_eq!(redelivered.id, job.id);
        assert_eq!(redelivered.attempts, 2);
    }
}

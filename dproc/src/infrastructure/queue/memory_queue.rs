// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Process Job Queue
//!
//! Development and test backend with the same observable semantics as the
//! Redis adapter: priority lanes, FIFO within a lane, delayed redelivery
//! with exponential backoff, stall detection through claim deadlines, and
//! terminal tiers with retention. Not durable; a process restart loses it,
//! which is exactly why production uses the broker.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use dproc_domain::{
    ClaimedJob, DeliveryHandle, DprocError, EnqueueOptions, JobEnvelope, JobId, JobQueue,
    RetentionPolicy, RetryPolicy,
};

/// Default window a claimed job may go without a heartbeat.
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct PendingEntry {
    rank: u8,
    enqueued_ms: i64,
    seq: u64,
    job_id: JobId,
}

// Min-order: lowest rank first, then earliest enqueue, then sequence.
// BinaryHeap is a max-heap, so the comparison is reversed.
impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.rank, other.enqueued_ms, other.seq).cmp(&(self.rank, self.enqueued_ms, self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

#[derive(Debug)]
struct JobState {
    envelope: JobEnvelope,
    retry: RetryPolicy,
    /// Deliveries so far (incremented on claim).
    attempts: u32,
    enqueued_ms: i64,
    seq: u64,
}

#[derive(Debug)]
struct ClaimState {
    worker_id: String,
    attempt: u32,
    deadline_ms: i64,
}

#[derive(Debug, Default)]
struct Tiers {
    /// (terminal_ms, job_id)
    completed: Vec<(i64, JobId)>,
    failed: Vec<(i64, JobId)>,
}

#[derive(Default)]
struct Inner {
    pending: BinaryHeap<PendingEntry>,
    /// (visible_at_ms, job_id) for backoff redeliveries.
    delayed: Vec<(i64, JobId)>,
    claimed: HashMap<JobId, ClaimState>,
    jobs: HashMap<JobId, JobState>,
    tiers: Tiers,
    seq: u64,
}

/// In-process queue backend.
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    heartbeat_window: Duration,
    retention: RetentionPolicy,
}

impl MemoryJobQueue {
    pub fn new(heartbeat_window: Duration, retention: RetentionPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            heartbeat_window,
            retention,
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn promote_due(inner: &mut Inner, now_ms: i64) {
        let mut due = Vec::new();
        inner.delayed.retain(|(visible_at, job_id)| {
            if *visible_at <= now_ms {
                due.push(job_id.clone());
                false
            } else {
                true
            }
        });
        for job_id in due {
            if let Some(state) = inner.jobs.get(&job_id) {
                inner.pending.push(PendingEntry {
                    rank: state.envelope.priority.queue_rank(),
                    enqueued_ms: state.enqueued_ms,
                    seq: state.seq,
                    job_id,
                });
            }
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_WINDOW, RetentionPolicy::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions) -> Result<JobId, DprocError> {
        let mut inner = self.inner.lock();
        let job_id = envelope.job_id.clone();
        if inner.jobs.contains_key(&job_id) {
            return Err(DprocError::queue(format!("job {} is already enqueued", job_id)));
        }

        inner.seq += 1;
        let seq = inner.seq;
        let enqueued_ms = Self::now_ms();
        inner.pending.push(PendingEntry {
            rank: options.priority.queue_rank(),
            enqueued_ms,
            seq,
            job_id: job_id.clone(),
        });
        inner.jobs.insert(
            job_id.clone(),
            JobState {
                envelope,
                retry: options.retry,
                attempts: 0,
                enqueued_ms,
                seq,
            },
        );
        debug!(job_id = %job_id, "job enqueued");
        Ok(job_id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, DprocError> {
        let mut inner = self.inner.lock();
        let now_ms = Self::now_ms();
        Self::promote_due(&mut inner, now_ms);

        let Some(entry) = inner.pending.pop() else {
            return Ok(None);
        };

        let state = inner
            .jobs
            .get_mut(&entry.job_id)
            .ok_or_else(|| DprocError::queue(format!("job {} has no state", entry.job_id)))?;
        state.attempts += 1;
        let attempt = state.attempts;
        let max_attempts = state.retry.max_attempts;
        let envelope = state.envelope.clone();

        inner.claimed.insert(
            entry.job_id.clone(),
            ClaimState {
                worker_id: worker_id.to_string(),
                attempt,
                deadline_ms: now_ms + self.heartbeat_window.as_millis() as i64,
            },
        );

        Ok(Some(ClaimedJob {
            envelope,
            handle: DeliveryHandle {
                job_id: entry.job_id,
                worker_id: worker_id.to_string(),
                attempt,
                max_attempts,
                claimed_at: now_ms,
            },
        }))
    }

    async fn heartbeat(&self, handle: &DeliveryHandle) -> Result<(), DprocError> {
        let mut inner = self.inner.lock();
        let now_ms = Self::now_ms();
        if let Some(claim) = inner.claimed.get_mut(&handle.job_id) {
            if claim.attempt == handle.attempt {
                claim.deadline_ms = now_ms + self.heartbeat_window.as_millis() as i64;
            }
        }
        Ok(())
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), DprocError> {
        let mut inner = self.inner.lock();
        if inner.claimed.remove(&handle.job_id).is_none() {
            // Stall redelivery already took it back; nothing to settle.
            return Ok(());
        }
        inner.jobs.remove(&handle.job_id);
        let now_ms = Self::now_ms();
        inner.tiers.completed.push((now_ms, handle.job_id));
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle, error: &DprocError) -> Result<(), DprocError> {
        let mut inner = self.inner.lock();
        if inner.claimed.remove(&handle.job_id).is_none() {
            return Ok(());
        }

        let now_ms = Self::now_ms();
        let state = inner
            .jobs
            .get(&handle.job_id)
            .ok_or_else(|| DprocError::queue(format!("job {} has no state", handle.job_id)))?;

        let retryable = error.is_retryable() && state.attempts < state.retry.max_attempts;
        if retryable {
            let delay = state.retry.delay_for(state.attempts);
            debug!(job_id = %handle.job_id, attempt = state.attempts, delay_ms = delay.as_millis() as u64, "job scheduled for retry");
            inner
                .delayed
                .push((now_ms + delay.as_millis() as i64, handle.job_id));
        } else {
            debug!(job_id = %handle.job_id, code = error.code(), "job moved to failed tier");
            inner.jobs.remove(&handle.job_id);
            inner.tiers.failed.push((now_ms, handle.job_id));
        }
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> Result<bool, DprocError> {
        let mut inner = self.inner.lock();
        if inner.claimed.contains_key(job_id) {
            return Ok(false);
        }
        let was_pending = inner.jobs.remove(job_id).is_some();
        if was_pending {
            // Lazy removal: drop the heap entry when it surfaces.
            let job_id = job_id.clone();
            inner.pending.retain(|entry| entry.job_id != job_id);
            inner.delayed.retain(|(_, id)| *id != job_id);
        }
        Ok(was_pending)
    }

    async fn requeue_stalled(&self) -> Result<usize, DprocError> {
        let mut inner = self.inner.lock();
        let now_ms = Self::now_ms();
        let stalled: Vec<JobId> = inner
            .claimed
            .iter()
            .filter(|(_, claim)| claim.deadline_ms < now_ms)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in &stalled {
            inner.claimed.remove(job_id);
            if let Some(state) = inner.jobs.get(job_id) {
                let rank = state.envelope.priority.queue_rank();
                let enqueued_ms = state.enqueued_ms;
                let seq = state.seq;
                tracing::warn!(job_id = %job_id, "stalled job requeued");
                inner.pending.push(PendingEntry {
                    rank,
                    enqueued_ms,
                    seq,
                    job_id: job_id.clone(),
                });
            }
        }
        Ok(stalled.len())
    }

    async fn sweep_expired(&self) -> Result<usize, DprocError> {
        let mut inner = self.inner.lock();
        let now_ms = Self::now_ms();
        let completed_cutoff = now_ms - self.retention.completed.as_millis() as i64;
        let failed_cutoff = now_ms - self.retention.failed.as_millis() as i64;

        let before = inner.tiers.completed.len() + inner.tiers.failed.len();
        inner.tiers.completed.retain(|(at, _)| *at > completed_cutoff);
        inner.tiers.failed.retain(|(at, _)| *at > failed_cutoff);
        Ok(before - inner.tiers.completed.len() - inner.tiers.failed.len())
    }

    async fn pending_len(&self) -> Result<usize, DprocError> {
        let inner = self.inner.lock();
        Ok(inner.pending.len() + inner.delayed.len())
    }

    async fn close(&self) -> Result<(), DprocError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dproc_domain::JobPriority;
    use serde_json::json;

    fn envelope(n: u32, priority: JobPriority) -> JobEnvelope {
        JobEnvelope {
            job_id: JobId::from_string(format!("web-{}-suffix", n)),
            pipeline_name: "demo".into(),
            inputs: json!({}),
            output_format: "mdx".into(),
            priority,
            user_id: None,
            created_at: n as i64,
        }
    }

    fn options(priority: JobPriority) -> EnqueueOptions {
        EnqueueOptions {
            priority,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 10,
                factor: 2,
            },
        }
    }

    #[tokio::test]
    async fn test_priority_order_beats_enqueue_order() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(envelope(1, JobPriority::Low), options(JobPriority::Low)).await.unwrap();
        queue.enqueue(envelope(2, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();
        queue.enqueue(envelope(3, JobPriority::High), options(JobPriority::High)).await.unwrap();

        let first = queue.claim("w1").await.unwrap().unwrap();
        let second = queue.claim("w1").await.unwrap().unwrap();
        let third = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(first.envelope.priority, JobPriority::High);
        assert_eq!(second.envelope.priority, JobPriority::Normal);
        assert_eq!(third.envelope.priority, JobPriority::Low);
        assert!(queue.claim("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = MemoryJobQueue::default();
        for n in 1..=3 {
            queue
                .enqueue(envelope(n, JobPriority::Normal), options(JobPriority::Normal))
                .await
                .unwrap();
        }
        for n in 1..=3 {
            let claimed = queue.claim("w1").await.unwrap().unwrap();
            assert_eq!(claimed.envelope.job_id.as_str(), format!("web-{}-suffix", n));
        }
    }

    #[tokio::test]
    async fn test_retryable_nack_redelivers_after_backoff() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.handle.attempt, 1);
        let rate_limit = DprocError::RateLimit {
            provider: "openai".into(),
            retry_after_secs: None,
        };
        queue.nack(claimed.handle, &rate_limit).await.unwrap();

        // Not visible until the backoff elapses.
        assert!(queue.claim("w1").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(30)).await;
        let redelivered = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(redelivered.handle.attempt, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_nack_goes_to_failed_tier() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();
        let claimed = queue.claim("w1").await.unwrap().unwrap();

        let invalid_key = DprocError::ApiKeyInvalid { provider: "openai".into() };
        queue.nack(claimed.handle, &invalid_key).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.claim("w1").await.unwrap().is_none());
        assert_eq!(queue.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();
        let transient = DprocError::ApiTimeout {
            provider: "openai".into(),
            elapsed_secs: 120,
        };

        for attempt in 1..=3 {
            tokio::time::sleep(Duration::from_millis(45)).await;
            let claimed = queue.claim("w1").await.unwrap().unwrap();
            assert_eq!(claimed.handle.attempt, attempt);
            queue.nack(claimed.handle, &transient).await.unwrap();
        }

        // Third attempt exhausted the budget.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.claim("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_pending_but_not_claimed() {
        let queue = MemoryJobQueue::default();
        let id1 = queue
            .enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal))
            .await
            .unwrap();
        let id2 = queue
            .enqueue(envelope(2, JobPriority::Normal), options(JobPriority::Normal))
            .await
            .unwrap();

        assert!(queue.remove(&id1).await.unwrap());
        let claimed = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(claimed.handle.job_id, id2);
        // Claimed jobs are not removable.
        assert!(!queue.remove(&id2).await.unwrap());
    }

    #[tokio::test]
    async fn test_stall_redelivery() {
        let queue = MemoryJobQueue::new(Duration::from_millis(20), RetentionPolicy::default());
        queue.enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();

        let claimed = queue.claim("w1").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(queue.requeue_stalled().await.unwrap(), 1);

        let redelivered = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(redelivered.handle.attempt, 2);

        // A late ack from the stalled worker is a quiet no-op.
        queue.ack(claimed.handle).await.unwrap();
        assert_eq!(queue.requeue_stalled().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_extends_deadline() {
        let queue = MemoryJobQueue::new(Duration::from_millis(50), RetentionPolicy::default());
        queue.enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();
        let claimed = queue.claim("w1").await.unwrap().unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            queue.heartbeat(&claimed.handle).await.unwrap();
            assert_eq!(queue.requeue_stalled().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_sweep_retention() {
        let queue = MemoryJobQueue::new(
            DEFAULT_HEARTBEAT_WINDOW,
            RetentionPolicy {
                completed: Duration::from_millis(10),
                failed: Duration::from_secs(3600),
            },
        );
        queue.enqueue(envelope(1, JobPriority::Normal), options(JobPriority::Normal)).await.unwrap();
        let claimed = queue.claim("w1").await.unwrap().unwrap();
        queue.ack(claimed.handle).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.sweep_expired().await.unwrap(), 1);
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Queue Port
//!
//! The durable, priority-ordered hand-off between the submitter and the
//! worker pool. The domain defines the contract; backends (Redis for
//! production, in-process for development and tests) implement it with
//! identical semantics:
//!
//! - **Priority lanes**: lower [`JobPriority::queue_rank`] is delivered
//!   first; within a lane, FIFO by enqueue time (best effort)
//! - **At-least-once**: a claimed job that is neither acked nor nacked
//!   within the heartbeat window is considered stalled and re-delivered
//! - **Retry with backoff**: `nack` schedules an exponential-backoff retry
//!   while attempts remain and the error is transient; otherwise the job
//!   moves to the failed tier
//! - **Retention**: completed jobs are kept 24 h, failed jobs 7 days,
//!   then swept
//!
//! Delivery is at-least-once by design; the executor's startup idempotency
//! (lookup by `job_id`) absorbs duplicates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::DprocError;
use crate::value_objects::{JobId, JobPriority};

/// The payload placed on the queue for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_id: JobId,
    pub pipeline_name: String,
    /// Raw inputs as submitted; normalization happens inside the executor.
    pub inputs: Value,
    pub output_format: String,
    pub priority: JobPriority,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Submission time in epoch milliseconds.
    pub created_at: i64,
}

/// Exponential backoff schedule for queue-level retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivering attempt `attempt` (1-based: the delay
    /// scheduled after the first failure is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = (self.factor as u64).saturating_pow(exp);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Options supplied at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: JobPriority,
    pub retry: RetryPolicy,
}

/// How long terminal jobs stay visible in the queue's bookkeeping tiers.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub completed: Duration,
    pub failed: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: Duration::from_secs(24 * 60 * 60),
            failed: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Opaque receipt for a claimed delivery. Must be handed back on ack or
/// nack; a handle whose heartbeat lapses invalidates itself through stall
/// redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryHandle {
    pub job_id: JobId,
    pub worker_id: String,
    /// 1-based delivery attempt.
    pub attempt: u32,
    /// Attempt budget from the job's retry policy.
    pub max_attempts: u32,
    pub claimed_at: i64,
}

impl DeliveryHandle {
    /// Whether a transient failure of this delivery would still be
    /// retried. The executor uses this to decide between leaving the
    /// record in `processing` (retry coming) and finalizing it as
    /// `failed`.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// A claimed delivery: the envelope plus the receipt needed to settle it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub envelope: JobEnvelope,
    pub handle: DeliveryHandle,
}

/// Durable, priority-ordered job queue port.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues an envelope. Returns the job id for convenience.
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions) -> Result<JobId, DprocError>;

    /// Claims the highest-priority due job, if any. Non-blocking; workers
    /// poll on their own cadence.
    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, DprocError>;

    /// Extends the stall deadline of a claimed job.
    async fn heartbeat(&self, handle: &DeliveryHandle) -> Result<(), DprocError>;

    /// Settles a delivery as succeeded; the job moves to the completed tier.
    async fn ack(&self, handle: DeliveryHandle) -> Result<(), DprocError>;

    /// Settles a delivery as failed. Transient errors are rescheduled with
    /// exponential backoff while attempts remain; everything else (and
    /// exhausted retries) moves the job to the failed tier.
    async fn nack(&self, handle: DeliveryHandle, error: &DprocError) -> Result<(), DprocError>;

    /// Removes a job that is still pending (pre-start cancellation).
    /// Returns `false` when the job is no longer in the pending tier.
    async fn remove(&self, job_id: &JobId) -> Result<bool, DprocError>;

    /// Re-delivers claimed jobs whose heartbeat deadline has passed.
    /// Returns how many were requeued.
    async fn requeue_stalled(&self) -> Result<usize, DprocError>;

    /// Drops terminal-tier jobs past their retention window. Returns how
    /// many were swept.
    async fn sweep_expired(&self) -> Result<usize, DprocError>;

    /// Number of jobs currently waiting (pending plus delayed).
    async fn pending_len(&self) -> Result<usize, DprocError>;

    async fn close(&self) -> Result<(), DprocError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            base_delay_ms: u64::MAX / 2,
            factor: 10,
        };
        // Saturates instead of panicking.
        let _ = policy.delay_for(u32::MAX);
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = JobEnvelope {
            job_id: JobId::from_string("web-1-abcdef"),
            pipeline_name: "demo".into(),
            inputs: serde_json::json!({"topic": "AI"}),
            output_format: "html".into(),
            priority: JobPriority::High,
            user_id: Some("u-1".into()),
            created_at: 1722470400123,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: JobEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, envelope.job_id);
        assert_eq!(back.priority, JobPriority::High);
    }
}

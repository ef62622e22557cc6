// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Redis Job Queue
//!
//! The durable broker backend. Layout under one prefix:
//!
//! | Key | Type | Content |
//! |---|---|---|
//! | `dproc:queue:pending` | ZSET | job ids scored `rank·10^13 + enqueue_ms` |
//! | `dproc:queue:delayed` | ZSET | job ids scored by visibility time (backoff) |
//! | `dproc:queue:claimed` | ZSET | job ids scored by heartbeat deadline |
//! | `dproc:queue:jobs`    | HASH | job id → envelope + retry metadata JSON |
//! | `dproc:queue:completed` / `:failed` | ZSET | job ids scored by terminal time |
//!
//! The composite pending score keeps priority lanes strictly ordered while
//! staying FIFO within a lane (epoch milliseconds fit comfortably under the
//! `10^13` lane width). Claim and stall-requeue are Lua scripts so the
//! pop-and-mark step cannot be torn by a crash between commands; everything
//! else is plain pipelined commands.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dproc_domain::{
    ClaimedJob, DeliveryHandle, DprocError, EnqueueOptions, JobEnvelope, JobId, JobQueue,
    RetentionPolicy, RetryPolicy,
};

use super::memory_queue::DEFAULT_HEARTBEAT_WINDOW;

const KEY_PENDING: &str = "dproc:queue:pending";
const KEY_DELAYED: &str = "dproc:queue:delayed";
const KEY_CLAIMED: &str = "dproc:queue:claimed";
const KEY_JOBS: &str = "dproc:queue:jobs";
const KEY_COMPLETED: &str = "dproc:queue:completed";
const KEY_FAILED: &str = "dproc:queue:failed";

/// Lane width for the composite pending score.
const LANE_WIDTH: f64 = 1e13;

/// Promotes due delayed jobs, pops the best pending job, bumps its attempt
/// counter, and marks it claimed, atomically.
///
/// KEYS: pending, delayed, claimed, jobs
/// ARGV: now_ms, claim_deadline_ms
/// Returns: [job_id, meta_json] or false.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(due) do
    local meta = redis.call('HGET', KEYS[4], id)
    if meta then
        local parsed = cjson.decode(meta)
        redis.call('ZADD', KEYS[1], parsed.score, id)
    end
    redis.call('ZREM', KEYS[2], id)
end

local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then
    return false
end
local id = popped[1]
local meta = redis.call('HGET', KEYS[4], id)
if not meta then
    return false
end
local parsed = cjson.decode(meta)
parsed.attempts = parsed.attempts + 1
local encoded = cjson.encode(parsed)
redis.call('HSET', KEYS[4], id, encoded)
redis.call('ZADD', KEYS[3], ARGV[2], id)
return {id, encoded}
"#;

/// Moves claimed jobs whose deadline passed back to pending.
///
/// KEYS: pending, claimed, jobs
/// ARGV: now_ms
/// Returns: number requeued.
const REQUEUE_STALLED_SCRIPT: &str = r#"
local stalled = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
local count = 0
for _, id in ipairs(stalled) do
    redis.call('ZREM', KEYS[2], id)
    local meta = redis.call('HGET', KEYS[3], id)
    if meta then
        local parsed = cjson.decode(meta)
        redis.call('ZADD', KEYS[1], parsed.score, id)
        count = count + 1
    end
end
return count
"#;

/// Removes a job only while it is still pending or delayed.
///
/// KEYS: pending, delayed, claimed, jobs
/// ARGV: job_id
/// Returns: 1 when removed.
const REMOVE_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[3], ARGV[1]) then
    return 0
end
local removed = redis.call('ZREM', KEYS[1], ARGV[1]) + redis.call('ZREM', KEYS[2], ARGV[1])
if removed > 0 then
    redis.call('HDEL', KEYS[4], ARGV[1])
    return 1
end
return 0
"#;

/// Per-job metadata stored alongside the envelope.
#[derive(Debug, Serialize, Deserialize)]
struct JobMeta {
    envelope: JobEnvelope,
    retry: RetryPolicy,
    attempts: u32,
    score: f64,
}

/// Redis-backed queue adapter.
pub struct RedisJobQueue {
    conn: ConnectionManager,
    heartbeat_window: Duration,
    retention: RetentionPolicy,
    claim_script: Script,
    requeue_script: Script,
    remove_script: Script,
}

fn queue_err(context: &str, err: redis::RedisError) -> DprocError {
    DprocError::queue(format!("{}: {}", context, err))
}

impl RedisJobQueue {
    pub async fn connect(url: &str) -> Result<Self, DprocError> {
        let client = redis::Client::open(url)
            .map_err(|e| queue_err("invalid redis url", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| queue_err("failed to connect to redis", e))?;
        Ok(Self::with_connection(conn, DEFAULT_HEARTBEAT_WINDOW, RetentionPolicy::default()))
    }

    pub fn with_connection(
        conn: ConnectionManager,
        heartbeat_window: Duration,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            conn,
            heartbeat_window,
            retention,
            claim_script: Script::new(CLAIM_SCRIPT),
            requeue_script: Script::new(REQUEUE_STALLED_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn pending_score(envelope: &JobEnvelope, enqueue_ms: i64) -> f64 {
        envelope.priority.queue_rank() as f64 * LANE_WIDTH + enqueue_ms as f64
    }

    async fn load_meta(&self, job_id: &JobId) -> Result<Option<JobMeta>, DprocError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(KEY_JOBS, job_id.as_str())
            .await
            .map_err(|e| queue_err("failed to read job metadata", e))?;
        raw.map(|r| {
            serde_json::from_str(&r)
                .map_err(|e| DprocError::queue(format!("corrupt job metadata: {}", e)))
        })
        .transpose()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions) -> Result<JobId, DprocError> {
        let mut conn = self.conn.clone();
        let job_id = envelope.job_id.clone();
        let now_ms = Self::now_ms();

        let mut envelope = envelope;
        envelope.priority = options.priority;
        let score = Self::pending_score(&envelope, now_ms);
        let meta = JobMeta {
            envelope,
            retry: options.retry,
            attempts: 0,
            score,
        };
        let meta_json = serde_json::to_string(&meta)?;

        redis::pipe()
            .atomic()
            .hset(KEY_JOBS, job_id.as_str(), meta_json)
            .ignore()
            .zadd(KEY_PENDING, job_id.as_str(), score)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("failed to enqueue job", e))?;

        debug!(job_id = %job_id, score, "job enqueued");
        Ok(job_id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, DprocError> {
        let mut conn = self.conn.clone();
        let now_ms = Self::now_ms();
        let deadline_ms = now_ms + self.heartbeat_window.as_millis() as i64;

        let result: Option<(String, String)> = self
            .claim_script
            .key(KEY_PENDING)
            .key(KEY_DELAYED)
            .key(KEY_CLAIMED)
            .key(KEY_JOBS)
            .arg(now_ms)
            .arg(deadline_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| queue_err("claim script failed", e))?;

        let Some((job_id, meta_json)) = result else {
            return Ok(None);
        };
        let meta: JobMeta = serde_json::from_str(&meta_json)
            .map_err(|e| DprocError::queue(format!("corrupt job metadata: {}", e)))?;

        Ok(Some(ClaimedJob {
            envelope: meta.envelope,
            handle: DeliveryHandle {
                job_id: JobId::from_string(job_id),
                worker_id: worker_id.to_string(),
                attempt: meta.attempts,
                max_attempts: meta.retry.max_attempts,
                claimed_at: now_ms,
            },
        }))
    }

    async fn heartbeat(&self, handle: &DeliveryHandle) -> Result<(), DprocError> {
        let mut conn = self.conn.clone();
        let deadline_ms = Self::now_ms() + self.heartbeat_window.as_millis() as i64;
        // XX: only refresh jobs that are still claimed.
        redis::cmd("ZADD")
            .arg(KEY_CLAIMED)
            .arg("XX")
            .arg(deadline_ms)
            .arg(handle.job_id.as_str())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("failed to refresh heartbeat", e))?;
        Ok(())
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), DprocError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(KEY_CLAIMED, handle.job_id.as_str())
            .await
            .map_err(|e| queue_err("failed to settle job", e))?;
        if removed == 0 {
            // Stall redelivery already took it back.
            return Ok(());
        }

        redis::pipe()
            .atomic()
            .hdel(KEY_JOBS, handle.job_id.as_str())
            .ignore()
            .zadd(KEY_COMPLETED, handle.job_id.as_str(), Self::now_ms())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| queue_err("failed to record completion", e))?;
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle, error: &DprocError) -> Result<(), DprocError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(KEY_CLAIMED, handle.job_id.as_str())
            .await
            .map_err(|e| queue_err("failed to settle job", e))?;
        if removed == 0 {
            return Ok(());
        }

        let Some(meta) = self.load_meta(&handle.job_id).await? else {
            return Ok(());
        };

        let retryable = error.is_retryable() && meta.attempts < meta.retry.max_attempts;
        if retryable {
            let delay = meta.retry.delay_for(meta.attempts);
            let visible_at = Self::now_ms() + delay.as_millis() as i64;
            debug!(job_id = %handle.job_id, attempt = meta.attempts, delay_ms = delay.as_millis() as u64, "job scheduled for retry");
            conn.zadd::<_, _, _, ()>(KEY_DELAYED, handle.job_id.as_str(), visible_at)
                .await
                .map_err(|e| queue_err("failed to schedule retry", e))?;
        } else {
            warn!(job_id = %handle.job_id, code = error.code(), "job moved to failed tier");
            conn.zadd::<_, _, _, ()>(KEY_FAILED, handle.job_id.as_str(), Self::now_ms())
                .await
                .map_err(|e| queue_err("failed to record failure", e))?;
        }
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> Result<bool, DprocError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .remove_script
            .key(KEY_PENDING)
            .key(KEY_DELAYED)
            .key(KEY_CLAIMED)
            .key(KEY_JOBS)
            .arg(job_id.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| queue_err("remove script failed", e))?;
        Ok(removed == 1)
    }

    async fn requeue_stalled(&self) -> Result<usize, DprocError> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .requeue_script
            .key(KEY_PENDING)
            .key(KEY_CLAIMED)
            .key(KEY_JOBS)
            .arg(Self::now_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| queue_err("requeue script failed", e))?;
        if count > 0 {
            warn!(count, "stalled jobs requeued");
        }
        Ok(count as usize)
    }

    async fn sweep_expired(&self) -> Result<usize, DprocError> {
        let mut conn = self.conn.clone();
        let now_ms = Self::now_ms();
        let mut swept = 0usize;

        for (key, retention) in [
            (KEY_COMPLETED, self.retention.completed),
            (KEY_FAILED, self.retention.failed),
        ] {
            let cutoff = now_ms - retention.as_millis() as i64;
            let expired: Vec<String> = conn
                .zrangebyscore(key, "-inf", cutoff)
                .await
                .map_err(|e| queue_err("failed to scan terminal tier", e))?;
            if expired.is_empty() {
                continue;
            }
            let mut pipe = redis::pipe();
            pipe.atomic();
            for job_id in &expired {
                pipe.zrem(key, job_id).ignore();
                pipe.hdel(KEY_JOBS, job_id).ignore();
            }
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| queue_err("failed to sweep terminal tier", e))?;
            swept += expired.len();
        }
        Ok(swept)
    }

    async fn pending_len(&self) -> Result<usize, DprocError> {
        let mut conn = self.conn.clone();
        let (pending, delayed): (i64, i64) = redis::pipe()
            .zcard(KEY_PENDING)
            .zcard(KEY_DELAYED)
            .query_async(&mut conn)
            .await
            .map_err(|e| queue_err("failed to measure queue depth", e))?;
        Ok((pending + delayed) as usize)
    }

    async fn close(&self) -> Result<(), DprocError> {
        // ConnectionManager has no explicit shutdown; dropping is enough.
        Ok(())
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Pool
//!
//! Hosts `concurrency` claim-execute loops over the queue, plus one
//! maintenance loop (stall requeue and retention sweep). Operator-visible
//! state transitions are emitted as structured tracing events:
//! `active`, `completed`, `cancelled`, `failed`, `stalled`, `error`.
//!
//! ## Graceful shutdown
//!
//! On the shutdown signal the loops stop claiming and finish their in-flight
//! executions. If the drain grace period expires first, every active
//! execution's cancellation token is tripped; the executors then write
//! `cancelled` records at their next checkpoint and the drain completes.
//!
//! ## Backpressure
//!
//! There is no in-process buffering beyond the running executions: a loop
//! claims its next job only after settling the previous one, so a blocked
//! store write stops further claims by itself.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dproc_domain::{ClaimedJob, DprocError, JobQueue};
use dproc_bootstrap::shutdown::ShutdownHandle;

use crate::application::services::cancellation::CancellationRegistry;
use crate::application::services::executor::JobExecutor;

use super::supervisor::{join_supervised, spawn_supervised};

/// Tuning knobs for the pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Concurrent executors.
    pub concurrency: usize,
    /// Idle delay between claim attempts.
    pub poll_interval: Duration,
    /// Cadence of heartbeats for claimed jobs.
    pub heartbeat_interval: Duration,
    /// Cadence of stall requeue and retention sweeps.
    pub maintenance_interval: Duration,
    /// How long in-flight executions get after the shutdown signal.
    pub drain_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(10),
            maintenance_interval: Duration::from_secs(30),
            drain_grace: Duration::from_secs(30),
        }
    }
}

/// The worker pool (C7).
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn JobExecutor>,
    cancellations: Arc<CancellationRegistry>,
    config: WorkerPoolConfig,
    pool_id: String,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        executor: Arc<dyn JobExecutor>,
        cancellations: Arc<CancellationRegistry>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            cancellations,
            config,
            pool_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Runs until the shutdown signal, then drains and closes the queue.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownHandle) -> Result<(), DprocError> {
        info!(
            concurrency = self.config.concurrency,
            pool_id = %self.pool_id,
            "worker pool starting"
        );

        let mut handles = Vec::with_capacity(self.config.concurrency);
        for index in 0..self.config.concurrency {
            let pool = self.clone();
            let handle = shutdown.clone();
            handles.push(spawn_supervised("worker-loop", async move {
                pool.worker_loop(index, handle).await
            }));
        }
        let maintenance = {
            let pool = self.clone();
            let handle = shutdown.clone();
            spawn_supervised("queue-maintenance", async move {
                pool.maintenance_loop(handle).await
            })
        };

        shutdown.wait_for_signal().await;
        info!("worker pool stopped claiming, draining in-flight executions");

        let drain = futures::future::join_all(handles);
        tokio::pin!(drain);
        tokio::select! {
            results = &mut drain => {
                for result in results {
                    if let Ok(Err(err)) = result {
                        error!(error = %err, "worker loop ended with error");
                    }
                }
            }
            _ = tokio::time::sleep(self.config.drain_grace) => {
                let cancelled = self.cancellations.cancel_all();
                warn!(cancelled, "drain deadline passed, cancelling in-flight executions");
                for result in drain.await {
                    if let Ok(Err(err)) = result {
                        error!(error = %err, "worker loop ended with error");
                    }
                }
            }
        }

        let _ = join_supervised(maintenance).await;
        self.queue.close().await?;
        info!("worker pool stopped");
        Ok(())
    }

    async fn worker_loop(&self, index: usize, shutdown: ShutdownHandle) -> Result<(), DprocError> {
        let worker_id = format!("worker-{}-{}", self.pool_id, index);
        debug!(worker_id = %worker_id, "worker loop started");

        while !shutdown.is_shutting_down() {
            match self.queue.claim(&worker_id).await {
                Ok(Some(claimed)) => {
                    self.process(&worker_id, claimed).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.wait_for_signal() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(err) => {
                    error!(worker_id = %worker_id, event = "error", error = %err, "claim failed");
                    tokio::select! {
                        _ = shutdown.wait_for_signal() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        debug!(worker_id = %worker_id, "worker loop stopped");
        Ok(())
    }

    /// Runs one claimed job through the executor and settles the delivery.
    async fn process(&self, worker_id: &str, claimed: ClaimedJob) {
        let ClaimedJob { envelope, handle } = claimed;
        info!(
            worker_id = %worker_id,
            event = "active",
            job_id = %handle.job_id,
            pipeline = %envelope.pipeline_name,
            attempt = handle.attempt,
            "job claimed"
        );

        // Keep the claim alive while the executor runs.
        let heartbeat = {
            let queue = self.queue.clone();
            let hb_handle = handle.clone();
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(err) = queue.heartbeat(&hb_handle).await {
                        warn!(job_id = %hb_handle.job_id, error = %err, "heartbeat failed");
                        break;
                    }
                }
            })
        };

        let result = self.executor.execute(&envelope, handle.is_final_attempt()).await;
        heartbeat.abort();

        match result {
            Ok(record) => {
                if let Err(err) = self.queue.ack(handle).await {
                    error!(job_id = %record.job_id, event = "error", error = %err, "ack failed");
                    return;
                }
                info!(
                    event = "completed",
                    job_id = %record.job_id,
                    execution_id = %record.id,
                    "job completed"
                );
            }
            // Cancellation is terminal; settle the delivery so the queue
            // does not retry a job the user abandoned.
            Err(err) if err.is_cancellation() => {
                if let Err(ack_err) = self.queue.ack(handle).await {
                    error!(event = "error", error = %ack_err, "ack of cancelled job failed");
                }
                info!(event = "cancelled", job_id = %envelope.job_id, "job cancelled");
            }
            Err(err) => {
                warn!(
                    event = "failed",
                    job_id = %envelope.job_id,
                    code = err.code(),
                    retryable = err.is_retryable(),
                    "job failed"
                );
                if let Err(nack_err) = self.queue.nack(handle, &err).await {
                    error!(event = "error", error = %nack_err, "nack failed");
                }
            }
        }
    }

    async fn maintenance_loop(&self, shutdown: ShutdownHandle) -> Result<(), DprocError> {
        loop {
            tokio::select! {
                _ = shutdown.wait_for_signal() => break,
                _ = tokio::time::sleep(self.config.maintenance_interval) => {}
            }

            match self.queue.requeue_stalled().await {
                Ok(0) => {}
                Ok(count) => warn!(event = "stalled", count, "requeued stalled jobs"),
                Err(err) => error!(event = "error", error = %err, "stall requeue failed"),
            }
            match self.queue.sweep_expired().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "swept expired terminal jobs"),
                Err(err) => error!(event = "error", error = %err, "retention sweep failed"),
            }
        }
        Ok(())
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The worker pool end to end: claim loops drain the queue, settle
//! deliveries, and shut down gracefully.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::common::Harness;
use dproc::infrastructure::runtime::{WorkerPool, WorkerPoolConfig};
use dproc_bootstrap::shutdown::ShutdownCoordinator;
use dproc_domain::{ExecutionFilter, ExecutionStatus};

fn fast_config(concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency,
        poll_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(100),
        maintenance_interval: Duration::from_millis(100),
        drain_grace: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_pool_drains_queue_and_shuts_down() {
    let harness = Harness::new().await;

    let mut receipts = Vec::new();
    for n in 0..3 {
        let receipt = harness
            .ctx
            .submitter
            .submit(harness.request(json!({"topic": format!("pool-{}", n)}), "html"))
            .await
            .unwrap();
        receipts.push(receipt);
    }

    let pool = Arc::new(WorkerPool::new(
        harness.ctx.queue.clone(),
        harness.ctx.executor.clone(),
        harness.ctx.cancellations.clone(),
        fast_config(2),
    ));
    let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));
    let pool_task = tokio::spawn(pool.run(coordinator.handle()));

    // Wait until every submitted job reached a terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let completed = harness
            .ctx
            .store
            .list(ExecutionFilter {
                status: Some(ExecutionStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        if completed.len() == receipts.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "pool did not drain in time");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for receipt in &receipts {
        let record = harness
            .ctx
            .store
            .get(&receipt.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.output_path.is_some());
    }
    assert_eq!(harness.ctx.queue.pending_len().await.unwrap(), 0);

    coordinator.initiate();
    pool_task.await.unwrap().unwrap();
}

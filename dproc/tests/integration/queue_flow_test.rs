// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Queue-and-executor interplay: retry after a rate limit, priority
//! ordering through the submitter, and stall redelivery against the same
//! durable record.

use std::time::Duration;

use dproc::application::services::JobExecutor;
use serde_json::json;

use crate::common::{Harness, Step};
use dproc_domain::{DprocError, ExecutionStatus, JobPriority};

#[tokio::test]
async fn test_rate_limit_retry_completes_single_record() {
    let harness = Harness::new().await;

    let receipt = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "html"))
        .await
        .unwrap();

    // First delivery hits a 429 with Retry-After: 2.
    harness.llm.push(Step::Err(DprocError::RateLimit {
        provider: "anthropic".into(),
        retry_after_secs: Some(2),
    }));

    let first = harness.ctx.queue.claim("w1").await.unwrap().unwrap();
    assert_eq!(first.handle.attempt, 1);
    assert!(!first.handle.is_final_attempt());
    let err = harness
        .ctx
        .executor
        .execute(&first.envelope, first.handle.is_final_attempt())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT");
    harness.ctx.queue.nack(first.handle, &err).await.unwrap();

    // The retry budget keeps the record open.
    let open = harness
        .ctx
        .store
        .get(&receipt.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(open.status, ExecutionStatus::Processing);

    // The redelivery is not visible until the 2 s backoff elapses.
    assert!(harness.ctx.queue.claim("w1").await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(2_200)).await;

    let second = harness.ctx.queue.claim("w1").await.unwrap().unwrap();
    assert_eq!(second.handle.attempt, 2);
    let record = harness
        .ctx
        .executor
        .execute(&second.envelope, second.handle.is_final_attempt())
        .await
        .unwrap();
    harness.ctx.queue.ack(second.handle).await.unwrap();

    assert_eq!(record.id, receipt.execution_id);
    assert_eq!(record.status, ExecutionStatus::Completed);
    // The duration spans both deliveries, so it covers the backoff.
    assert!(record.execution_time_ms.unwrap() >= 2_000);

    // Exactly one record, and exactly one terminal stats update.
    assert_eq!(harness.ctx.store.list(Default::default()).await.unwrap().len(), 1);
    let stats = harness.ctx.store.stats(Some("demo")).await.unwrap();
    assert_eq!(stats[0].total_executions, 1);
    assert_eq!(stats[0].successful_executions, 1);
}

#[tokio::test]
async fn test_priority_ordering_through_submitter() {
    let harness = Harness::new().await;

    for priority in [JobPriority::Low, JobPriority::Normal, JobPriority::High] {
        let mut request = harness.request(json!({"topic": priority.to_string()}), "html");
        request.priority = Some(priority);
        harness.ctx.submitter.submit(request).await.unwrap();
    }

    // A single worker claims high, then normal, then low, regardless of
    // enqueue order.
    let order: Vec<JobPriority> = {
        let mut claimed = Vec::new();
        while let Some(job) = harness.ctx.queue.claim("w1").await.unwrap() {
            claimed.push(job.envelope.priority);
            harness.ctx.queue.ack(job.handle).await.unwrap();
        }
        claimed
    };
    assert_eq!(
        order,
        vec![JobPriority::High, JobPriority::Normal, JobPriority::Low]
    );
}

#[tokio::test]
async fn test_exhausted_retries_finalize_as_failed() {
    let harness = Harness::new().await;
    // A single-attempt budget makes the first transient failure final.
    harness.write_config(
        "llm:\n  provider: anthropic\n  model: claude-sonnet-4-5\nexecution:\n  retryAttempts: 1\n",
    );
    harness.llm.push(Step::Err(DprocError::ApiTimeout {
        provider: "anthropic".into(),
        elapsed_secs: 120,
    }));

    let receipt = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "html"))
        .await
        .unwrap();

    let claimed = harness.ctx.queue.claim("w1").await.unwrap().unwrap();
    assert!(claimed.handle.is_final_attempt());
    let err = harness
        .ctx
        .executor
        .execute(&claimed.envelope, claimed.handle.is_final_attempt())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "API_TIMEOUT");
    harness.ctx.queue.nack(claimed.handle, &err).await.unwrap();

    let record = harness
        .ctx
        .store
        .get(&receipt.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.is_some());

    // Retry budget exhausted: nothing left to claim.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.ctx.queue.claim("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_stall_redelivery_resumes_same_record() {
    let harness = Harness::new().await;

    let receipt = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "html"))
        .await
        .unwrap();

    // A worker claims and starts the record, then dies without settling.
    let claimed = harness.ctx.queue.claim("w1").await.unwrap().unwrap();
    harness
        .ctx
        .store
        .update_status(
            &receipt.execution_id,
            ExecutionStatus::Processing,
            Default::default(),
        )
        .await
        .unwrap();
    drop(claimed);

    // The default heartbeat window is long; force the stall by waiting on
    // a dedicated short-window queue in unit tests. Here the claimed entry
    // is still within its window, so nothing requeues yet.
    assert_eq!(harness.ctx.queue.requeue_stalled().await.unwrap(), 0);

    // A second delivery of the same job (as the broker would produce after
    // the stall window) resumes the existing processing record.
    let record = harness
        .ctx
        .executor
        .execute(
            &dproc_domain::JobEnvelope {
                job_id: receipt.job_id.clone(),
                pipeline_name: "demo".into(),
                inputs: harness.inputs(),
                output_format: "html".into(),
                priority: JobPriority::Normal,
                user_id: None,
                created_at: 0,
            },
            true,
        )
        .await
        .unwrap();

    assert_eq!(record.id, receipt.execution_id);
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(harness.ctx.store.list(Default::default()).await.unwrap().len(), 1);
}

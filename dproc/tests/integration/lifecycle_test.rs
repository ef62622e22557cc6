// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Submission and cancellation lifecycle: rejected submissions leave no
//! trace, accepted ones follow the status DAG, and cancellation is
//! idempotent at every point of the lifecycle.

use serde_json::json;

use crate::common::Harness;
use dproc_domain::{ExecutionStatus, JobPriority};

#[tokio::test]
async fn test_submit_inserts_queued_record_and_enqueues() {
    let harness = Harness::new().await;

    let receipt = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "html"))
        .await
        .unwrap();

    assert!(receipt.job_id.as_str().starts_with("web-"));
    assert!(receipt.execution_id.as_str().starts_with("exec-"));

    let record = harness
        .ctx
        .store
        .get(&receipt.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Queued);
    assert!(record.started_at.is_none());
    assert_eq!(record.priority, JobPriority::Normal);

    assert_eq!(harness.ctx.queue.pending_len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_submission_leaves_no_trace() {
    let harness = Harness::new().await;

    let err = harness
        .ctx
        .submitter
        .submit(harness.request(json!({}), "html"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INPUT_REQUIRED");
    assert_eq!(err.user_message(), "Topic is required");
    assert!(!err.fixes().is_empty());

    assert!(harness.ctx.store.list(Default::default()).await.unwrap().is_empty());
    assert_eq!(harness.ctx.queue.pending_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_output_format_rejected() {
    let harness = Harness::new().await;
    let err = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "docx"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_pipeline_rejected() {
    let harness = Harness::new().await;
    let mut request = harness.request(harness.inputs(), "html");
    request.pipeline_name = "ghost".to_string();
    let err = harness.ctx.submitter.submit(request).await.unwrap_err();
    assert_eq!(err.code(), "PIPELINE_NOT_FOUND");
}

#[tokio::test]
async fn test_pre_start_cancellation() {
    let harness = Harness::new().await;
    let receipt = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "html"))
        .await
        .unwrap();

    harness.ctx.submitter.cancel(&receipt.execution_id).await.unwrap();

    let record = harness
        .ctx
        .store
        .get(&receipt.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.error.as_deref(), Some("Job cancelled by user"));
    assert!(record.completed_at.is_some());
    assert!(record.started_at.is_none());

    // The queued job is gone; no worker can claim it.
    assert_eq!(harness.ctx.queue.pending_len().await.unwrap(), 0);
    assert!(harness.ctx.queue.claim("w1").await.unwrap().is_none());

    // Repeat cancellation of a terminal record stays a success and does
    // not rewrite anything.
    harness.ctx.submitter.cancel(&receipt.execution_id).await.unwrap();
    let unchanged = harness
        .ctx
        .store
        .get(&receipt.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.completed_at, record.completed_at);
}

#[tokio::test]
async fn test_cancel_unknown_execution_is_not_found() {
    let harness = Harness::new().await;
    let err = harness
        .ctx
        .submitter
        .cancel(&dproc_domain::ExecutionId::from_string("exec-0-ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_stats_aggregate_over_lifecycle() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;

    // Two completed runs and one pre-start cancellation.
    for n in 0..2 {
        let receipt = harness
            .ctx
            .submitter
            .submit(harness.request(json!({"topic": format!("run-{}", n)}), "html"))
            .await
            .unwrap();
        let claimed = harness.ctx.queue.claim("w1").await.unwrap().unwrap();
        harness.ctx.executor.execute(&claimed.envelope, claimed.handle.is_final_attempt()).await.unwrap();
        harness.ctx.queue.ack(claimed.handle).await.unwrap();
        let record = harness
            .ctx
            .store
            .get(&receipt.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
    }
    let receipt = harness
        .ctx
        .submitter
        .submit(harness.request(harness.inputs(), "html"))
        .await
        .unwrap();
    harness.ctx.submitter.cancel(&receipt.execution_id).await.unwrap();

    let stats = harness.ctx.store.stats(Some("demo")).await.unwrap();
    assert_eq!(stats.len(), 1);
    let stats = &stats[0];
    assert_eq!(stats.total_executions, 3);
    assert_eq!(stats.successful_executions, 2);
    assert_eq!(stats.failed_executions, 0);
    assert_eq!(stats.total_tokens_used, 300);
    // Only the two timed runs feed the mean.
    assert_eq!(stats.timed_executions, 2);
    assert!(stats.avg_execution_time_ms >= 0.0);
}

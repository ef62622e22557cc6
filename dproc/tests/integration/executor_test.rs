// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end executor scenarios against the in-process harness: happy
//! path, input coercion, cancellation mid-stage, fallback, redelivery
//! idempotency, and the pipeline-wide timeout.

use std::time::Duration;

use serde_json::json;

use crate::common::{Harness, Step};
use dproc_domain::{DprocError, ExecutionStatus, JobEnvelope, JobId, JobPriority, LlmProviderKind};

fn envelope(inputs: serde_json::Value, format: &str, n: i64) -> JobEnvelope {
    JobEnvelope {
        job_id: JobId::generate("web", n),
        pipeline_name: "demo".to_string(),
        inputs,
        output_format: format.to_string(),
        priority: JobPriority::Normal,
        user_id: None,
        created_at: n,
    }
}

#[tokio::test]
async fn test_happy_path_html() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;

    let record = harness
        .ctx
        .executor
        .execute(&envelope(harness.inputs(), "html", 1), true)
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.execution_time_ms.unwrap() >= 0);
    assert_eq!(record.tokens_used, Some(150));

    // The scaffold ships an html template, so both paths point at the
    // requested-format artifact.
    let output_path = record.output_path.clone().unwrap();
    assert!(output_path.ends_with(&format!("{}.html", record.id)));
    assert_eq!(record.user_output_path, Some(output_path.clone()));
    assert!(std::path::Path::new(&output_path).exists());

    // The canonical mdx artifact exists alongside it.
    let mdx_path = output_path.replace(".html", ".mdx");
    assert!(std::path::Path::new(&mdx_path).exists());

    // The bundle carries the processor's attributes.
    let bundle_path = record.bundle_path.unwrap();
    assert!(bundle_path.ends_with(&format!("{}.json", record.id)));
    let bundle: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&bundle_path).unwrap()).unwrap();
    assert_eq!(bundle["topic"], json!("AI"));
}

#[tokio::test]
async fn test_requested_format_without_template_falls_back_to_mdx() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;
    // pdf is declared nowhere in the scaffold's templates.
    harness.write_spec(
        "pipeline:\n  name: demo\ninputs:\n  - name: topic\n    type: text\n    label: Topic\n    required: true\noutputs: [mdx, pdf]\n",
    );

    let record = harness
        .ctx
        .executor
        .execute(&envelope(harness.inputs(), "pdf", 2), true)
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let output_path = record.output_path.unwrap();
    assert!(output_path.ends_with(&format!("{}.mdx", record.id)));
    assert_eq!(record.user_output_path, None);
}

#[tokio::test]
async fn test_number_coercion_reaches_processor() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;
    harness.write_spec(
        "pipeline:\n  name: demo\ninputs:\n  - name: topic\n    type: text\n    label: Topic\n    required: true\n  - name: maxResults\n    type: number\n    label: Max Results\noutputs: [mdx, html]\n",
    );

    let record = harness
        .ctx
        .executor
        .execute(&envelope(json!({"topic": "AI", "maxResults": "50"}), "mdx", 3), true)
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    // The echo processor copied the normalized inputs into the bundle:
    // numeric 50, not the string "50".
    let bundle: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(record.bundle_path.unwrap()).unwrap())
            .unwrap();
    assert_eq!(bundle["maxResults"], json!(50.0));
}

#[tokio::test]
async fn test_validation_failure_marks_record_failed() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;

    let err = harness
        .ctx
        .executor
        .execute(&envelope(json!({}), "mdx", 4), true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INPUT_REQUIRED");

    // The executor had already inserted the record, so the failure is
    // durable with the user-facing message.
    let records = harness
        .ctx
        .store
        .list(Default::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[0].error.as_deref(), Some("Topic is required"));
}

#[tokio::test]
async fn test_cancellation_during_llm_stage() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;
    harness.llm.set_delay(Duration::from_secs(30));

    let envelope = envelope(harness.inputs(), "html", 5);
    let executor = harness.ctx.executor.clone();
    let run = {
        let envelope = envelope.clone();
        tokio::spawn(async move { executor.execute(&envelope, true).await })
    };

    // Wait until the record is processing, then cancel through the
    // submitter path.
    let execution_id = loop {
        if let Some(record) = harness
            .ctx
            .store
            .find_by_job_id(&envelope.job_id)
            .await
            .unwrap()
        {
            if record.status == ExecutionStatus::Processing {
                break record.id;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.ctx.submitter.cancel(&execution_id).await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert!(err.is_cancellation());

    let record = harness.ctx.store.get(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.error.as_deref(), Some("Job cancelled by user"));
    assert!(record.completed_at.is_some());
    assert!(record.output_path.is_none());

    // Cancellation is idempotent after the terminal write.
    harness.ctx.submitter.cancel(&execution_id).await.unwrap();
    let unchanged = harness.ctx.store.get(&execution_id).await.unwrap().unwrap();
    assert_eq!(unchanged.completed_at, record.completed_at);
}

#[tokio::test]
async fn test_fallback_provider_used_once() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;
    harness.write_config(
        "llm:\n  provider: anthropic\n  model: claude-sonnet-4-5\n  fallback:\n    provider: google\n    model: gemini-2.0-flash\n",
    );
    harness.llm.push(Step::Err(DprocError::ApiResponseError {
        provider: "anthropic".into(),
        status: 503,
        detail: "overloaded".into(),
    }));
    harness.llm.push(Step::Ok("Fallback wrote this. {\"summary\": \"fb\"}"));

    let record = harness
        .ctx
        .executor
        .execute(&envelope(harness.inputs(), "mdx", 6), true)
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(
        harness.llm.calls(),
        vec![LlmProviderKind::Anthropic, LlmProviderKind::Google]
    );
    let llm_meta = record.llm_metadata.unwrap();
    assert_eq!(llm_meta["provider"], json!("google"));
}

#[tokio::test]
async fn test_auth_failure_skips_fallback() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;
    harness.write_config(
        "llm:\n  provider: anthropic\n  model: claude-sonnet-4-5\n  fallback:\n    provider: google\n    model: gemini-2.0-flash\n",
    );
    harness.llm.push(Step::Err(DprocError::ApiKeyInvalid {
        provider: "anthropic".into(),
    }));

    let err = harness
        .ctx
        .executor
        .execute(&envelope(harness.inputs(), "mdx", 7), true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "API_KEY_INVALID");
    assert_eq!(harness.llm.calls(), vec![LlmProviderKind::Anthropic]);
}

#[tokio::test]
async fn test_redelivery_of_finished_job_is_noop() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;

    let envelope = envelope(harness.inputs(), "mdx", 8);
    let first = harness.ctx.executor.execute(&envelope, true).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);

    // Same envelope again, as after a stall redelivery.
    let second = harness.ctx.executor.execute(&envelope, true).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.completed_at, first.completed_at);

    let records = harness.ctx.store.list(Default::default()).await.unwrap();
    assert_eq!(records.len(), 1);

    // The terminal transition updated the stats exactly once.
    let stats = harness.ctx.store.stats(Some("demo")).await.unwrap();
    assert_eq!(stats[0].total_executions, 1);
}

#[tokio::test]
async fn test_pipeline_timeout() {
    use dproc::application::services::JobExecutor;
    let harness = Harness::new().await;
    harness.write_config(
        "llm:\n  provider: anthropic\n  model: claude-sonnet-4-5\nexecution:\n  timeoutMinutes: 1\n",
    );
    // Provider slower than the 1-minute budget; the paused clock advances
    // straight to the earliest timer, so the timeout fires first.
    harness.llm.set_delay(Duration::from_secs(120));

    let envelope = envelope(harness.inputs(), "mdx", 9);
    tokio::time::pause();
    let err = harness.ctx.executor.execute(&envelope, true).await.unwrap_err();
    tokio::time::resume();
    assert_eq!(err.code(), "EXECUTION_TIMEOUT");

    let record = harness
        .ctx
        .store
        .find_by_job_id(&envelope.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.unwrap().contains("time limit"));
}

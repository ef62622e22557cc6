// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Job Submitter
//!
//! The public entry point of the core. `submit` validates first and only
//! then touches durable state, so a rejected request leaves no record and
//! no queue entry. `cancel` implements the cancellation protocol between
//! submitter, queue, executor, and store.
//!
//! Submission order matters: the record is inserted `queued` before the
//! envelope is enqueued, so a worker can never claim a job whose record
//! does not exist yet. If the enqueue itself fails, the record is moved to
//! `failed` rather than left dangling.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use dproc_domain::{
    DprocError, EnqueueOptions, ExecutionId, ExecutionRecord, ExecutionRepository, ExecutionStatus,
    JobEnvelope, JobId, JobPriority, JobQueue, RetryPolicy, StatusPatch,
};

use crate::infrastructure::config::{SecretsStore, Settings};
use crate::infrastructure::loader::PipelineLoader;

use super::cancellation::CancellationRegistry;
use super::validator::PreflightValidator;

/// A submission request, as the HTTP and CLI surfaces hand it over.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub pipeline_name: String,
    pub inputs: Value,
    pub output_format: String,
    pub priority: Option<JobPriority>,
    pub user_id: Option<String>,
    /// Which surface submitted (`web`, `cli`); becomes the job-id prefix.
    pub source: String,
}

/// What a successful submission returns.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
}

/// The public submit/cancel service (C8).
pub struct JobSubmitter {
    store: Arc<dyn ExecutionRepository>,
    queue: Arc<dyn JobQueue>,
    loader: Arc<PipelineLoader>,
    secrets: Arc<SecretsStore>,
    settings: Arc<Settings>,
    cancellations: Arc<CancellationRegistry>,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<dyn ExecutionRepository>,
        queue: Arc<dyn JobQueue>,
        loader: Arc<PipelineLoader>,
        secrets: Arc<SecretsStore>,
        settings: Arc<Settings>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            store,
            queue,
            loader,
            secrets,
            settings,
            cancellations,
        }
    }

    /// Validates, records, and enqueues one job.
    pub async fn submit(&self, request: JobRequest) -> Result<SubmitReceipt, DprocError> {
        let spec = self.loader.load_spec(&request.pipeline_name)?;
        let config = self.loader.load_config(&request.pipeline_name)?;

        // The requested format must be something the pipeline can produce;
        // mdx is always producible because it is the canonical artifact.
        if request.output_format != "mdx" && !spec.outputs.iter().any(|o| o == &request.output_format) {
            return Err(DprocError::ValidationError {
                field: "outputFormat".to_string(),
                issue: format!(
                    "'{}' is not one of {}",
                    request.output_format,
                    spec.outputs.join(", ")
                ),
            });
        }

        let output_dir = self.settings.output_dir(&request.pipeline_name);
        let normalized = PreflightValidator::new(&spec, &config, &self.secrets, &output_dir)
            .validate(&request.inputs)
            .throw_if_invalid(&request.pipeline_name)?;

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let job_id = JobId::generate(&request.source, now_ms);
        let execution_id = ExecutionId::for_job(&job_id, now_ms);
        let priority = request.priority.unwrap_or(config.execution.queue_priority);

        let mut inputs_json = serde_json::Map::new();
        for (name, value) in &normalized {
            inputs_json.insert(name.clone(), value.to_json());
        }
        let inputs_json = Value::Object(inputs_json);

        let record = ExecutionRecord::new_queued(
            execution_id.clone(),
            job_id.clone(),
            request.pipeline_name.clone(),
            request.user_id.clone(),
            inputs_json.clone(),
            request.output_format.clone(),
            priority,
            now,
        );
        self.store.insert(&record).await?;

        let envelope = JobEnvelope {
            job_id: job_id.clone(),
            pipeline_name: request.pipeline_name.clone(),
            inputs: inputs_json,
            output_format: request.output_format.clone(),
            priority,
            user_id: request.user_id,
            created_at: now_ms,
        };
        let options = EnqueueOptions {
            priority,
            retry: RetryPolicy {
                max_attempts: config.execution.retry_attempts.max(1),
                ..RetryPolicy::default()
            },
        };

        if let Err(err) = self.queue.enqueue(envelope, options).await {
            warn!(job_id = %job_id, error = %err, "enqueue failed after insert, failing the record");
            let _ = self
                .store
                .update_status(
                    &execution_id,
                    ExecutionStatus::Processing,
                    StatusPatch::default(),
                )
                .await;
            let _ = self
                .store
                .update_status(
                    &execution_id,
                    ExecutionStatus::Failed,
                    StatusPatch::with_error(err.user_message()),
                )
                .await;
            return Err(err);
        }

        info!(
            execution_id = %execution_id,
            job_id = %job_id,
            pipeline = %request.pipeline_name,
            %priority,
            "job submitted"
        );
        Ok(SubmitReceipt { execution_id, job_id })
    }

    /// Cancels an execution. Idempotent: cancelling a finished (or already
    /// cancelled) execution is a no-op success.
    pub async fn cancel(&self, execution_id: &ExecutionId) -> Result<(), DprocError> {
        let record = self
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| DprocError::NotFound {
                id: execution_id.to_string(),
            })?;

        match record.status {
            ExecutionStatus::Queued => {
                let removed = self.queue.remove(&record.job_id).await.unwrap_or(false);
                match self
                    .store
                    .update_status(
                        execution_id,
                        ExecutionStatus::Cancelled,
                        StatusPatch::with_error("Job cancelled by user"),
                    )
                    .await
                {
                    Ok(_) => {
                        info!(execution_id = %execution_id, removed_from_queue = removed, "queued job cancelled");
                        Ok(())
                    }
                    // Raced into processing between the read and the write;
                    // fall through to the token path.
                    Err(DprocError::IllegalTransition { .. }) => {
                        self.cancellations.cancel(execution_id);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            ExecutionStatus::Processing => {
                let signalled = self.cancellations.cancel(execution_id);
                info!(execution_id = %execution_id, signalled, "cancellation requested");
                // Cooperative: the executor writes the terminal record at
                // its next checkpoint.
                Ok(())
            }
            // Already terminal.
            _ => Ok(()),
        }
    }
}

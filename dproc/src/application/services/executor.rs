// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Staged Executor
//!
//! Executes one [`JobEnvelope`] end to end. This is the only component that
//! touches every other one: it loads through the pipeline loader, validates
//! through the pre-flight validator, runs the processor, renders prompts,
//! calls the LLM provider, composes the template context, renders outputs,
//! and writes every status transition to the execution store.
//!
//! ## Stages
//!
//! 1. Load configuration (`spec.yml`, `config.yml`, processor)
//! 2. Pre-execution validation; the normalized inputs replace the
//!    envelope's inputs for the remainder of the run
//! 3. Data processor → attributes bundle, persisted as
//!    `output/bundles/{executionId}.json`
//! 4. Prompt rendering over `{inputs, vars, data}`
//! 5. LLM enrichment with the primary prompt (the one named `main`, else
//!    the first), one fallback retry for non-auth, non-cancellation errors
//! 6. Template context composition
//! 7. Output rendering: the `mdx` template always; the requested format's
//!    template when one exists
//! 8. Persist artifacts and finalize the record
//!
//! Every stage boundary is a cancellation checkpoint, and the two
//! long-running calls (processor, provider) race the token directly.
//!
//! ## Failure semantics
//!
//! Cancellation observed anywhere transitions the record to `cancelled`
//! and re-raises. A transient error on a delivery with retry budget left
//! re-raises without touching the record (the queue's redelivery resumes
//! it); any other taxonomy error transitions the record to `failed` with
//! the user-facing message and re-raises for the queue adapter. Retries
//! are queue-level; this executor is a single-shot function over a single
//! envelope.
//!
//! ## Startup idempotency
//!
//! Delivery is at-least-once, so the executor first looks its job up by
//! `job_id`. A redelivered job reuses the existing record; a job whose
//! record is already terminal is a no-op success, which settles the
//! duplicate delivery without re-running anything.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use dproc_domain::{
    DprocError, ExecutionId, ExecutionRecord, ExecutionRepository, ExecutionStatus, InputValue,
    JobEnvelope, LlmOutcome, LlmProvider, LlmProviderKind, LlmRequest, ProcessorResult,
    StatusPatch, TemplateRenderer,
};

use crate::infrastructure::config::{SecretsStore, Settings};
use crate::infrastructure::loader::{LoadedPipeline, PipelineLoader, PromptSource};
use crate::infrastructure::processors::{FsProcessorContext, ProcessorCache};
use crate::infrastructure::templating::resolve_template;

use super::cancellation::{CancellationRegistry, ExecutionToken};

/// Indirection over provider construction so tests can inject scripted
/// providers instead of HTTP adapters.
pub trait ProviderFactory: Send + Sync {
    fn create(
        &self,
        kind: LlmProviderKind,
        api_key: String,
    ) -> Result<Arc<dyn LlmProvider>, DprocError>;
}

/// Production factory backed by the HTTP adapters.
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn create(
        &self,
        kind: LlmProviderKind,
        api_key: String,
    ) -> Result<Arc<dyn LlmProvider>, DprocError> {
        crate::infrastructure::llm::create_provider(kind, api_key)
    }
}

/// The port the worker pool drives.
///
/// `final_attempt` tells the executor whether the queue still has retry
/// budget for this delivery: a transient failure on a non-final attempt
/// leaves the record in `processing` (the redelivery resumes it), while a
/// final or non-transient failure writes the terminal `failed` record.
/// This keeps the status sequence a path in the DAG even across queue
/// retries.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        envelope: &JobEnvelope,
        final_attempt: bool,
    ) -> Result<ExecutionRecord, DprocError>;
}

/// The staged executor (C6).
pub struct StagedExecutor {
    store: Arc<dyn ExecutionRepository>,
    loader: Arc<PipelineLoader>,
    secrets: Arc<SecretsStore>,
    settings: Arc<Settings>,
    renderer: Arc<dyn TemplateRenderer>,
    providers: Arc<dyn ProviderFactory>,
    cache: Arc<ProcessorCache>,
    cancellations: Arc<CancellationRegistry>,
}

impl StagedExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ExecutionRepository>,
        loader: Arc<PipelineLoader>,
        secrets: Arc<SecretsStore>,
        settings: Arc<Settings>,
        renderer: Arc<dyn TemplateRenderer>,
        providers: Arc<dyn ProviderFactory>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            store,
            loader,
            secrets,
            settings,
            renderer,
            providers,
            cache: Arc::new(ProcessorCache::new()),
            cancellations,
        }
    }

    /// Startup idempotency: reuse the record a prior delivery created, or
    /// insert a fresh one already in `processing`.
    async fn prepare_record(&self, envelope: &JobEnvelope) -> Result<ExecutionRecord, DprocError> {
        if let Some(existing) = self.store.find_by_job_id(&envelope.job_id).await? {
            return match existing.status {
                ExecutionStatus::Queued => {
                    self.store
                        .update_status(&existing.id, ExecutionStatus::Processing, StatusPatch::default())
                        .await
                }
                // Stall redelivery: the record is already processing under
                // this id; keep it and run again.
                ExecutionStatus::Processing => {
                    warn!(execution_id = %existing.id, "redelivered while processing, resuming");
                    Ok(existing)
                }
                // Terminal: the earlier delivery finished; settle quietly.
                _ => Ok(existing),
            };
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let mut record = ExecutionRecord::new_queued(
            ExecutionId::for_job(&envelope.job_id, now_ms),
            envelope.job_id.clone(),
            envelope.pipeline_name.clone(),
            envelope.user_id.clone(),
            envelope.inputs.clone(),
            envelope.output_format.clone(),
            envelope.priority,
            now,
        );
        record.apply(ExecutionStatus::Processing, StatusPatch::default(), now)?;
        self.store.insert(&record).await?;
        Ok(record)
    }

    fn checkpoint(execution_id: &ExecutionId, token: &ExecutionToken) -> Result<(), DprocError> {
        if token.is_cancelled() {
            return Err(DprocError::Cancelled {
                execution_id: execution_id.to_string(),
            });
        }
        Ok(())
    }

    async fn run_stages(
        &self,
        record: &ExecutionRecord,
        envelope: &JobEnvelope,
        token: &ExecutionToken,
    ) -> Result<StatusPatch, DprocError> {
        let execution_id = &record.id;

        // Stage 1: load configuration.
        Self::checkpoint(execution_id, token)?;
        debug!(execution_id = %execution_id, stage = "load", "loading pipeline");
        let pipeline = self.loader.load(&envelope.pipeline_name)?;

        let budget = Duration::from_secs(pipeline.config.execution.timeout_minutes * 60);
        let staged = self.run_inner(record, envelope, &pipeline, token);
        match tokio::time::timeout(budget, staged).await {
            Ok(result) => result,
            Err(_) => Err(DprocError::ExecutionTimeout {
                execution_id: execution_id.to_string(),
                limit_secs: budget.as_secs(),
            }),
        }
    }

    async fn run_inner(
        &self,
        record: &ExecutionRecord,
        envelope: &JobEnvelope,
        pipeline: &LoadedPipeline,
        token: &ExecutionToken,
    ) -> Result<StatusPatch, DprocError> {
        let execution_id = &record.id;

        // Stage 2: pre-execution validation. The normalized inputs replace
        // the envelope's for everything downstream.
        Self::checkpoint(execution_id, token)?;
        debug!(execution_id = %execution_id, stage = "validate", "normalizing inputs");
        let output_dir = self.settings.output_dir(&pipeline.name);
        let inputs = crate::application::services::validator::PreflightValidator::new(
            &pipeline.spec,
            &pipeline.config,
            &self.secrets,
            &output_dir,
        )
        .validate(&envelope.inputs)
        .throw_if_invalid(&pipeline.name)?;

        // Stage 3: data processor.
        Self::checkpoint(execution_id, token)?;
        debug!(execution_id = %execution_id, stage = "data-processor", processor = pipeline.processor.name(), "running processor");
        let processor_result = self
            .run_processor(execution_id, pipeline, &inputs, token)
            .await?;
        let bundle_path = self
            .persist_bundle(execution_id, pipeline, &processor_result)
            .await?;

        // Stage 4: prompt rendering.
        Self::checkpoint(execution_id, token)?;
        debug!(execution_id = %execution_id, stage = "prompts", "rendering prompts");
        let vars = merged_vars(pipeline);
        let inputs_json = inputs_to_json(&inputs);
        let prompt_context = json!({
            "inputs": inputs_json.clone(),
            "vars": vars.clone(),
            "data": Value::Object(processor_result.attributes.clone()),
        });
        let prompts = self.loader.load_prompts(&pipeline.name)?;
        let rendered_prompts = self.render_prompts(&prompts, &prompt_context)?;

        // Stage 5: LLM enrichment.
        Self::checkpoint(execution_id, token)?;
        let llm = match primary_prompt(&rendered_prompts) {
            Some(prompt) => {
                debug!(execution_id = %execution_id, stage = "llm", provider = %pipeline.config.llm.provider, "calling provider");
                Some(self.enrich(execution_id, pipeline, prompt, token).await?)
            }
            None => {
                debug!(execution_id = %execution_id, stage = "llm", "no prompts, skipping enrichment");
                None
            }
        };

        // Stage 6: compose the template context.
        Self::checkpoint(execution_id, token)?;
        let context = compose_template_context(
            record,
            pipeline,
            &inputs_json,
            &vars,
            &processor_result,
            llm.as_ref(),
        );

        // Stage 7 + 8: render outputs and persist.
        Self::checkpoint(execution_id, token)?;
        debug!(execution_id = %execution_id, stage = "render", format = %envelope.output_format, "rendering outputs");
        let (output_path, user_output_path) = self
            .render_outputs(execution_id, pipeline, &envelope.output_format, &context)
            .await?;

        let tokens_used = llm.as_ref().map(|outcome| outcome.usage.total_tokens);
        Ok(StatusPatch {
            output_path: Some(output_path),
            user_output_path,
            bundle_path: Some(bundle_path),
            processor_metadata: Some(processor_result.metadata.clone()),
            llm_metadata: llm.as_ref().map(llm_metadata),
            tokens_used,
            ..Default::default()
        })
    }

    async fn run_processor(
        &self,
        execution_id: &ExecutionId,
        pipeline: &LoadedPipeline,
        inputs: &BTreeMap<String, InputValue>,
        token: &ExecutionToken,
    ) -> Result<ProcessorResult, DprocError> {
        let ctx = FsProcessorContext::new(
            execution_id.clone(),
            pipeline.name.clone(),
            pipeline.root.clone(),
            pipeline.data_dir.clone(),
            self.settings.bundles_dir(&pipeline.name),
            self.cache.clone(),
            token.flag(),
        );

        let result = tokio::select! {
            _ = token.cancelled() => {
                return Err(DprocError::Cancelled { execution_id: execution_id.to_string() });
            }
            result = pipeline.processor.run(inputs, &ctx) => result?,
        };
        result.check_shape()?;
        Ok(result)
    }

    /// Persists the attributes as the execution's JSON bundle.
    async fn persist_bundle(
        &self,
        execution_id: &ExecutionId,
        pipeline: &LoadedPipeline,
        result: &ProcessorResult,
    ) -> Result<String, DprocError> {
        let dir = self.settings.bundles_dir(&pipeline.name);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            DprocError::processing("data-processor", format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(format!("{}.json", execution_id));
        let body = serde_json::to_vec_pretty(&Value::Object(result.attributes.clone()))?;
        tokio::fs::write(&path, body).await.map_err(|e| {
            DprocError::processing("data-processor", format!("cannot write {}: {}", path.display(), e))
        })?;
        Ok(path.display().to_string())
    }

    fn render_prompts(
        &self,
        prompts: &[PromptSource],
        context: &Value,
    ) -> Result<Vec<(String, String)>, DprocError> {
        prompts
            .iter()
            .map(|prompt| {
                self.renderer
                    .render_str(&prompt.name, &prompt.source, context)
                    .map(|rendered| (prompt.name.clone(), rendered))
            })
            .collect()
    }

    /// Stage 5 with the fallback policy: one retry on the configured
    /// fallback provider unless the primary failure is an auth problem or
    /// a cancellation.
    async fn enrich(
        &self,
        execution_id: &ExecutionId,
        pipeline: &LoadedPipeline,
        prompt: &str,
        token: &ExecutionToken,
    ) -> Result<LlmOutcome, DprocError> {
        let llm = &pipeline.config.llm;
        let primary = self
            .call_provider(execution_id, llm.provider, &llm.model, llm, prompt, token)
            .await;

        let err = match primary {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };

        let auth_or_cancel = err.is_cancellation()
            || matches!(
                err,
                DprocError::ApiKeyMissing { .. } | DprocError::ApiKeyInvalid { .. }
            );
        let Some(fallback) = llm.fallback.as_ref().filter(|_| !auth_or_cancel) else {
            return Err(err);
        };
        warn!(
            execution_id = %execution_id,
            primary = %llm.provider,
            fallback = %fallback.provider,
            error = %err,
            "primary provider failed, trying fallback"
        );
        self.call_provider(execution_id, fallback.provider, &fallback.model, llm, prompt, token)
            .await
    }

    async fn call_provider(
        &self,
        execution_id: &ExecutionId,
        kind: LlmProviderKind,
        model: &str,
        llm: &dproc_domain::LlmConfig,
        prompt: &str,
        token: &ExecutionToken,
    ) -> Result<LlmOutcome, DprocError> {
        let api_key = self
            .secrets
            .api_key(kind)
            .ok_or_else(|| DprocError::ApiKeyMissing {
                provider: kind.to_string(),
            })?;
        let provider = self.providers.create(kind, api_key)?;
        let request = LlmRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            extract_json: true,
        };

        tokio::select! {
            _ = token.cancelled() => Err(DprocError::Cancelled {
                execution_id: execution_id.to_string(),
            }),
            result = provider.generate(&request) => result,
        }
    }

    /// Stage 7: the canonical `mdx` artifact always, the requested format
    /// when a template for it exists. Returns `(output_path,
    /// user_output_path)`.
    async fn render_outputs(
        &self,
        execution_id: &ExecutionId,
        pipeline: &LoadedPipeline,
        output_format: &str,
        context: &Value,
    ) -> Result<(String, Option<String>), DprocError> {
        let reports_dir = self.settings.reports_dir(&pipeline.name);
        tokio::fs::create_dir_all(&reports_dir).await.map_err(|e| {
            DprocError::OutputDirectoryError {
                path: reports_dir.clone(),
                detail: format!("cannot create reports directory: {}", e),
            }
        })?;

        let mdx_template = resolve_template(&pipeline.templates_dir, "mdx").ok_or_else(|| {
            DprocError::TemplateMissing {
                pipeline: pipeline.name.clone(),
                template: "report.mdx.j2".to_string(),
            }
        })?;
        let mdx_body = self.renderer.render_file(&mdx_template, context)?;
        let mdx_path = reports_dir.join(format!("{}.mdx", execution_id));
        tokio::fs::write(&mdx_path, &mdx_body).await.map_err(|e| {
            DprocError::processing("render", format!("cannot write {}: {}", mdx_path.display(), e))
        })?;

        if output_format == "mdx" {
            return Ok((mdx_path.display().to_string(), None));
        }

        // A missing template for the requested format is not an error; the
        // surrounding system converts MDX on demand.
        match resolve_template(&pipeline.templates_dir, output_format) {
            Some(template) => {
                let body = self.renderer.render_file(&template, context)?;
                let path = reports_dir.join(format!("{}.{}", execution_id, output_format));
                tokio::fs::write(&path, &body).await.map_err(|e| {
                    DprocError::processing("render", format!("cannot write {}: {}", path.display(), e))
                })?;
                let rendered = path.display().to_string();
                Ok((rendered.clone(), Some(rendered)))
            }
            None => Ok((mdx_path.display().to_string(), None)),
        }
    }
}

#[async_trait]
impl JobExecutor for StagedExecutor {
    async fn execute(
        &self,
        envelope: &JobEnvelope,
        final_attempt: bool,
    ) -> Result<ExecutionRecord, DprocError> {
        let record = self.prepare_record(envelope).await?;
        if record.status.is_terminal() {
            info!(execution_id = %record.id, status = %record.status, "duplicate delivery of a finished job");
            return Ok(record);
        }

        let execution_id = record.id.clone();
        let token = self.cancellations.register(&execution_id);
        let result = self.run_stages(&record, envelope, &token).await;
        self.cancellations.deregister(&execution_id);

        match result {
            Ok(patch) => {
                match self
                    .store
                    .update_status(&execution_id, ExecutionStatus::Completed, patch)
                    .await
                {
                    Ok(updated) => {
                        info!(
                            execution_id = %execution_id,
                            execution_time_ms = updated.execution_time_ms.unwrap_or_default(),
                            "execution completed"
                        );
                        Ok(updated)
                    }
                    // Terminal state already written (a racing cancel won);
                    // do not re-transition.
                    Err(DprocError::IllegalTransition { .. }) => {
                        let current = self.store.get(&execution_id).await?.ok_or_else(|| {
                            DprocError::NotFound {
                                id: execution_id.to_string(),
                            }
                        })?;
                        warn!(execution_id = %execution_id, status = %current.status, "completion lost the race to a terminal write");
                        Ok(current)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) if err.is_cancellation() => {
                info!(execution_id = %execution_id, "execution cancelled");
                let _ = self
                    .store
                    .update_status(
                        &execution_id,
                        ExecutionStatus::Cancelled,
                        StatusPatch::with_error("Job cancelled by user"),
                    )
                    .await;
                Err(err)
            }
            // Transient failure with retry budget left: the record stays
            // `processing` and the redelivery resumes it, so the status
            // sequence and the started_at timestamp span all attempts.
            Err(err) if err.is_retryable() && !final_attempt => {
                warn!(
                    execution_id = %execution_id,
                    code = err.code(),
                    error = %err,
                    "transient failure, leaving record open for the queue retry"
                );
                Err(err)
            }
            Err(err) => {
                warn!(execution_id = %execution_id, code = err.code(), error = %err, "execution failed");
                let _ = self
                    .store
                    .update_status(
                        &execution_id,
                        ExecutionStatus::Failed,
                        StatusPatch::with_error(err.user_message()),
                    )
                    .await;
                Err(err)
            }
        }
    }
}

/// Spec variables merged under config variables (config wins on clashes).
fn merged_vars(pipeline: &LoadedPipeline) -> Value {
    let mut vars = Map::new();
    for (key, value) in &pipeline.spec.variables {
        vars.insert(key.clone(), value.clone());
    }
    for (key, value) in &pipeline.config.variables {
        vars.insert(key.clone(), value.clone());
    }
    Value::Object(vars)
}

fn inputs_to_json(inputs: &BTreeMap<String, InputValue>) -> Value {
    let mut map = Map::new();
    for (name, value) in inputs {
        map.insert(name.clone(), value.to_json());
    }
    Value::Object(map)
}

/// The prompt named `main` when present, else the first.
fn primary_prompt(rendered: &[(String, String)]) -> Option<&str> {
    rendered
        .iter()
        .find(|(name, _)| name == "main")
        .or_else(|| rendered.first())
        .map(|(_, body)| body.as_str())
}

fn llm_metadata(outcome: &LlmOutcome) -> Value {
    json!({
        "model": outcome.model,
        "provider": outcome.provider,
        "usage": outcome.usage,
        "hasJson": outcome.json.is_some(),
    })
}

/// Stage 6: the merged `{inputs, vars, data, llm, metadata}` map fed to
/// every output template.
fn compose_template_context(
    record: &ExecutionRecord,
    pipeline: &LoadedPipeline,
    inputs_json: &Value,
    vars: &Value,
    processor_result: &ProcessorResult,
    llm: Option<&LlmOutcome>,
) -> Value {
    let running_ms = record
        .started_at
        .map(|started| (Utc::now() - started).num_milliseconds())
        .unwrap_or_default();
    json!({
        "inputs": inputs_json,
        "vars": vars,
        "data": Value::Object(processor_result.attributes.clone()),
        "llm": llm.map(|outcome| json!({
            "text": outcome.text,
            "json": outcome.json,
            "usage": outcome.usage,
        })),
        "metadata": {
            "executionTime": running_ms,
            "model": llm.map(|outcome| outcome.model.clone()),
            "timestamp": Utc::now().to_rfc3339(),
            "pipelineName": pipeline.name,
            "version": pipeline.spec.pipeline.version,
            "tokensUsed": llm.map(|outcome| outcome.usage.total_tokens),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_prompt_prefers_main() {
        let rendered = vec![
            ("analysis".to_string(), "a".to_string()),
            ("main".to_string(), "m".to_string()),
        ];
        assert_eq!(primary_prompt(&rendered), Some("m"));

        let no_main = vec![("zeta".to_string(), "z".to_string())];
        assert_eq!(primary_prompt(&no_main), Some("z"));
        assert_eq!(primary_prompt(&[]), None);
    }
}

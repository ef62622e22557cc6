// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the closed error taxonomy for the dproc execution
//! core. Every failure that can cross a component boundary (loader,
//! validator, queue, executor, store, provider adapters) is a variant of
//! [`DprocError`], and every variant knows how to render itself for humans
//! (CLI), for machines (HTTP transport), and for operators (logs).
//!
//! ## Overview
//!
//! The taxonomy is organized into logical groups:
//!
//! #### Pipeline Errors
//! - **PipelineNotFound**: No pipeline directory with the requested name
//! - **PipelineSpecMissing**: Pipeline exists but `spec.yml` is absent
//! - **ProcessorMissing**: Processor artifact absent or unregistered
//! - **TemplateMissing**: Required template absent from `templates/`
//! - **InvalidPipeline**: Structural violations in `spec.yml`/`config.yml`
//!
//! #### API / LLM Errors
//! - **ApiKeyMissing** / **ApiKeyInvalid**: Credential problems
//! - **RateLimit**: Provider returned 429, optionally with `Retry-After`
//! - **QuotaExceeded**: Provider returned a quota-style 403
//! - **ApiTimeout**: Wall-clock budget for the provider call expired
//! - **ApiResponseError**: Any other non-success provider response
//!
//! #### Validation Errors
//! - **ValidationError**: A single input failed validation
//! - **InputRequired**: A required input was absent or empty
//! - **InvalidInputType**: A value could not be coerced to its declared type
//! - **MultipleValidationErrors**: More than one input problem at once
//!
//! #### Execution Errors
//! - **ExecutionTimeout**: Pipeline-wide deadline expired
//! - **ProcessingError**: Unknown failure wrapped at a stage boundary
//! - **OutputDirectoryError**: Output root missing or not writable
//! - **TemplateRenderError**: Prompt or output template failed to render
//! - **WorkerUnavailable**: No worker could service the job
//! - **Cancelled**: User-initiated cancellation observed at a checkpoint
//!
//! #### Storage / Queue Errors
//! - **DuplicateId** / **NotFound** / **IllegalTransition**: Store contract
//! - **StorageError** / **QueueError** / **SerializationError**: Backend wrap
//!
//! ## Propagation Rules
//!
//! Taxonomy variants are never swallowed and never downgraded: once a
//! `DprocError` exists it surfaces unchanged through every layer. Unknown
//! errors are wrapped as `ProcessingError` at the stage boundary that
//! observed them, carrying the inner error text as `cause`.
//!
//! The store persists `user_message()` (short, presentable); the technical
//! `Display` rendering appears only in logs and, under a debug flag, in CLI
//! output.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity attached to each taxonomy variant and each validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "info"),
            ErrorSeverity::Warning => write!(f, "warning"),
            ErrorSeverity::Error => write!(f, "error"),
        }
    }
}

/// A single field-level validation problem.
///
/// Produced by the validator and carried by `MultipleValidationErrors` so
/// that surfaces can show the complete list rather than the first failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub issue: String,
    pub severity: ErrorSeverity,
}

impl FieldIssue {
    pub fn error(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
            severity: ErrorSeverity::Error,
        }
    }

    pub fn warning(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
            severity: ErrorSeverity::Warning,
        }
    }
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.issue)
    }
}

/// Domain-specific errors for the dproc execution core.
///
/// Each variant carries the context fields its constructors require, so a
/// variant cannot exist without the data needed to render a user-facing
/// message and remediation steps.
///
/// ## Design Principles
///
/// - **Specific**: Each variant represents one failure mode
/// - **Actionable**: `fixes()` suggests concrete remediation steps
/// - **Transportable**: `to_transport()` is the single wire serialization
///   used by both the HTTP and CLI surfaces
/// - **Recoverable**: `is_retryable()` drives the queue-level retry policy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DprocError {
    // -- Pipeline ------------------------------------------------------------
    #[error("pipeline not found: {name}")]
    PipelineNotFound { name: String },

    #[error("pipeline '{name}' has no spec.yml")]
    PipelineSpecMissing { name: String },

    #[error("pipeline '{name}' references processor '{processor}' which is not available")]
    ProcessorMissing { name: String, processor: String },

    #[error("pipeline '{pipeline}' is missing template '{template}'")]
    TemplateMissing { pipeline: String, template: String },

    #[error("pipeline '{name}' failed schema validation: {}", .violations.join("; "))]
    InvalidPipeline { name: String, violations: Vec<String> },

    // -- API / LLM -----------------------------------------------------------
    #[error("no API key configured for provider '{provider}'")]
    ApiKeyMissing { provider: String },

    #[error("provider '{provider}' rejected the configured API key")]
    ApiKeyInvalid { provider: String },

    #[error("provider '{provider}' rate limited the request (retry after {retry_after_secs:?}s)")]
    RateLimit {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("provider '{provider}' reports the account quota is exhausted")]
    QuotaExceeded { provider: String },

    #[error("provider '{provider}' did not respond within {elapsed_secs}s")]
    ApiTimeout { provider: String, elapsed_secs: u64 },

    #[error("provider '{provider}' returned HTTP {status}: {detail}")]
    ApiResponseError {
        provider: String,
        status: u16,
        detail: String,
    },

    // -- Validation ----------------------------------------------------------
    #[error("input '{field}' is invalid: {issue}")]
    ValidationError { field: String, issue: String },

    #[error("required input '{field}' is missing")]
    InputRequired { field: String, label: String },

    #[error("input '{field}' expected {expected} but got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{} validation errors", .issues.len())]
    MultipleValidationErrors { issues: Vec<FieldIssue> },

    // -- Execution -----------------------------------------------------------
    #[error("execution {execution_id} exceeded the {limit_secs}s pipeline timeout")]
    ExecutionTimeout {
        execution_id: String,
        limit_secs: u64,
    },

    #[error("processing failed at step '{step}': {detail}")]
    ProcessingError {
        step: String,
        detail: String,
        cause: Option<String>,
    },

    #[error("output directory {path} is unusable: {detail}")]
    OutputDirectoryError { path: PathBuf, detail: String },

    #[error("template '{template}' failed to render: {detail}")]
    TemplateRenderError { template: String, detail: String },

    #[error("no worker available: {detail}")]
    WorkerUnavailable { detail: String },

    #[error("execution {execution_id} was cancelled")]
    Cancelled { execution_id: String },

    // -- Storage / Queue -----------------------------------------------------
    #[error("duplicate execution id or job id: {id}")]
    DuplicateId { id: String },

    #[error("execution not found: {id}")]
    NotFound { id: String },

    #[error("illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: String, to: String },

    #[error("storage error: {detail}")]
    StorageError { detail: String },

    #[error("queue error: {detail}")]
    QueueError { detail: String },

    #[error("serialization error: {detail}")]
    SerializationError { detail: String },
}

impl DprocError {
    /// Creates a `ProcessingError` for the given stage, without a cause.
    pub fn processing(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ProcessingError {
            step: step.into(),
            detail: detail.into(),
            cause: None,
        }
    }

    /// Wraps an unknown error observed at a stage boundary.
    ///
    /// This is the only constructor that should be used for non-taxonomy
    /// failures; taxonomy variants must be propagated unchanged instead.
    pub fn wrap(step: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        let cause = cause.to_string();
        Self::ProcessingError {
            step: step.into(),
            detail: cause.clone(),
            cause: Some(cause),
        }
    }

    /// Creates a storage error
    pub fn storage(detail: impl Into<String>) -> Self {
        Self::StorageError { detail: detail.into() }
    }

    /// Creates a queue error
    pub fn queue(detail: impl Into<String>) -> Self {
        Self::QueueError { detail: detail.into() }
    }

    /// Creates a serialization error
    pub fn serialization(detail: impl Into<String>) -> Self {
        Self::SerializationError { detail: detail.into() }
    }

    /// Stable variant name, used as `name` in the transport form.
    pub fn name(&self) -> &'static str {
        match self {
            DprocError::PipelineNotFound { .. } => "PipelineNotFound",
            DprocError::PipelineSpecMissing { .. } => "PipelineSpecMissing",
            DprocError::ProcessorMissing { .. } => "ProcessorMissing",
            DprocError::TemplateMissing { .. } => "TemplateMissing",
            DprocError::InvalidPipeline { .. } => "InvalidPipeline",
            DprocError::ApiKeyMissing { .. } => "ApiKeyMissing",
            DprocError::ApiKeyInvalid { .. } => "ApiKeyInvalid",
            DprocError::RateLimit { .. } => "RateLimit",
            DprocError::QuotaExceeded { .. } => "QuotaExceeded",
            DprocError::ApiTimeout { .. } => "ApiTimeout",
            DprocError::ApiResponseError { .. } => "ApiResponseError",
            DprocError::ValidationError { .. } => "ValidationError",
            DprocError::InputRequired { .. } => "InputRequired",
            DprocError::InvalidInputType { .. } => "InvalidInputType",
            DprocError::MultipleValidationErrors { .. } => "MultipleValidationErrors",
            DprocError::ExecutionTimeout { .. } => "ExecutionTimeout",
            DprocError::ProcessingError { .. } => "ProcessingError",
            DprocError::OutputDirectoryError { .. } => "OutputDirectoryError",
            DprocError::TemplateRenderError { .. } => "TemplateRenderError",
            DprocError::WorkerUnavailable { .. } => "WorkerUnavailable",
            DprocError::Cancelled { .. } => "Cancelled",
            DprocError::DuplicateId { .. } => "DuplicateId",
            DprocError::NotFound { .. } => "NotFound",
            DprocError::IllegalTransition { .. } => "IllegalTransition",
            DprocError::StorageError { .. } => "StorageError",
            DprocError::QueueError { .. } => "QueueError",
            DprocError::SerializationError { .. } => "SerializationError",
        }
    }

    /// Stable machine-readable error code reported across process boundaries.
    pub fn code(&self) -> &'static str {
        match self {
            DprocError::PipelineNotFound { .. } => "PIPELINE_NOT_FOUND",
            DprocError::PipelineSpecMissing { .. } => "PIPELINE_SPEC_MISSING",
            DprocError::ProcessorMissing { .. } => "PROCESSOR_MISSING",
            DprocError::TemplateMissing { .. } => "TEMPLATE_MISSING",
            DprocError::InvalidPipeline { .. } => "INVALID_PIPELINE",
            DprocError::ApiKeyMissing { .. } => "API_KEY_MISSING",
            DprocError::ApiKeyInvalid { .. } => "API_KEY_INVALID",
            DprocError::RateLimit { .. } => "RATE_LIMIT",
            DprocError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            DprocError::ApiTimeout { .. } => "API_TIMEOUT",
            DprocError::ApiResponseError { .. } => "API_RESPONSE_ERROR",
            DprocError::ValidationError { .. } => "VALIDATION_ERROR",
            DprocError::InputRequired { .. } => "INPUT_REQUIRED",
            DprocError::InvalidInputType { .. } => "INVALID_INPUT_TYPE",
            DprocError::MultipleValidationErrors { .. } => "MULTIPLE_VALIDATION_ERRORS",
            DprocError::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            DprocError::ProcessingError { .. } => "PROCESSING_ERROR",
            DprocError::OutputDirectoryError { .. } => "OUTPUT_DIRECTORY_ERROR",
            DprocError::TemplateRenderError { .. } => "TEMPLATE_RENDER_ERROR",
            DprocError::WorkerUnavailable { .. } => "WORKER_UNAVAILABLE",
            DprocError::Cancelled { .. } => "CANCELLED",
            DprocError::DuplicateId { .. } => "DUPLICATE_ID",
            DprocError::NotFound { .. } => "NOT_FOUND",
            DprocError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            DprocError::StorageError { .. } => "STORAGE_ERROR",
            DprocError::QueueError { .. } => "QUEUE_ERROR",
            DprocError::SerializationError { .. } => "SERIALIZATION_ERROR",
        }
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            DprocError::PipelineNotFound { .. }
            | DprocError::PipelineSpecMissing { .. }
            | DprocError::ProcessorMissing { .. }
            | DprocError::TemplateMissing { .. }
            | DprocError::InvalidPipeline { .. } => "pipeline",
            DprocError::ApiKeyMissing { .. }
            | DprocError::ApiKeyInvalid { .. }
            | DprocError::RateLimit { .. }
            | DprocError::QuotaExceeded { .. }
            | DprocError::ApiTimeout { .. }
            | DprocError::ApiResponseError { .. } => "api",
            DprocError::ValidationError { .. }
            | DprocError::InputRequired { .. }
            | DprocError::InvalidInputType { .. }
            | DprocError::MultipleValidationErrors { .. } => "validation",
            DprocError::ExecutionTimeout { .. }
            | DprocError::ProcessingError { .. }
            | DprocError::OutputDirectoryError { .. }
            | DprocError::TemplateRenderError { .. }
            | DprocError::WorkerUnavailable { .. }
            | DprocError::Cancelled { .. } => "execution",
            DprocError::DuplicateId { .. }
            | DprocError::NotFound { .. }
            | DprocError::IllegalTransition { .. }
            | DprocError::StorageError { .. } => "storage",
            DprocError::QueueError { .. } => "queue",
            DprocError::SerializationError { .. } => "serialization",
        }
    }

    /// Short, user-presentable message. This is what the store persists in
    /// the record's `error` column and what surfaces show by default.
    pub fn user_message(&self) -> String {
        match self {
            DprocError::PipelineNotFound { name } => {
                format!("Pipeline '{}' was not found", name)
            }
            DprocError::PipelineSpecMissing { name } => {
                format!("Pipeline '{}' has no spec.yml", name)
            }
            DprocError::ProcessorMissing { name, processor } => {
                format!("Pipeline '{}' needs processor '{}', which is not available", name, processor)
            }
            DprocError::TemplateMissing { pipeline, template } => {
                format!("Pipeline '{}' is missing template '{}'", pipeline, template)
            }
            DprocError::InvalidPipeline { name, violations } => {
                format!("Pipeline '{}' is invalid ({} problems)", name, violations.len())
            }
            DprocError::ApiKeyMissing { provider } => {
                format!("No API key is configured for {}", provider)
            }
            DprocError::ApiKeyInvalid { provider } => {
                format!("The API key for {} was rejected", provider)
            }
            DprocError::RateLimit { provider, .. } => {
                format!("{} rate limited the request", provider)
            }
            DprocError::QuotaExceeded { provider } => {
                format!("The {} account quota is exhausted", provider)
            }
            DprocError::ApiTimeout { provider, .. } => {
                format!("{} did not respond in time", provider)
            }
            DprocError::ApiResponseError { provider, status, .. } => {
                format!("{} returned an error (HTTP {})", provider, status)
            }
            DprocError::ValidationError { field, issue } => {
                format!("{}: {}", field, issue)
            }
            DprocError::InputRequired { label, .. } => {
                format!("{} is required", label)
            }
            DprocError::InvalidInputType { field, expected, .. } => {
                format!("{} must be a {}", field, expected)
            }
            DprocError::MultipleValidationErrors { issues } => {
                format!("{} inputs failed validation", issues.len())
            }
            DprocError::ExecutionTimeout { limit_secs, .. } => {
                format!("Execution exceeded the {}s time limit", limit_secs)
            }
            DprocError::ProcessingError { step, detail, .. } => {
                format!("Processing failed during {}: {}", step, detail)
            }
            DprocError::OutputDirectoryError { path, .. } => {
                format!("Output directory {} is not writable", path.display())
            }
            DprocError::TemplateRenderError { template, .. } => {
                format!("Template '{}' failed to render", template)
            }
            DprocError::WorkerUnavailable { .. } => "No worker is available to run the job".to_string(),
            DprocError::Cancelled { .. } => "Job cancelled by user".to_string(),
            DprocError::DuplicateId { id } => format!("An execution with id '{}' already exists", id),
            DprocError::NotFound { id } => format!("Execution '{}' was not found", id),
            DprocError::IllegalTransition { from, to, .. } => {
                format!("Cannot move an execution from '{}' to '{}'", from, to)
            }
            DprocError::StorageError { .. } => "The execution store reported an error".to_string(),
            DprocError::QueueError { .. } => "The job queue reported an error".to_string(),
            DprocError::SerializationError { .. } => "Data could not be serialized".to_string(),
        }
    }

    /// Suggested remediation steps, rendered as a numbered list by the CLI.
    pub fn fixes(&self) -> Vec<String> {
        match self {
            DprocError::PipelineNotFound { name } => vec![
                "Run 'dproc list' to see available pipelines".to_string(),
                format!("Run 'dproc init {}' to scaffold it", name),
            ],
            DprocError::PipelineSpecMissing { name } => vec![
                format!("Create pipelines/{}/spec.yml", name),
                format!("Run 'dproc validate {}' to check the layout", name),
            ],
            DprocError::ProcessorMissing { processor, .. } => vec![
                format!("Check the processor name '{}' in the pipeline's processor file", processor),
                "Register the processor in the processor registry".to_string(),
            ],
            DprocError::TemplateMissing { template, .. } => vec![
                format!("Add '{}' to the pipeline's templates/ directory", template),
            ],
            DprocError::InvalidPipeline { violations, .. } => {
                violations.clone()
            }
            DprocError::ApiKeyMissing { provider } => vec![
                format!("Set the {}_API_KEY environment variable", provider.to_uppercase()),
                "Run 'dproc configure' to store the key in the secrets file".to_string(),
            ],
            DprocError::ApiKeyInvalid { provider } => vec![
                format!("Verify the {} API key has not expired or been revoked", provider),
                "Run 'dproc configure' to replace the stored key".to_string(),
            ],
            DprocError::RateLimit { retry_after_secs, .. } => {
                let mut fixes = vec!["Wait before resubmitting; queued retries back off automatically".to_string()];
                if let Some(secs) = retry_after_secs {
                    fixes.push(format!("The provider asked to retry after {}s", secs));
                }
                fixes
            }
            DprocError::QuotaExceeded { provider } => vec![
                format!("Check the billing status of the {} account", provider),
            ],
            DprocError::ApiTimeout { .. } => vec![
                "Resubmit the job; transient timeouts are retried automatically".to_string(),
            ],
            DprocError::ApiResponseError { .. } => vec![
                "Check the provider status page".to_string(),
                "Server-side failures are retried automatically".to_string(),
            ],
            DprocError::ValidationError { field, .. } => vec![
                format!("Correct the '{}' input and resubmit", field),
            ],
            DprocError::InputRequired { field, .. } => vec![
                format!("Provide a value for '{}'", field),
            ],
            DprocError::InvalidInputType { field, expected, .. } => vec![
                format!("Provide a {} value for '{}'", expected, field),
            ],
            DprocError::MultipleValidationErrors { issues } => {
                issues.iter().map(|i| i.to_string()).collect()
            }
            DprocError::ExecutionTimeout { .. } => vec![
                "Raise execution.timeoutMinutes in the pipeline config".to_string(),
                "Reduce the amount of data the processor fetches".to_string(),
            ],
            DprocError::OutputDirectoryError { path, .. } => vec![
                format!("Create {} and make it writable by the worker user", path.display()),
            ],
            DprocError::TemplateRenderError { template, .. } => vec![
                format!("Check the syntax of '{}'", template),
            ],
            DprocError::WorkerUnavailable { .. } => vec![
                "Start a worker with 'dproc worker'".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    /// Severity used by surfaces when rendering this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DprocError::RateLimit { .. } | DprocError::ApiTimeout { .. } => ErrorSeverity::Warning,
            DprocError::Cancelled { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Structured context for logs and the transport form.
    pub fn context(&self) -> BTreeMap<String, serde_json::Value> {
        use serde_json::json;
        let mut ctx = BTreeMap::new();
        match self {
            DprocError::PipelineNotFound { name }
            | DprocError::PipelineSpecMissing { name } => {
                ctx.insert("pipeline".into(), json!(name));
            }
            DprocError::ProcessorMissing { name, processor } => {
                ctx.insert("pipeline".into(), json!(name));
                ctx.insert("processor".into(), json!(processor));
            }
            DprocError::TemplateMissing { pipeline, template } => {
                ctx.insert("pipeline".into(), json!(pipeline));
                ctx.insert("template".into(), json!(template));
            }
            DprocError::InvalidPipeline { name, violations } => {
                ctx.insert("pipeline".into(), json!(name));
                ctx.insert("violations".into(), json!(violations));
            }
            DprocError::ApiKeyMissing { provider }
            | DprocError::ApiKeyInvalid { provider }
            | DprocError::QuotaExceeded { provider } => {
                ctx.insert("provider".into(), json!(provider));
            }
            DprocError::RateLimit { provider, retry_after_secs } => {
                ctx.insert("provider".into(), json!(provider));
                if let Some(secs) = retry_after_secs {
                    ctx.insert("retryAfterSecs".into(), json!(secs));
                }
            }
            DprocError::ApiTimeout { provider, elapsed_secs } => {
                ctx.insert("provider".into(), json!(provider));
                ctx.insert("elapsedSecs".into(), json!(elapsed_secs));
            }
            DprocError::ApiResponseError { provider, status, detail } => {
                ctx.insert("provider".into(), json!(provider));
                ctx.insert("status".into(), json!(status));
                ctx.insert("detail".into(), json!(detail));
            }
            DprocError::ValidationError { field, issue } => {
                ctx.insert("field".into(), json!(field));
                ctx.insert("issue".into(), json!(issue));
            }
            DprocError::InputRequired { field, label } => {
                ctx.insert("field".into(), json!(field));
                ctx.insert("label".into(), json!(label));
            }
            DprocError::InvalidInputType { field, expected, actual } => {
                ctx.insert("field".into(), json!(field));
                ctx.insert("expected".into(), json!(expected));
                ctx.insert("actual".into(), json!(actual));
            }
            DprocError::MultipleValidationErrors { issues } => {
                ctx.insert("issues".into(), json!(issues));
            }
            DprocError::ExecutionTimeout { execution_id, limit_secs } => {
                ctx.insert("executionId".into(), json!(execution_id));
                ctx.insert("limitSecs".into(), json!(limit_secs));
            }
            DprocError::ProcessingError { step, cause, .. } => {
                ctx.insert("step".into(), json!(step));
                if let Some(cause) = cause {
                    ctx.insert("cause".into(), json!(cause));
                }
            }
            DprocError::OutputDirectoryError { path, detail } => {
                ctx.insert("path".into(), json!(path.display().to_string()));
                ctx.insert("detail".into(), json!(detail));
            }
            DprocError::TemplateRenderError { template, detail } => {
                ctx.insert("template".into(), json!(template));
                ctx.insert("detail".into(), json!(detail));
            }
            DprocError::Cancelled { execution_id } => {
                ctx.insert("executionId".into(), json!(execution_id));
            }
            DprocError::IllegalTransition { id, from, to } => {
                ctx.insert("id".into(), json!(id));
                ctx.insert("from".into(), json!(from));
                ctx.insert("to".into(), json!(to));
            }
            DprocError::DuplicateId { id } | DprocError::NotFound { id } => {
                ctx.insert("id".into(), json!(id));
            }
            DprocError::WorkerUnavailable { detail }
            | DprocError::StorageError { detail }
            | DprocError::QueueError { detail }
            | DprocError::SerializationError { detail } => {
                ctx.insert("detail".into(), json!(detail));
            }
        }
        ctx
    }

    /// Checks whether queue-level retry with backoff is appropriate.
    ///
    /// Only transient provider failures qualify; configuration and
    /// validation problems fail immediately without retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DprocError::RateLimit { .. }
                | DprocError::ApiTimeout { .. }
                | DprocError::ApiResponseError { status: 500..=599, .. }
        )
    }

    /// Checks whether this error represents a cancellation observation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DprocError::Cancelled { .. })
    }

    /// Serializes into the single wire form shared by the HTTP and CLI
    /// surfaces.
    pub fn to_transport(&self) -> ErrorTransport {
        ErrorTransport {
            name: self.name().to_string(),
            code: self.code().to_string(),
            user_message: self.user_message(),
            fixes: self.fixes(),
            severity: self.severity(),
            context: self.context(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Renders for the terminal. Technical detail is included only when
    /// `debug` is set.
    pub fn to_cli(&self, debug: bool) -> String {
        let mut out = format!("error[{}]: {}", self.code(), self.user_message());
        let fixes = self.fixes();
        if !fixes.is_empty() {
            out.push_str("\n\nTo fix this:");
            for (i, fix) in fixes.iter().enumerate() {
                out.push_str(&format!("\n  {}. {}", i + 1, fix));
            }
        }
        if debug {
            out.push_str(&format!("\n\ntechnical: {}", self));
        }
        out
    }
}

/// The taxonomy's single transport serialization.
///
/// `{name, code, userMessage, fixes, severity, context}` plus a timestamp,
/// consumed uniformly by the HTTP and CLI surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTransport {
    pub name: String,
    pub code: String,
    pub user_message: String,
    pub fixes: Vec<String>,
    pub severity: ErrorSeverity,
    pub context: BTreeMap<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<serde_json::Error> for DprocError {
    fn from(err: serde_json::Error) -> Self {
        DprocError::SerializationError { detail: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = DprocError::InputRequired {
            field: "companyName".to_string(),
            label: "Company Name".to_string(),
        };
        assert_eq!(err.code(), "INPUT_REQUIRED");
        assert_eq!(err.user_message(), "Company Name is required");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DprocError::RateLimit {
            provider: "openai".into(),
            retry_after_secs: Some(2)
        }
        .is_retryable());
        assert!(DprocError::ApiTimeout {
            provider: "openai".into(),
            elapsed_secs: 120
        }
        .is_retryable());
        assert!(DprocError::ApiResponseError {
            provider: "openai".into(),
            status: 503,
            detail: "overloaded".into()
        }
        .is_retryable());

        // 4xx responses and configuration problems are not transient.
        assert!(!DprocError::ApiResponseError {
            provider: "openai".into(),
            status: 404,
            detail: "no such model".into()
        }
        .is_retryable());
        assert!(!DprocError::ApiKeyMissing { provider: "openai".into() }.is_retryable());
        assert!(!DprocError::ValidationError {
            field: "topic".into(),
            issue: "empty".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_transport_shape() {
        let err = DprocError::RateLimit {
            provider: "anthropic".to_string(),
            retry_after_secs: Some(2),
        };
        let transport = err.to_transport();
        assert_eq!(transport.name, "RateLimit");
        assert_eq!(transport.code, "RATE_LIMIT");
        assert_eq!(transport.severity, ErrorSeverity::Warning);
        assert_eq!(
            transport.context.get("retryAfterSecs"),
            Some(&serde_json::json!(2))
        );
    }

    #[test]
    fn test_wrap_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DprocError::wrap("data-processor", &io);
        match &err {
            DprocError::ProcessingError { step, cause, .. } => {
                assert_eq!(step, "data-processor");
                assert_eq!(cause.as_deref(), Some("denied"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(err.category(), "execution");
    }

    #[test]
    fn test_cli_rendering_numbers_fixes() {
        let err = DprocError::ApiKeyMissing { provider: "openai".to_string() };
        let rendered = err.to_cli(false);
        assert!(rendered.contains("error[API_KEY_MISSING]"));
        assert!(rendered.contains("1. Set the OPENAI_API_KEY environment variable"));
        assert!(!rendered.contains("technical:"));

        let debug = err.to_cli(true);
        assert!(debug.contains("technical:"));
    }

    #[test]
    fn test_multiple_validation_errors_fixes_list_issues() {
        let err = DprocError::MultipleValidationErrors {
            issues: vec![
                FieldIssue::error("topic", "is required"),
                FieldIssue::error("maxResults", "must be a number"),
            ],
        };
        assert_eq!(err.fixes().len(), 2);
        assert_eq!(err.user_message(), "2 inputs failed validation");
    }
}

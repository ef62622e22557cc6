// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # DProc Domain
//!
//! The domain layer of the dproc report-generation core. It holds the
//! business rules of the pipeline execution lifecycle and is completely
//! independent of external concerns: no database, no broker, no HTTP, no
//! file system.
//!
//! ## Module Structure
//!
//! - [`entities`] - Objects with identity and a lifecycle: the execution
//!   record and its status DAG, per-pipeline aggregate statistics, and the
//!   parsed pipeline spec/config
//! - [`value_objects`] - Immutable, identity-free concepts: job and
//!   execution identifiers, priority classes, typed input values
//! - [`error`] - The closed error taxonomy ([`DprocError`]) with its
//!   transport and CLI renderings
//! - [`services`] - Infrastructure ports: the job queue, LLM providers,
//!   template rendering, and processors
//! - [`repositories`] - The execution store port
//!
//! ## Layering Rules
//!
//! The domain depends on nothing above it. Application services orchestrate
//! domain objects through the ports defined here; infrastructure adapters
//! implement those ports. Ports that front I/O are `async` (queue, store,
//! providers, processors); CPU-bound services (template rendering, the
//! status state machine, Welford statistics) are sync.

pub mod entities;
pub mod error;
pub mod repositories;
pub mod services;
pub mod value_objects;

// Flat re-exports for the common types, mirroring how callers actually
// import them.
pub use entities::{
    ExecutionPolicy, ExecutionRecord, ExecutionStatus, InputDefinition, InputKind, LlmConfig,
    LlmFallback, LlmProviderKind, PipelineConfig, PipelineMeta, PipelineSpec, PipelineStats,
    StatusPatch,
};
pub use error::{DprocError, ErrorSeverity, ErrorTransport, FieldIssue};
pub use repositories::{ExecutionFilter, ExecutionRepository, DEFAULT_LIST_LIMIT};
pub use services::{
    extract_first_json, ClaimedJob, DeliveryHandle, EnqueueOptions, JobEnvelope, JobQueue,
    LlmOutcome, LlmProvider, LlmRequest, LlmUsage, Processor, ProcessorContext, ProcessorResult,
    RetentionPolicy, RetryPolicy, TemplateRenderer,
};
pub use value_objects::{ExecutionId, InputValue, JobId, JobPriority};

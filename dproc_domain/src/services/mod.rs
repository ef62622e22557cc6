// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain service ports: the contracts infrastructure adapters implement.

pub mod llm_service;
pub mod processor_service;
pub mod queue_service;
pub mod template_service;

pub use llm_service::{extract_first_json, LlmOutcome, LlmProvider, LlmRequest, LlmUsage};
pub use processor_service::{Processor, ProcessorContext, ProcessorResult};
pub use queue_service::{
    ClaimedJob, DeliveryHandle, EnqueueOptions, JobEnvelope, JobQueue, RetentionPolicy, RetryPolicy,
};
pub use template_service::TemplateRenderer;

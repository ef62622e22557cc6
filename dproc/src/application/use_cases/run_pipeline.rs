// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Pipeline Use Case
//!
//! The CLI's synchronous path: one execution, driven directly through the
//! staged executor with no queue in between. The record still goes through
//! the store with the same lifecycle, so `history` and `stats` see direct
//! runs and queued runs identically.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use dproc_domain::{DprocError, ExecutionRecord, JobEnvelope, JobId, JobPriority};

use crate::application::services::executor::{JobExecutor, StagedExecutor};

/// Runs one pipeline synchronously and returns the completed record.
pub async fn run_pipeline(
    executor: Arc<StagedExecutor>,
    pipeline_name: &str,
    inputs: Value,
    output_format: &str,
) -> Result<ExecutionRecord, DprocError> {
    let now_ms = Utc::now().timestamp_millis();
    let envelope = JobEnvelope {
        job_id: JobId::generate("cli", now_ms),
        pipeline_name: pipeline_name.to_string(),
        inputs,
        output_format: output_format.to_string(),
        priority: JobPriority::Normal,
        user_id: None,
        created_at: now_ms,
    };
    // Direct runs have no queue behind them, so every attempt is final.
    executor.execute(&envelope, true).await
}

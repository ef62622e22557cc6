// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Processor Port
//!
//! A processor is the user-authored data stage of a pipeline: it turns the
//! validated inputs into an `attributes` map (the data bundle) plus free-form
//! metadata. Processors are registered by name at build time; the pipeline's
//! `processor` artifact selects one.
//!
//! The context handed to a processor is deliberately narrow. It exposes:
//!
//! - structured logging scoped to the execution
//! - `read_data_file` for the pipeline's `data/` directory
//! - `save_bundle` for writing into the execution-scoped bundle directory
//! - a small TTL key/value cache scoped per pipeline path
//! - the execution's cancellation state, which long-running processors are
//!   expected to poll between units of work

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DprocError;
use crate::value_objects::{ExecutionId, InputValue};

/// The shape every processor must return.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorResult {
    /// The data bundle: what prompts and templates see as `data`.
    pub attributes: Map<String, Value>,
    /// Free-form metadata persisted on the execution record.
    #[serde(default)]
    pub metadata: Value,
}

impl ProcessorResult {
    /// Validates the shape contract: `attributes` must be present (possibly
    /// empty) and `metadata` must be an object or null.
    pub fn check_shape(&self) -> Result<(), DprocError> {
        if !(self.metadata.is_null() || self.metadata.is_object()) {
            return Err(DprocError::processing(
                "data-processor",
                "processor metadata must be a JSON object",
            ));
        }
        Ok(())
    }
}

/// Execution-scoped capabilities available to a running processor.
#[async_trait]
pub trait ProcessorContext: Send + Sync {
    fn execution_id(&self) -> &ExecutionId;

    fn pipeline_name(&self) -> &str;

    /// Reads a file from the pipeline's `data/` directory. Path traversal
    /// outside that directory is rejected.
    async fn read_data_file(&self, name: &str) -> Result<String, DprocError>;

    /// Writes an auxiliary artifact into the execution-scoped bundle
    /// directory and returns its path.
    async fn save_bundle(&self, data: &Value, name: &str) -> Result<PathBuf, DprocError>;

    /// Cache lookup scoped per pipeline path.
    async fn cache_get(&self, key: &str) -> Option<Value>;

    /// Cache store with a TTL.
    async fn cache_put(&self, key: &str, value: Value, ttl: Duration);

    /// Cooperative cancellation: processors poll this between units of work.
    fn is_cancelled(&self) -> bool;

    /// Logging scoped to the execution.
    fn log(&self, message: &str);
}

/// Port implemented by every compiled-in processor.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Registry name, referenced by the pipeline's `processor` artifact.
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        inputs: &BTreeMap<String, InputValue>,
        ctx: &dyn ProcessorContext,
    ) -> Result<ProcessorResult, DprocError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_accepts_object_and_null_metadata() {
        let ok = ProcessorResult {
            attributes: Map::new(),
            metadata: serde_json::json!({"source": "demo"}),
        };
        assert!(ok.check_shape().is_ok());

        let null = ProcessorResult::default();
        assert!(null.check_shape().is_ok());
    }

    #[test]
    fn test_shape_rejects_scalar_metadata() {
        let bad = ProcessorResult {
            attributes: Map::new(),
            metadata: serde_json::json!(42),
        };
        assert!(bad.check_shape().is_err());
    }
}

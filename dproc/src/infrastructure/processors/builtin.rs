// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Built-in processors. `echo` is the smallest useful processor (inputs
//! straight through to attributes) and doubles as the scaffold default;
//! `dataset` merges a JSON dataset from the pipeline's `data/` directory.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dproc_domain::{DprocError, InputValue, Processor, ProcessorContext, ProcessorResult};

/// Passes the validated inputs through as attributes.
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn run(
        &self,
        inputs: &BTreeMap<String, InputValue>,
        ctx: &dyn ProcessorContext,
    ) -> Result<ProcessorResult, DprocError> {
        ctx.log("echoing inputs into attributes");
        let mut attributes = Map::new();
        for (name, value) in inputs {
            attributes.insert(name.clone(), value.to_json());
        }
        Ok(ProcessorResult {
            attributes,
            metadata: json!({"processor": self.name()}),
        })
    }
}

/// Loads `dataset.json` from the pipeline's `data/` directory and exposes
/// its records alongside the inputs. The parsed dataset is cached per
/// pipeline for five minutes.
pub struct DatasetProcessor;

const DATASET_FILE: &str = "dataset.json";
const DATASET_CACHE_KEY: &str = "dataset";
const DATASET_CACHE_TTL: Duration = Duration::from_secs(300);

#[async_trait]
impl Processor for DatasetProcessor {
    fn name(&self) -> &'static str {
        "dataset"
    }

    async fn run(
        &self,
        inputs: &BTreeMap<String, InputValue>,
        ctx: &dyn ProcessorContext,
    ) -> Result<ProcessorResult, DprocError> {
        let dataset = match ctx.cache_get(DATASET_CACHE_KEY).await {
            Some(cached) => cached,
            None => {
                ctx.log("loading dataset.json");
                let raw = ctx.read_data_file(DATASET_FILE).await?;
                let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
                    DprocError::processing(
                        "data-processor",
                        format!("{} is not valid JSON: {}", DATASET_FILE, e),
                    )
                })?;
                ctx.cache_put(DATASET_CACHE_KEY, parsed.clone(), DATASET_CACHE_TTL)
                    .await;
                parsed
            }
        };

        if ctx.is_cancelled() {
            return Err(DprocError::Cancelled {
                execution_id: ctx.execution_id().to_string(),
            });
        }

        let records = match &dataset {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };

        let mut attributes = Map::new();
        attributes.insert("count".into(), json!(records.len()));
        attributes.insert("records".into(), Value::Array(records));
        for (name, value) in inputs {
            attributes.insert(name.clone(), value.to_json());
        }

        Ok(ProcessorResult {
            attributes,
            metadata: json!({"processor": self.name(), "source": DATASET_FILE}),
        })
    }
}

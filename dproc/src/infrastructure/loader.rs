// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Loader
//!
//! Resolves a pipeline name to its on-disk layout:
//!
//! ```text
//! {workspace}/pipelines/{name}/
//!   spec.yml        pipeline spec (inputs, outputs, variables)
//!   config.yml      llm + execution configuration
//!   processor       one line naming a registered processor
//!   prompts/*.md    prompt templates
//!   templates/*.j2  output templates
//!   data/           files readable by the processor
//!   output/         bundles and reports, written per execution
//! ```
//!
//! Every accessor returns a taxonomy variant on failure; `validate_pipeline`
//! accumulates problems without throwing so the CLI and HTTP surfaces can
//! show the full list.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use dproc_domain::{DprocError, PipelineConfig, PipelineSpec, Processor};

use super::processors::ProcessorRegistry;

/// Everything the executor needs for one pipeline.
pub struct LoadedPipeline {
    pub name: String,
    pub root: PathBuf,
    pub spec: PipelineSpec,
    pub config: PipelineConfig,
    pub processor: Arc<dyn Processor>,
    pub prompts_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub data_dir: PathBuf,
}

/// One prompt file, ready for rendering.
#[derive(Debug, Clone)]
pub struct PromptSource {
    /// File stem; the prompt named `main` is the primary one.
    pub name: String,
    pub source: String,
}

/// Result of `validate_pipeline`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// One row of `list_pipelines`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<PipelineSpec>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Filesystem-backed pipeline loader.
pub struct PipelineLoader {
    pipelines_dir: PathBuf,
    registry: Arc<ProcessorRegistry>,
}

impl PipelineLoader {
    pub fn new(pipelines_dir: PathBuf, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            pipelines_dir,
            registry,
        }
    }

    pub fn pipeline_dir(&self, name: &str) -> PathBuf {
        self.pipelines_dir.join(name)
    }

    fn require_pipeline_dir(&self, name: &str) -> Result<PathBuf, DprocError> {
        let dir = self.pipeline_dir(name);
        if !dir.is_dir() {
            return Err(DprocError::PipelineNotFound { name: name.to_string() });
        }
        Ok(dir)
    }

    /// Loads and structurally validates `spec.yml`.
    pub fn load_spec(&self, name: &str) -> Result<PipelineSpec, DprocError> {
        let dir = self.require_pipeline_dir(name)?;
        let path = dir.join("spec.yml");
        if !path.is_file() {
            return Err(DprocError::PipelineSpecMissing { name: name.to_string() });
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| DprocError::storage(format!("cannot read {}: {}", path.display(), e)))?;
        let spec: PipelineSpec = serde_yaml::from_str(&raw).map_err(|e| DprocError::InvalidPipeline {
            name: name.to_string(),
            violations: vec![format!("spec.yml does not parse: {}", e)],
        })?;
        let violations = spec.validate();
        if !violations.is_empty() {
            return Err(DprocError::InvalidPipeline {
                name: name.to_string(),
                violations,
            });
        }
        Ok(spec)
    }

    /// Loads and structurally validates `config.yml`.
    pub fn load_config(&self, name: &str) -> Result<PipelineConfig, DprocError> {
        let dir = self.require_pipeline_dir(name)?;
        let path = dir.join("config.yml");
        if !path.is_file() {
            return Err(DprocError::InvalidPipeline {
                name: name.to_string(),
                violations: vec!["config.yml is missing".to_string()],
            });
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| DprocError::storage(format!("cannot read {}: {}", path.display(), e)))?;
        let config: PipelineConfig =
            serde_yaml::from_str(&raw).map_err(|e| DprocError::InvalidPipeline {
                name: name.to_string(),
                violations: vec![format!("config.yml does not parse: {}", e)],
            })?;
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(DprocError::InvalidPipeline {
                name: name.to_string(),
                violations,
            });
        }
        Ok(config)
    }

    /// Reads the `processor` artifact and resolves it from the registry.
    pub fn resolve_processor(&self, name: &str) -> Result<Arc<dyn Processor>, DprocError> {
        let dir = self.require_pipeline_dir(name)?;
        let path = dir.join("processor");
        let processor_name = std::fs::read_to_string(&path)
            .map(|raw| raw.trim().to_string())
            .map_err(|_| DprocError::ProcessorMissing {
                name: name.to_string(),
                processor: "processor".to_string(),
            })?;
        if processor_name.is_empty() {
            return Err(DprocError::ProcessorMissing {
                name: name.to_string(),
                processor: "processor".to_string(),
            });
        }
        self.registry
            .get(&processor_name)
            .ok_or_else(|| DprocError::ProcessorMissing {
                name: name.to_string(),
                processor: processor_name,
            })
    }

    /// Loads every prompt under `prompts/`, sorted by name.
    pub fn load_prompts(&self, name: &str) -> Result<Vec<PromptSource>, DprocError> {
        let dir = self.require_pipeline_dir(name)?.join("prompts");
        let mut prompts = Vec::new();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| DprocError::storage(format!("cannot read {}: {}", dir.display(), e)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| DprocError::storage(format!("cannot scan prompts: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = std::fs::read_to_string(&path)
                .map_err(|e| DprocError::storage(format!("cannot read {}: {}", path.display(), e)))?;
            prompts.push(PromptSource { name: stem, source });
        }
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(prompts)
    }

    /// Resolves a pipeline to `{spec, config, processor}` plus its
    /// directories. This is the executor's stage-1 entry point.
    pub fn load(&self, name: &str) -> Result<LoadedPipeline, DprocError> {
        let root = self.require_pipeline_dir(name)?;
        let spec = self.load_spec(name)?;
        let config = self.load_config(name)?;
        let processor = self.resolve_processor(name)?;
        Ok(LoadedPipeline {
            name: name.to_string(),
            spec,
            config,
            processor,
            prompts_dir: root.join("prompts"),
            templates_dir: root.join("templates"),
            data_dir: root.join("data"),
            root,
        })
    }

    /// Accumulates every layout and schema problem without throwing.
    pub fn validate_pipeline(&self, name: &str) -> PipelineValidation {
        let dir = self.pipeline_dir(name);
        if !dir.is_dir() {
            return PipelineValidation {
                valid: false,
                errors: vec![format!("pipeline directory {} does not exist", dir.display())],
            };
        }

        let mut errors = Vec::new();
        for required in ["spec.yml", "config.yml", "processor"] {
            if !dir.join(required).is_file() {
                errors.push(format!("{} is missing", required));
            }
        }
        for required_dir in ["prompts", "templates"] {
            if !dir.join(required_dir).is_dir() {
                errors.push(format!("{}/ is missing", required_dir));
            }
        }

        if dir.join("spec.yml").is_file() {
            match self.load_spec(name) {
                Ok(_) => {}
                Err(DprocError::InvalidPipeline { violations, .. }) => errors.extend(violations),
                Err(other) => errors.push(other.user_message()),
            }
        }
        if dir.join("config.yml").is_file() {
            match self.load_config(name) {
                Ok(_) => {}
                Err(DprocError::InvalidPipeline { violations, .. }) => errors.extend(violations),
                Err(other) => errors.push(other.user_message()),
            }
        }
        if dir.join("processor").is_file() {
            if let Err(err) = self.resolve_processor(name) {
                errors.push(err.user_message());
            }
        }

        PipelineValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Scans the workspace for pipelines.
    pub fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, DprocError> {
        let mut summaries = Vec::new();
        let entries = match std::fs::read_dir(&self.pipelines_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => {
                return Err(DprocError::storage(format!(
                    "cannot read {}: {}",
                    self.pipelines_dir.display(),
                    e
                )))
            }
        };

        for entry in entries {
            let entry =
                entry.map_err(|e| DprocError::storage(format!("cannot scan pipelines: {}", e)))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let validation = self.validate_pipeline(&name);
            let spec = self.load_spec(&name).ok();
            summaries.push(PipelineSummary {
                name,
                spec,
                valid: validation.valid,
                errors: validation.errors,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

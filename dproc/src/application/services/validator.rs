// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pre-Execution Validator
//!
//! The only producer of typed [`InputValue`]s: raw JSON inputs go in, a
//! validation report with normalized inputs comes out. Runs in the
//! submitter (fail fast, before anything is enqueued) and again in the
//! executor (stage 2, in case the spec changed between submission and
//! execution).
//!
//! ## Normalization rules
//!
//! - `number`: numeric JSON passes through; strings are parsed, rejecting
//!   empty and non-numeric text
//! - `boolean`: native booleans, or the strings
//!   `true|false|1|0|yes|no` (case-insensitive)
//! - `text` / `select`: scalars coerce to string; `select` additionally
//!   requires membership in the declared options
//! - `file`: a string path
//! - `array`: a JSON array, kept as-is
//! - missing optional inputs are filled from `default` (normalized through
//!   the same rules); missing required inputs are an error
//!
//! Normalization is idempotent: feeding the normalized map back through
//! produces the same map.
//!
//! ## Environmental checks
//!
//! Beyond the inputs, validation covers the provider API key (environment
//! or secrets store), the output directory (exists and writable, probed
//! with a scratch write), and the spec invariants (non-empty name and
//! outputs).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use dproc_domain::{
    DprocError, ErrorSeverity, FieldIssue, InputDefinition, InputKind, InputValue, PipelineConfig,
    PipelineSpec,
};

use crate::infrastructure::config::SecretsStore;

/// Outcome of pre-execution validation.
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldIssue>,
    pub normalized_inputs: BTreeMap<String, InputValue>,
    /// Input problems as their specific taxonomy variants, in field order.
    input_errors: Vec<DprocError>,
    api_key_error: Option<DprocError>,
    output_dir_error: Option<DprocError>,
    spec_errors: Vec<String>,
}

impl ValidationReport {
    /// Selects the most specific taxonomy variant, or returns the
    /// normalized inputs:
    ///
    /// - a single API-key problem → `ApiKeyMissing`
    /// - a single output-directory problem → `OutputDirectoryError`
    /// - exactly one input problem → that input's own variant
    ///   (`InputRequired`, `InvalidInputType`, `ValidationError`)
    /// - more than one problem of any kind → `MultipleValidationErrors`
    /// - otherwise (spec-level problems) → `InvalidPipeline`
    pub fn throw_if_invalid(
        self,
        pipeline_name: &str,
    ) -> Result<BTreeMap<String, InputValue>, DprocError> {
        if self.valid {
            return Ok(self.normalized_inputs);
        }

        let total = self.errors.len();
        if total == 1 {
            if let Some(err) = self.api_key_error {
                return Err(err);
            }
            if let Some(err) = self.output_dir_error {
                return Err(err);
            }
            if let Some(err) = self.input_errors.into_iter().next() {
                return Err(err);
            }
            return Err(DprocError::InvalidPipeline {
                name: pipeline_name.to_string(),
                violations: self.spec_errors,
            });
        }

        if !self.input_errors.is_empty() || self.api_key_error.is_some() || self.output_dir_error.is_some()
        {
            return Err(DprocError::MultipleValidationErrors { issues: self.errors });
        }
        Err(DprocError::InvalidPipeline {
            name: pipeline_name.to_string(),
            violations: self.spec_errors,
        })
    }
}

/// Validates and normalizes one job's inputs against its pipeline.
pub struct PreflightValidator<'a> {
    spec: &'a PipelineSpec,
    config: &'a PipelineConfig,
    secrets: &'a SecretsStore,
    output_dir: &'a Path,
}

impl<'a> PreflightValidator<'a> {
    pub fn new(
        spec: &'a PipelineSpec,
        config: &'a PipelineConfig,
        secrets: &'a SecretsStore,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            spec,
            config,
            secrets,
            output_dir,
        }
    }

    /// Runs every check. Never fails early; the report carries the full
    /// issue list.
    pub fn validate(&self, raw_inputs: &Value) -> ValidationReport {
        let mut errors = Vec::new();
        let mut input_errors = Vec::new();
        let mut normalized_inputs = BTreeMap::new();

        let raw_map = raw_inputs.as_object().cloned().unwrap_or_default();

        // 1 + 2: required inputs and per-type normalization.
        for def in &self.spec.inputs {
            let provided = raw_map.get(&def.name).filter(|v| !v.is_null());
            let raw_value = match provided {
                Some(value) => Some(value.clone()),
                None => def.default.clone(),
            };

            match raw_value {
                Some(value) => match normalize_value(def, &value) {
                    Ok(normalized) => {
                        if def.required && normalized.is_empty() {
                            errors.push(FieldIssue::error(&def.name, "is required"));
                            input_errors.push(DprocError::InputRequired {
                                field: def.name.clone(),
                                label: def.label.clone(),
                            });
                        } else if let Some(issue) = exceeds_max_size(def, &normalized) {
                            errors.push(FieldIssue::error(&def.name, issue.clone()));
                            input_errors.push(DprocError::ValidationError {
                                field: def.name.clone(),
                                issue,
                            });
                        } else {
                            normalized_inputs.insert(def.name.clone(), normalized);
                        }
                    }
                    Err(err) => {
                        errors.push(FieldIssue::error(&def.name, err.user_message()));
                        input_errors.push(err);
                    }
                },
                None if def.required => {
                    errors.push(FieldIssue::error(&def.name, "is required"));
                    input_errors.push(DprocError::InputRequired {
                        field: def.name.clone(),
                        label: def.label.clone(),
                    });
                }
                None => {}
            }
        }

        // Unknown inputs are tolerated but flagged, so typos in callers
        // surface somewhere.
        for name in raw_map.keys() {
            if self.spec.input(name).is_none() {
                errors.push(FieldIssue::warning(name, "is not declared by the pipeline"));
            }
        }

        // 3: provider API key.
        let mut api_key_error = None;
        let provider = self.config.llm.provider;
        if !self.secrets.has_api_key(provider) {
            errors.push(FieldIssue::error("apiKey", format!("no API key for {}", provider)));
            api_key_error = Some(DprocError::ApiKeyMissing {
                provider: provider.to_string(),
            });
        }

        // 4: output directory exists and is writable.
        let mut output_dir_error = None;
        if let Err(detail) = probe_output_dir(self.output_dir) {
            errors.push(FieldIssue::error("outputDir", detail.clone()));
            output_dir_error = Some(DprocError::OutputDirectoryError {
                path: self.output_dir.to_path_buf(),
                detail,
            });
        }

        // 5: spec invariants.
        let spec_errors = self.spec.validate();
        for violation in &spec_errors {
            errors.push(FieldIssue::error("spec", violation.clone()));
        }

        // Warnings do not fail validation.
        let valid = !errors.iter().any(|e| e.severity == ErrorSeverity::Error);
        ValidationReport {
            valid,
            errors,
            normalized_inputs,
            input_errors,
            api_key_error,
            output_dir_error,
            spec_errors,
        }
    }
}

/// Normalizes one raw value against its definition.
fn normalize_value(def: &InputDefinition, raw: &Value) -> Result<InputValue, DprocError> {
    let type_error = |actual: &str| DprocError::InvalidInputType {
        field: def.name.clone(),
        expected: def.kind.to_string(),
        actual: actual.to_string(),
    };

    match def.kind {
        InputKind::Number => match raw {
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(InputValue::Number)
                .ok_or_else(|| type_error("non-finite number")),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(type_error("empty string"));
                }
                match trimmed.parse::<f64>() {
                    Ok(parsed) if parsed.is_finite() => Ok(InputValue::Number(parsed)),
                    _ => Err(type_error("non-numeric string")),
                }
            }
            other => Err(type_error(json_type_name(other))),
        },
        InputKind::Boolean => match raw {
            Value::Bool(b) => Ok(InputValue::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(InputValue::Bool(true)),
                "false" | "0" | "no" => Ok(InputValue::Bool(false)),
                _ => Err(type_error("non-boolean string")),
            },
            other => Err(type_error(json_type_name(other))),
        },
        InputKind::Text => coerce_string(raw)
            .map(InputValue::Text)
            .ok_or_else(|| type_error(json_type_name(raw))),
        InputKind::Select => {
            let value = coerce_string(raw).ok_or_else(|| type_error(json_type_name(raw)))?;
            let options = def.options.as_deref().unwrap_or_default();
            if options.iter().any(|o| o == &value) {
                Ok(InputValue::Select(value))
            } else {
                Err(DprocError::ValidationError {
                    field: def.name.clone(),
                    issue: format!("'{}' is not one of {}", value, options.join(", ")),
                })
            }
        }
        InputKind::File => match raw {
            Value::String(s) if !s.trim().is_empty() => {
                Ok(InputValue::FileRef(PathBuf::from(s.trim())))
            }
            other => Err(type_error(json_type_name(other))),
        },
        InputKind::Array => match raw {
            Value::Array(items) => Ok(InputValue::List(items.clone())),
            other => Err(type_error(json_type_name(other))),
        },
    }
}

/// Checks the definition's `maxSize` bound: characters for text, elements
/// for arrays.
fn exceeds_max_size(def: &InputDefinition, value: &InputValue) -> Option<String> {
    let max = def.max_size?;
    let size = match value {
        InputValue::Text(s) | InputValue::Select(s) => s.chars().count() as u64,
        InputValue::List(items) => items.len() as u64,
        _ => return None,
    };
    (size > max).then(|| format!("exceeds the maximum size of {}", max))
}

/// Scalars coerce to string; compound values do not.
fn coerce_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Ensures the output directory exists and is writable, by writing and
/// removing a probe file.
fn probe_output_dir(dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create directory: {}", e))?;
    let probe = dir.join(format!(".dproc-probe-{}", std::process::id()));
    std::fs::write(&probe, b"probe").map_err(|e| format!("directory is not writable: {}", e))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Specification Entity
//!
//! The parsed form of a pipeline's `spec.yml`: name and version, the ordered
//! input definitions the validator normalizes against, the output formats the
//! executor may render, and optional template variables. Immutable for the
//! duration of an execution.
//!
//! Structural validation lives here ([`PipelineSpec::validate`]) so the
//! loader, the `validate` CLI command, and the HTTP pipelines endpoint all
//! report the same violations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Declared type of a pipeline input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Number,
    Select,
    Boolean,
    File,
    Array,
}

impl Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputKind::Text => "text",
            InputKind::Number => "number",
            InputKind::Select => "select",
            InputKind::Boolean => "boolean",
            InputKind::File => "file",
            InputKind::Array => "array",
        };
        write!(f, "{}", s)
    }
}

/// One declared input of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InputKind,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values; required when `kind` is `select`.
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// The parsed `spec.yml` of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub pipeline: PipelineMeta,
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl PipelineSpec {
    /// Finds an input definition by name.
    pub fn input(&self, name: &str) -> Option<&InputDefinition> {
        self.inputs.iter().find(|def| def.name == name)
    }

    /// Accumulates structural violations without failing fast. An empty
    /// result means the spec is well-formed.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.pipeline.name.trim().is_empty() {
            violations.push("pipeline.name must not be empty".to_string());
        }
        if self.outputs.is_empty() {
            violations.push("outputs must declare at least one format".to_string());
        }

        let mut seen = std::collections::BTreeSet::new();
        for def in &self.inputs {
            if !seen.insert(def.name.as_str()) {
                violations.push(format!("duplicate input name '{}'", def.name));
            }
            if def.kind == InputKind::Select
                && def.options.as_ref().map(|o| o.is_empty()).unwrap_or(true)
            {
                violations.push(format!(
                    "select input '{}' must declare a non-empty options list",
                    def.name
                ));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_yaml(body: &str) -> PipelineSpec {
        serde_yaml::from_str(body).unwrap()
    }

    #[test]
    fn test_parses_full_spec() {
        let spec = spec_yaml(
            r#"
pipeline:
  name: market-report
  version: "2.1"
  description: Quarterly market summary
inputs:
  - name: companyName
    type: text
    label: Company Name
    required: true
  - name: maxResults
    type: number
    label: Max Results
    default: 25
  - name: region
    type: select
    label: Region
    options: [emea, apac, amer]
outputs: [mdx, html, pdf]
variables:
  tone: concise
"#,
        );
        assert_eq!(spec.pipeline.name, "market-report");
        assert_eq!(spec.inputs.len(), 3);
        assert_eq!(spec.input("maxResults").unwrap().kind, InputKind::Number);
        assert!(spec.validate().is_empty());
    }

    #[test]
    fn test_select_requires_options() {
        let spec = spec_yaml(
            r#"
pipeline:
  name: demo
inputs:
  - name: region
    type: select
    label: Region
outputs: [mdx]
"#,
        );
        let violations = spec.validate();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("region"));
    }

    #[test]
    fn test_duplicate_inputs_and_empty_outputs() {
        let spec = spec_yaml(
            r#"
pipeline:
  name: demo
inputs:
  - name: topic
    type: text
    label: Topic
  - name: topic
    type: text
    label: Topic Again
outputs: []
"#,
        );
        let violations = spec.validate();
        assert!(violations.iter().any(|v| v.contains("duplicate input")));
        assert!(violations.iter().any(|v| v.contains("outputs")));
    }
}

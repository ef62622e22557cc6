// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # LLM Provider Port
//!
//! The enrichment stage's view of an LLM provider: a single `generate`
//! capability that turns a rendered prompt into `{text, json?, usage}`.
//! Provider adapters live in the infrastructure layer and map HTTP failure
//! modes onto the error taxonomy; the executor drives the fallback policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::LlmProviderKind;
use crate::error::DprocError;

/// One generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// When set, the adapter attempts to extract the first JSON object from
    /// the completion into [`LlmOutcome::json`].
    pub extract_json: bool,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// The result of one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmOutcome {
    pub text: String,
    #[serde(default)]
    pub json: Option<Value>,
    pub usage: LlmUsage,
    pub model: String,
    pub provider: LlmProviderKind,
}

/// Port implemented by each provider adapter.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> LlmProviderKind;

    async fn generate(&self, request: &LlmRequest) -> Result<LlmOutcome, DprocError>;
}

/// Extracts the first balanced JSON object from a completion.
///
/// Providers wrap JSON in prose and code fences inconsistently; scanning
/// for the first balanced `{...}` and parsing it is the most tolerant
/// approach that still rejects malformed payloads.
pub fn extract_first_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_plain_object() {
        let text = r#"{"score": 7, "summary": "ok"}"#;
        assert_eq!(extract_first_json(text), Some(json!({"score": 7, "summary": "ok"})));
    }

    #[test]
    fn test_extracts_from_fenced_prose() {
        let text = "Here is the result:\n```json\n{\"a\": {\"b\": 1}}\n```\nanything after";
        assert_eq!(extract_first_json(text), Some(json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_handles_braces_inside_strings() {
        let text = r#"noise {"note": "curly } inside", "n": 2} tail"#;
        assert_eq!(
            extract_first_json(text),
            Some(json!({"note": "curly } inside", "n": 2}))
        );
    }

    #[test]
    fn test_rejects_unbalanced() {
        assert_eq!(extract_first_json("{\"a\": 1"), None);
        assert_eq!(extract_first_json("no json here"), None);
    }
}

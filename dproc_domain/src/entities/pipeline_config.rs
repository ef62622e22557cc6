// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Configuration Entity
//!
//! The parsed form of a pipeline's `config.yml`: which LLM provider and
//! model to call, an optional fallback, and the execution policy (queue
//! priority, pipeline-wide timeout, retry budget) that the submitter and
//! worker honor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::DprocError;
use crate::value_objects::JobPriority;

/// The supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl LlmProviderKind {
    pub const ALL: [LlmProviderKind; 3] = [
        LlmProviderKind::OpenAi,
        LlmProviderKind::Anthropic,
        LlmProviderKind::Google,
    ];

    /// Environment variable consulted before the secrets file.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "OPENAI_API_KEY",
            LlmProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            LlmProviderKind::Google => "GOOGLE_API_KEY",
        }
    }

    /// Key used in the secrets file's `apiKeys` object.
    pub fn secrets_key(&self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::Anthropic => "anthropic",
            LlmProviderKind::Google => "google",
        }
    }
}

impl Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.secrets_key())
    }
}

impl FromStr for LlmProviderKind {
    type Err = DprocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProviderKind::OpenAi),
            "anthropic" => Ok(LlmProviderKind::Anthropic),
            "google" => Ok(LlmProviderKind::Google),
            other => Err(DprocError::ValidationError {
                field: "llm.provider".to_string(),
                issue: format!("'{}' is not one of openai, anthropic, google", other),
            }),
        }
    }
}

/// Fallback provider used once when the primary call fails with a
/// non-auth, non-cancellation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmFallback {
    pub provider: LlmProviderKind,
    pub model: String,
}

/// The `llm` block of `config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub fallback: Option<LlmFallback>,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// The optional `execution` block of `config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub queue_priority: JobPriority,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_timeout_minutes() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            queue_priority: JobPriority::Normal,
            timeout_minutes: default_timeout_minutes(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

/// The parsed `config.yml` of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub execution: ExecutionPolicy,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl PipelineConfig {
    /// Accumulates structural violations without failing fast.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            violations.push(format!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            ));
        }
        if self.llm.max_tokens == 0 {
            violations.push("llm.maxTokens must be greater than 0".to_string());
        }
        if self.llm.model.trim().is_empty() {
            violations.push("llm.model must not be empty".to_string());
        }
        if let Some(fallback) = &self.llm.fallback {
            if fallback.model.trim().is_empty() {
                violations.push("llm.fallback.model must not be empty".to_string());
            }
        }
        if self.execution.timeout_minutes == 0 {
            violations.push("execution.timeoutMinutes must be greater than 0".to_string());
        }
        violations
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # LLM Provider Adapters
//!
//! One adapter per supported provider, all implementing the domain's
//! [`LlmProvider`] port. The adapters share the wall-clock budget (120 s per
//! call) and the HTTP failure mapping:
//!
//! | Condition | Taxonomy variant |
//! |---|---|
//! | 401 | `ApiKeyInvalid` |
//! | 429 | `RateLimit` (with `Retry-After` when present) |
//! | 403 mentioning quota/billing | `QuotaExceeded` |
//! | other non-success | `ApiResponseError` |
//! | client timeout | `ApiTimeout` |
//!
//! Fallback handling is not here: the executor decides when the configured
//! fallback provider gets its one retry.

mod anthropic;
mod google;
mod openai;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use dproc_domain::{DprocError, LlmProvider, LlmProviderKind};

/// Wall-clock budget for one provider call.
pub const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn build_http_client() -> Result<reqwest::Client, DprocError> {
    reqwest::Client::builder()
        .timeout(LLM_CALL_TIMEOUT)
        .build()
        .map_err(|e| DprocError::wrap("llm-client", e))
}

/// Maps a non-success provider response onto the taxonomy.
pub(crate) fn map_http_failure(
    provider: LlmProviderKind,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> DprocError {
    match status.as_u16() {
        401 => DprocError::ApiKeyInvalid {
            provider: provider.to_string(),
        },
        429 => DprocError::RateLimit {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        },
        403 if body.to_ascii_lowercase().contains("quota")
            || body.to_ascii_lowercase().contains("billing") =>
        {
            DprocError::QuotaExceeded {
                provider: provider.to_string(),
            }
        }
        code => DprocError::ApiResponseError {
            provider: provider.to_string(),
            status: code,
            detail: truncate(body, 300),
        },
    }
}

/// Maps a transport-level reqwest error onto the taxonomy.
pub(crate) fn map_transport_failure(provider: LlmProviderKind, err: reqwest::Error) -> DprocError {
    if err.is_timeout() {
        DprocError::ApiTimeout {
            provider: provider.to_string(),
            elapsed_secs: LLM_CALL_TIMEOUT.as_secs(),
        }
    } else {
        DprocError::ApiResponseError {
            provider: provider.to_string(),
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            detail: err.to_string(),
        }
    }
}

pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// Builds the adapter for a provider kind.
pub fn create_provider(
    kind: LlmProviderKind,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, DprocError> {
    Ok(match kind {
        LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key)?),
        LlmProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key)?),
        LlmProviderKind::Google => Arc::new(GoogleProvider::new(api_key)?),
    })
}

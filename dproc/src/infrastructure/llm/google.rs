// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Google adapter: `POST /v1beta/models/{model}:generateContent`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dproc_domain::{
    extract_first_json, DprocError, LlmOutcome, LlmProvider, LlmProviderKind, LlmRequest, LlmUsage,
};

use super::{build_http_client, map_http_failure, map_transport_failure, retry_after_secs};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i64,
    #[serde(default)]
    candidates_token_count: i64,
    #[serde(default)]
    total_token_count: i64,
}

impl GoogleProvider {
    pub fn new(api_key: String) -> Result<Self, DprocError> {
        Ok(Self {
            client: build_http_client()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Points the adapter at a different endpoint; used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::Google
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmOutcome, DprocError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &request.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_failure(self.kind(), e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_failure(self.kind(), status, retry_after, &text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| map_transport_failure(self.kind(), e))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(DprocError::ApiResponseError {
                provider: self.kind().to_string(),
                status: status.as_u16(),
                detail: "response carried no candidates".to_string(),
            });
        }

        let usage = parsed.usage_metadata.unwrap_or_default();
        let json = request.extract_json.then(|| extract_first_json(&text)).flatten();

        Ok(LlmOutcome {
            json,
            usage: LlmUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
            model: request.model.clone(),
            provider: self.kind(),
            text,
        })
    }
}

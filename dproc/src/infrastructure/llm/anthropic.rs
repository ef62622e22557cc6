// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Anthropic adapter: `POST /v1/messages`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dproc_domain::{
    extract_first_json, DprocError, LlmOutcome, LlmProvider, LlmProviderKind, LlmRequest, LlmUsage,
};

use super::{build_http_client, map_http_failure, map_transport_failure, retry_after_secs};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

impl AnthropicProvider {
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
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::Anthropic
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmOutcome, DprocError> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| map_transport_failure(self.kind(), e))?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(DprocError::ApiResponseError {
                provider: self.kind().to_string(),
                status: status.as_u16(),
                detail: "response carried no text content".to_string(),
            });
        }

        let usage = parsed.usage.unwrap_or_default();
        let json = request.extract_json.then(|| extract_first_json(&text)).flatten();

        Ok(LlmOutcome {
            json,
            usage: LlmUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
            },
            model: parsed.model,
            provider: self.kind(),
            text,
        })
    }
}

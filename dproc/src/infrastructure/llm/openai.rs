// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! OpenAI adapter: `POST /v1/chat/completions`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dproc_domain::{
    extract_first_json, DprocError, LlmOutcome, LlmProvider, LlmProviderKind, LlmRequest, LlmUsage,
};

use super::{build_http_client, map_http_failure, map_transport_failure, retry_after_secs};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    model: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

impl OpenAiProvider {
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
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::OpenAi
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmOutcome, DprocError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| map_transport_failure(self.kind(), e))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DprocError::ApiResponseError {
                provider: self.kind().to_string(),
                status: status.as_u16(),
                detail: "response carried no completion".to_string(),
            })?;

        let usage = parsed.usage.unwrap_or_default();
        let json = request.extract_json.then(|| extract_first_json(&text)).flatten();

        Ok(LlmOutcome {
            json,
            usage: LlmUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            model: parsed.model,
            provider: self.kind(),
            text,
        })
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Common Test Helpers
//!
//! A full in-process harness: temp workspace with a scaffolded pipeline,
//! SQLite store, in-memory queue, and a scripted LLM provider instead of
//! the HTTP adapters.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use dproc::application::use_cases::init_pipeline;
use dproc::application::services::ProviderFactory;
use dproc::infrastructure::config::{SecretsStore, Settings};
use dproc::AppContext;
use dproc_domain::{
    DprocError, LlmOutcome, LlmProvider, LlmProviderKind, LlmRequest, LlmUsage,
};

/// One scripted provider response.
pub enum Step {
    Ok(&'static str),
    Err(DprocError),
}

/// Scripted provider shared by every `create()` call: steps pop in order,
/// and an empty script falls back to a canned success.
pub struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<LlmProviderKind>>,
    delay: Mutex<Duration>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    /// Makes every subsequent call take this long; for cancellation tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<LlmProviderKind> {
        self.calls.lock().clone()
    }
}

struct ScriptedProviderHandle {
    kind: LlmProviderKind,
    shared: Arc<ScriptedLlm>,
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProviderHandle {
    fn kind(&self) -> LlmProviderKind {
        self.kind
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmOutcome, DprocError> {
        let delay = *self.shared.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.shared.calls.lock().push(self.kind);

        let step = self.shared.steps.lock().pop_front();
        match step {
            Some(Step::Err(err)) => Err(err),
            Some(Step::Ok(text)) => Ok(self.outcome(request, text)),
            None => Ok(self.outcome(request, "Scripted report. {\"summary\": \"ok\"}")),
        }
    }
}

impl ScriptedProviderHandle {
    fn outcome(&self, request: &LlmRequest, text: &str) -> LlmOutcome {
        LlmOutcome {
            text: text.to_string(),
            json: dproc_domain::extract_first_json(text),
            usage: LlmUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
            model: request.model.clone(),
            provider: self.kind,
        }
    }
}

/// Factory wrapper so every created provider shares one script.
pub struct SharedScriptFactory(pub Arc<ScriptedLlm>);

impl ProviderFactory for SharedScriptFactory {
    fn create(
        &self,
        kind: LlmProviderKind,
        _api_key: String,
    ) -> Result<Arc<dyn LlmProvider>, DprocError> {
        Ok(Arc::new(ScriptedProviderHandle {
            kind,
            shared: self.0.clone(),
        }))
    }
}

/// The assembled harness.
pub struct Harness {
    pub dir: TempDir,
    pub ctx: Arc<AppContext>,
    pub llm: Arc<ScriptedLlm>,
}

impl Harness {
    /// Workspace with the scaffolded `demo` pipeline and keys for every
    /// provider.
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_workspace(dir.path());
        init_pipeline(&settings, "demo").unwrap();

        let mut secrets = SecretsStore::load(dir.path().join("secrets.json")).unwrap();
        for kind in LlmProviderKind::ALL {
            secrets.set_api_key(kind, format!("test-key-{}", kind)).unwrap();
        }

        let llm = ScriptedLlm::new();
        let ctx = AppContext::build_with(
            settings,
            Arc::new(secrets),
            Arc::new(SharedScriptFactory(llm.clone())),
        )
        .await
        .unwrap();

        Self {
            dir,
            ctx: Arc::new(ctx),
            llm,
        }
    }

    /// Rewrites the demo pipeline's spec.
    pub fn write_spec(&self, body: &str) {
        std::fs::write(
            self.dir.path().join("pipelines/demo/spec.yml"),
            body,
        )
        .unwrap();
    }

    /// Rewrites the demo pipeline's config.
    pub fn write_config(&self, body: &str) {
        std::fs::write(
            self.dir.path().join("pipelines/demo/config.yml"),
            body,
        )
        .unwrap();
    }

    /// A submit request for the demo pipeline.
    pub fn request(&self, inputs: serde_json::Value, format: &str) -> dproc::application::services::JobRequest {
        dproc::application::services::JobRequest {
            pipeline_name: "demo".to_string(),
            inputs,
            output_format: format.to_string(),
            priority: None,
            user_id: None,
            source: "web".to_string(),
        }
    }

    /// Default inputs accepted by the scaffolded spec.
    pub fn inputs(&self) -> serde_json::Value {
        json!({"topic": "AI"})
    }
}

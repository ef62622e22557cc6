// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Composition Root
//!
//! Constructs every component once at startup and threads the handles into
//! the surfaces. No lazy singletons, no process-global mutable state: a
//! command that needs the store gets it from here, and tests build their
//! own context with stub ports.

use std::sync::Arc;

use dproc_domain::{DprocError, ExecutionRepository, JobQueue, TemplateRenderer};

use crate::application::services::{
    CancellationRegistry, HttpProviderFactory, JobSubmitter, ProviderFactory, StagedExecutor,
};
use crate::infrastructure::config::{SecretsStore, Settings};
use crate::infrastructure::loader::PipelineLoader;
use crate::infrastructure::processors::ProcessorRegistry;
use crate::infrastructure::queue::create_job_queue;
use crate::infrastructure::repositories::create_execution_repository;
use crate::infrastructure::templating::MiniJinjaRenderer;

/// Shared handles for every surface.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub secrets: Arc<SecretsStore>,
    pub store: Arc<dyn ExecutionRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub loader: Arc<PipelineLoader>,
    pub registry: Arc<ProcessorRegistry>,
    pub cancellations: Arc<CancellationRegistry>,
    pub submitter: Arc<JobSubmitter>,
    pub executor: Arc<StagedExecutor>,
}

impl AppContext {
    /// Wires the production components from settings.
    pub async fn build(settings: Settings) -> Result<Self, DprocError> {
        let secrets = Arc::new(SecretsStore::load_default()?);
        Self::build_with(settings, secrets, Arc::new(HttpProviderFactory)).await
    }

    /// Wiring with injectable secrets and provider factory; tests use this
    /// to swap scripted providers in.
    pub async fn build_with(
        settings: Settings,
        secrets: Arc<SecretsStore>,
        providers: Arc<dyn ProviderFactory>,
    ) -> Result<Self, DprocError> {
        let settings = Arc::new(settings);
        let store = create_execution_repository(&settings).await?;
        let queue = create_job_queue(&settings).await?;
        let registry = Arc::new(ProcessorRegistry::with_builtins());
        let loader = Arc::new(PipelineLoader::new(settings.pipelines_dir(), registry.clone()));
        let renderer: Arc<dyn TemplateRenderer> = Arc::new(MiniJinjaRenderer::new());
        let cancellations = Arc::new(CancellationRegistry::new());

        let executor = Arc::new(StagedExecutor::new(
            store.clone(),
            loader.clone(),
            secrets.clone(),
            settings.clone(),
            renderer,
            providers,
            cancellations.clone(),
        ));
        let submitter = Arc::new(JobSubmitter::new(
            store.clone(),
            queue.clone(),
            loader.clone(),
            secrets.clone(),
            settings.clone(),
            cancellations.clone(),
        ));

        Ok(Self {
            settings,
            secrets,
            store,
            queue,
            loader,
            registry,
            cancellations,
            submitter,
            executor,
        })
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # CLI Command Handlers
//!
//! Thin handlers over the application services; all real work goes through
//! the same components the HTTP surface uses. Errors propagate to `main`,
//! which renders `userMessage`, `code`, and numbered fixes to stderr and
//! exits 1.

use std::sync::Arc;

use serde_json::Value;

use dproc_bootstrap::cli::{Cli, Commands};
use dproc_bootstrap::shutdown::ShutdownCoordinator;
use dproc_bootstrap::signals::install_signal_handlers;
use dproc_domain::{DprocError, ExecutionFilter, JobPriority, LlmProviderKind};

use crate::application::services::JobRequest;
use crate::application::use_cases::{init_pipeline, run_pipeline};
use crate::context::AppContext;
use crate::infrastructure::config::{SecretsStore, Settings};
use crate::infrastructure::loader::PipelineLoader;
use crate::infrastructure::processors::ProcessorRegistry;
use crate::infrastructure::runtime::{WorkerPool, WorkerPoolConfig};
use crate::presentation::http;

fn parse_inputs(raw: &str) -> Result<Value, DprocError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DprocError::ValidationError {
        field: "input".to_string(),
        issue: format!("not valid JSON: {}", e),
    })?;
    if !value.is_object() {
        return Err(DprocError::ValidationError {
            field: "input".to_string(),
            issue: "must be a JSON object".to_string(),
        });
    }
    Ok(value)
}

fn standalone_loader(settings: &Settings) -> PipelineLoader {
    PipelineLoader::new(
        settings.pipelines_dir(),
        Arc::new(ProcessorRegistry::with_builtins()),
    )
}

/// Dispatches one parsed CLI invocation.
pub async fn run_command(cli: Cli, settings: Settings) -> Result<(), DprocError> {
    match cli.command {
        Commands::Init { name } => {
            let root = init_pipeline(&settings, &name)?;
            println!("Created pipeline '{}' at {}", name, root.display());
            println!("Next: dproc validate {} && dproc run {}", name, name);
            Ok(())
        }

        Commands::List => {
            let loader = standalone_loader(&settings);
            let pipelines = loader.list_pipelines()?;
            if pipelines.is_empty() {
                println!("No pipelines in {}", settings.pipelines_dir().display());
                return Ok(());
            }
            for summary in pipelines {
                let marker = if summary.valid { "ok " } else { "BAD" };
                let description = summary
                    .spec
                    .as_ref()
                    .and_then(|s| s.pipeline.description.clone())
                    .unwrap_or_default();
                println!("{}  {:<24} {}", marker, summary.name, description);
            }
            Ok(())
        }

        Commands::Validate { name } => {
            let loader = standalone_loader(&settings);
            let validation = loader.validate_pipeline(&name);
            if validation.valid {
                println!("Pipeline '{}' is valid", name);
                Ok(())
            } else {
                Err(DprocError::InvalidPipeline {
                    name,
                    violations: validation.errors,
                })
            }
        }

        Commands::Run { name, input, format } => {
            let inputs = parse_inputs(&input)?;
            let ctx = Arc::new(AppContext::build(settings).await?);
            let record = run_pipeline(ctx.executor.clone(), &name, inputs, &format).await?;
            println!("Execution {} completed", record.id);
            if let Some(path) = &record.output_path {
                println!("Report: {}", path);
            }
            if let Some(path) = &record.bundle_path {
                println!("Bundle: {}", path);
            }
            if let Some(tokens) = record.tokens_used {
                println!("Tokens: {}", tokens);
            }
            Ok(())
        }

        Commands::Execute {
            name,
            input,
            format,
            priority,
            user,
        } => {
            let inputs = parse_inputs(&input)?;
            let priority: JobPriority = priority.parse()?;
            let ctx = Arc::new(AppContext::build(settings).await?);
            let receipt = ctx
                .submitter
                .submit(JobRequest {
                    pipeline_name: name,
                    inputs,
                    output_format: format,
                    priority: Some(priority),
                    user_id: user,
                    source: "cli".to_string(),
                })
                .await?;
            println!("Submitted: execution {} (job {})", receipt.execution_id, receipt.job_id);
            println!("Track it with: dproc history");
            Ok(())
        }

        Commands::History { name, limit } => {
            let ctx = Arc::new(AppContext::build(settings).await?);
            let records = ctx
                .store
                .list(ExecutionFilter {
                    pipeline_name: name,
                    limit,
                    ..Default::default()
                })
                .await?;
            if records.is_empty() {
                println!("No executions recorded");
                return Ok(());
            }
            for record in records {
                println!(
                    "{}  {:<10} {:<20} {:>8}ms  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.status.to_string(),
                    record.pipeline_name,
                    record.execution_time_ms.unwrap_or_default(),
                    record.id,
                );
                if let Some(error) = &record.error {
                    println!("    error: {}", error);
                }
            }
            Ok(())
        }

        Commands::Stats { name } => {
            let ctx = Arc::new(AppContext::build(settings).await?);
            let stats = ctx.store.stats(name.as_deref()).await?;
            if stats.is_empty() {
                println!("No statistics yet");
                return Ok(());
            }
            for row in stats {
                println!("{}", row.pipeline_name);
                println!("  executions: {} total, {} ok, {} failed", row.total_executions, row.successful_executions, row.failed_executions);
                println!("  avg time:   {:.0}ms", row.avg_execution_time_ms);
                println!("  tokens:     {}", row.total_tokens_used);
                if let Some(last) = row.last_executed_at {
                    println!("  last run:   {}", last.format("%Y-%m-%d %H:%M:%S"));
                }
            }
            Ok(())
        }

        Commands::Configure { provider, api_key } => {
            let provider: LlmProviderKind = provider.parse()?;
            let mut secrets = SecretsStore::load_default()?;
            secrets.set_api_key(provider, api_key)?;
            println!("Stored {} API key in {}", provider, secrets.path().display());
            Ok(())
        }

        Commands::Worker { concurrency } => {
            let concurrency = concurrency.unwrap_or(settings.worker_concurrency);
            let ctx = Arc::new(AppContext::build(settings).await?);

            let coordinator = Arc::new(ShutdownCoordinator::default());
            install_signal_handlers(coordinator.clone());

            let pool = Arc::new(WorkerPool::new(
                ctx.queue.clone(),
                ctx.executor.clone(),
                ctx.cancellations.clone(),
                WorkerPoolConfig {
                    concurrency,
                    ..Default::default()
                },
            ));
            pool.run(coordinator.handle()).await
        }

        Commands::Serve { addr } => {
            let ctx = Arc::new(AppContext::build(settings).await?);

            let coordinator = Arc::new(ShutdownCoordinator::default());
            install_signal_handlers(coordinator.clone());

            http::serve(ctx, &addr, coordinator.handle()).await
        }
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # HTTP Surface
//!
//! A thin JSON wrapper around the submitter and the store. All error
//! responses use the taxonomy serialization `{error, code, fixes?}`;
//! nothing here re-implements core behavior.
//!
//! | Method & Path | Handler |
//! |---|---|
//! | POST `/execute` | submit a job |
//! | GET `/executions/{id}` | status with progress mapping |
//! | GET `/history` | filtered record list |
//! | POST `/jobs/{id}/cancel` | cancellation protocol entry |
//! | GET `/pipelines` / `/pipelines/{name}` | loader reads |
//! | GET `/stats` | aggregate statistics |

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use dproc_bootstrap::shutdown::ShutdownHandle;
use dproc_domain::{DprocError, ExecutionFilter, ExecutionId, ExecutionRecord, JobPriority};

use crate::application::services::JobRequest;
use crate::context::AppContext;

/// Taxonomy error as an HTTP response.
struct ApiError(DprocError);

impl From<DprocError> for ApiError {
    fn from(err: DprocError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match err.code() {
            "NOT_FOUND" | "PIPELINE_NOT_FOUND" => StatusCode::NOT_FOUND,
            _ => match err.category() {
                "validation" | "pipeline" | "api" => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        let fixes = err.fixes();
        let mut body = json!({
            "error": err.user_message(),
            "code": err.code(),
        });
        if !fixes.is_empty() {
            body["fixes"] = json!(fixes);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteBody {
    pipeline_name: String,
    #[serde(default)]
    inputs: Value,
    #[serde(default = "default_format")]
    output_format: String,
    #[serde(default)]
    priority: Option<JobPriority>,
    #[serde(default)]
    user_id: Option<String>,
}

fn default_format() -> String {
    "mdx".to_string()
}

async fn execute(State(ctx): State<Arc<AppContext>>, Json(body): Json<ExecuteBody>) -> ApiResult {
    let receipt = ctx
        .submitter
        .submit(JobRequest {
            pipeline_name: body.pipeline_name,
            inputs: body.inputs,
            output_format: body.output_format,
            priority: body.priority,
            user_id: body.user_id,
            source: "web".to_string(),
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "executionId": receipt.execution_id,
        "jobId": receipt.job_id,
    })))
}

fn status_body(record: &ExecutionRecord) -> Value {
    json!({
        "status": {
            "id": record.id,
            "status": record.status,
            "progress": record.status.progress_percent(),
            "outputPath": record.output_path,
            "error": record.error,
            "metadata": {
                "pipelineName": record.pipeline_name,
                "priority": record.priority,
                "createdAt": record.created_at,
                "startedAt": record.started_at,
                "completedAt": record.completed_at,
                "executionTime": record.execution_time_ms,
                "tokensUsed": record.tokens_used,
                "userOutputPath": record.user_output_path,
                "bundlePath": record.bundle_path,
            },
        }
    })
}

async fn execution_status(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = ExecutionId::from_string(id);
    let record = ctx
        .store
        .get(&id)
        .await?
        .ok_or_else(|| DprocError::NotFound { id: id.to_string() })?;
    Ok(Json(status_body(&record)))
}

#[derive(Deserialize)]
struct HistoryQuery {
    pipeline: Option<String>,
    status: Option<String>,
    user: Option<String>,
    limit: Option<usize>,
}

async fn history(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let status = query.status.as_deref().map(str::parse).transpose()?;
    let filter = ExecutionFilter {
        pipeline_name: query.pipeline,
        user_id: query.user,
        status,
        limit: query.limit.unwrap_or(dproc_domain::DEFAULT_LIST_LIMIT),
    };
    let executions = ctx.store.list(filter).await?;
    Ok(Json(json!({ "executions": executions })))
}

async fn cancel(State(ctx): State<Arc<AppContext>>, Path(id): Path<String>) -> ApiResult {
    let id = ExecutionId::from_string(id);
    ctx.submitter.cancel(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn list_pipelines(State(ctx): State<Arc<AppContext>>) -> ApiResult {
    let pipelines = ctx.loader.list_pipelines()?;
    Ok(Json(json!({ "pipelines": pipelines })))
}

async fn show_pipeline(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> ApiResult {
    let spec = ctx.loader.load_spec(&name)?;
    let config = ctx.loader.load_config(&name).ok();
    let validation = ctx.loader.validate_pipeline(&name);
    Ok(Json(json!({
        "spec": spec,
        "config": config,
        "validation": validation,
    })))
}

#[derive(Deserialize)]
struct StatsQuery {
    pipeline: Option<String>,
}

async fn stats(State(ctx): State<Arc<AppContext>>, Query(query): Query<StatsQuery>) -> ApiResult {
    let stats = ctx.store.stats(query.pipeline.as_deref()).await?;
    let body = match query.pipeline {
        Some(_) => json!({ "stats": stats.first() }),
        None => json!({ "stats": stats }),
    };
    Ok(Json(body))
}

/// Builds the router.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/executions/{id}", get(execution_status))
        .route("/history", get(history))
        .route("/jobs/{id}/cancel", post(cancel))
        .route("/pipelines", get(list_pipelines))
        .route("/pipelines/{name}", get(show_pipeline))
        .route("/stats", get(stats))
        .with_state(ctx)
}

/// Serves the surface until the shutdown signal.
pub async fn serve(
    ctx: Arc<AppContext>,
    addr: &str,
    shutdown: ShutdownHandle,
) -> Result<(), DprocError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DprocError::processing("http", format!("cannot bind {}: {}", addr, e)))?;
    info!(addr, "http surface listening");

    let app = router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_signal().await })
        .await
        .map_err(|e| DprocError::processing("http", format!("server error: {}", e)))
}

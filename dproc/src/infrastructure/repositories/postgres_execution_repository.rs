// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Postgres Execution Store
//!
//! The server-grade backend, selected when `DATABASE_URL` starts with
//! `postgres://` or `postgresql://`. Same contract as the SQLite backend;
//! the notable difference is explicit row locking: `update_status` takes
//! `FOR UPDATE` locks on the execution row and the stats row so concurrent
//! terminal transitions across worker processes serialize per pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use dproc_domain::{
    DprocError, ExecutionFilter, ExecutionId, ExecutionRecord, ExecutionRepository,
    ExecutionStatus, JobId, PipelineStats, StatusPatch,
};

use super::schema::POSTGRES_SCHEMA;

/// Postgres-backed execution repository.
pub struct PostgresExecutionRepository {
    pool: PgPool,
}

fn db_err(context: &str, err: sqlx::Error) -> DprocError {
    DprocError::storage(format!("{}: {}", context, err))
}

fn parse_json(value: &str, column: &str) -> Result<serde_json::Value, DprocError> {
    serde_json::from_str(value)
        .map_err(|e| DprocError::storage(format!("bad JSON in {}: {}", column, e)))
}

fn row_to_record(row: &PgRow) -> Result<ExecutionRecord, DprocError> {
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let inputs: String = row.get("inputs");

    Ok(ExecutionRecord {
        id: ExecutionId::from_string(row.get::<String, _>("id")),
        job_id: JobId::from_string(row.get::<String, _>("job_id")),
        pipeline_name: row.get("pipeline_name"),
        user_id: row.get("user_id"),
        inputs: parse_json(&inputs, "inputs")?,
        output_format: row.get("output_format"),
        status: status.parse()?,
        priority: priority.parse()?,
        output_path: row.get("output_path"),
        user_output_path: row.get("user_output_path"),
        bundle_path: row.get("bundle_path"),
        processor_metadata: row
            .get::<Option<String>, _>("processor_metadata")
            .map(|v| parse_json(&v, "processor_metadata"))
            .transpose()?,
        llm_metadata: row
            .get::<Option<String>, _>("llm_metadata")
            .map(|v| parse_json(&v, "llm_metadata"))
            .transpose()?,
        execution_time_ms: row.get("execution_time_ms"),
        tokens_used: row.get("tokens_used"),
        error: row.get("error"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        started_at: row.get::<Option<DateTime<Utc>>, _>("started_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
    })
}

fn row_to_stats(row: &PgRow) -> PipelineStats {
    PipelineStats {
        pipeline_name: row.get("pipeline_name"),
        total_executions: row.get("total_executions"),
        successful_executions: row.get("successful_executions"),
        failed_executions: row.get("failed_executions"),
        avg_execution_time_ms: row.get("avg_execution_time_ms"),
        timed_executions: row.get("timed_executions"),
        total_tokens_used: row.get("total_tokens_used"),
        last_executed_at: row.get::<Option<DateTime<Utc>>, _>("last_executed_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

impl PostgresExecutionRepository {
    /// Connects and applies the schema.
    pub async fn connect(url: &str) -> Result<Self, DprocError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| db_err("failed to connect to postgres", e))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), DprocError> {
        for statement in POSTGRES_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("failed to apply schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), DprocError> {
        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                id, job_id, pipeline_name, user_id, inputs, output_format,
                status, priority, output_path, user_output_path, bundle_path,
                processor_metadata, llm_metadata, execution_time_ms,
                tokens_used, error, created_at, started_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                      $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.job_id.as_str())
        .bind(&record.pipeline_name)
        .bind(&record.user_id)
        .bind(serde_json::to_string(&record.inputs)?)
        .bind(&record.output_format)
        .bind(record.status.to_string())
        .bind(record.priority.to_string())
        .bind(&record.output_path)
        .bind(&record.user_output_path)
        .bind(&record.bundle_path)
        .bind(
            record
                .processor_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(record.llm_metadata.as_ref().map(serde_json::to_string).transpose()?)
        .bind(record.execution_time_ms)
        .bind(record.tokens_used)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(DprocError::DuplicateId {
                id: record.id.to_string(),
            }),
            Err(e) => Err(db_err("failed to insert execution", e)),
        }
    }

    async fn update_status(
        &self,
        id: &ExecutionId,
        new_status: ExecutionStatus,
        patch: StatusPatch,
    ) -> Result<ExecutionRecord, DprocError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("failed to begin transaction", e))?;

        let row = sqlx::query("SELECT * FROM executions WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_err("failed to load execution", e))?
            .ok_or_else(|| DprocError::NotFound { id: id.to_string() })?;

        let mut record = row_to_record(&row)?;
        record.apply(new_status, patch, now)?;

        sqlx::query(
            r#"
            UPDATE executions SET
                status = $1, output_path = $2, user_output_path = $3,
                bundle_path = $4, processor_metadata = $5, llm_metadata = $6,
                execution_time_ms = $7, tokens_used = $8, error = $9,
                started_at = $10, completed_at = $11
            WHERE id = $12
            "#,
        )
        .bind(record.status.to_string())
        .bind(&record.output_path)
        .bind(&record.user_output_path)
        .bind(&record.bundle_path)
        .bind(
            record
                .processor_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(record.llm_metadata.as_ref().map(serde_json::to_string).transpose()?)
        .bind(record.execution_time_ms)
        .bind(record.tokens_used)
        .bind(&record.error)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("failed to update execution", e))?;

        if new_status.is_terminal() {
            // Lock the per-pipeline aggregate row so concurrent terminal
            // transitions across processes serialize.
            let stats_row =
                sqlx::query("SELECT * FROM pipeline_stats WHERE pipeline_name = $1 FOR UPDATE")
                    .bind(&record.pipeline_name)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| db_err("failed to load pipeline stats", e))?;

            let mut stats = match stats_row {
                Some(row) => row_to_stats(&row),
                None => PipelineStats::new(record.pipeline_name.clone(), now),
            };
            stats.record_terminal(new_status, record.execution_time_ms, record.tokens_used, now);

            sqlx::query(
                r#"
                INSERT INTO pipeline_stats (
                    pipeline_name, total_executions, successful_executions,
                    failed_executions, avg_execution_time_ms, timed_executions,
                    total_tokens_used, last_executed_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (pipeline_name) DO UPDATE SET
                    total_executions = EXCLUDED.total_executions,
                    successful_executions = EXCLUDED.successful_executions,
                    failed_executions = EXCLUDED.failed_executions,
                    avg_execution_time_ms = EXCLUDED.avg_execution_time_ms,
                    timed_executions = EXCLUDED.timed_executions,
                    total_tokens_used = EXCLUDED.total_tokens_used,
                    last_executed_at = EXCLUDED.last_executed_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&stats.pipeline_name)
            .bind(stats.total_executions)
            .bind(stats.successful_executions)
            .bind(stats.failed_executions)
            .bind(stats.avg_execution_time_ms)
            .bind(stats.timed_executions)
            .bind(stats.total_tokens_used)
            .bind(stats.last_executed_at)
            .bind(stats.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("failed to update pipeline stats", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_err("failed to commit transaction", e))?;

        Ok(record)
    }

    async fn get(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>, DprocError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to query execution", e))?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn find_by_job_id(&self, job_id: &JobId) -> Result<Option<ExecutionRecord>, DprocError> {
        let row = sqlx::query("SELECT * FROM executions WHERE job_id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to query execution by job id", e))?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn list(&self, filter: ExecutionFilter) -> Result<Vec<ExecutionRecord>, DprocError> {
        let mut sql = String::from("SELECT * FROM executions WHERE 1 = 1");
        let mut arg = 0;
        if filter.pipeline_name.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND pipeline_name = ${}", arg));
        }
        if filter.user_id.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND user_id = ${}", arg));
        }
        if filter.status.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND status = ${}", arg));
        }
        arg += 1;
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", arg));

        let mut query = sqlx::query(&sql);
        if let Some(pipeline_name) = &filter.pipeline_name {
            query = query.bind(pipeline_name);
        }
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.to_string());
        }
        query = query.bind(filter.limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("failed to list executions", e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn stats(&self, pipeline_name: Option<&str>) -> Result<Vec<PipelineStats>, DprocError> {
        let rows = match pipeline_name {
            Some(name) => sqlx::query("SELECT * FROM pipeline_stats WHERE pipeline_name = $1")
                .bind(name)
                .fetch_all(&self.pool)
                .await,
            None => {
                sqlx::query("SELECT * FROM pipeline_stats ORDER BY total_executions DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| db_err("failed to query pipeline stats", e))?;
        Ok(rows.iter().map(row_to_stats).collect())
    }

    async fn close(&self) -> Result<(), DprocError> {
        self.pool.close().await;
        Ok(())
    }
}

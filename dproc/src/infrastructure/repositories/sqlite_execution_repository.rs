// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Execution Store
//!
//! The embedded backend: a single database file under the workspace,
//! suitable for single-process development and the CLI's `run` path. The
//! Postgres backend implements the identical contract for production.
//!
//! ## Concurrency
//!
//! `update_status` runs read-modify-write inside one transaction. SQLite
//! serializes writers at the database level, which also serializes the
//! Welford fold on `pipeline_stats`, so each terminal transition is counted
//! exactly once even with a pool of workers on one host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use dproc_domain::{
    DprocError, ExecutionFilter, ExecutionId, ExecutionRecord, ExecutionRepository,
    ExecutionStatus, JobId, PipelineStats, StatusPatch,
};

use super::schema::SQLITE_SCHEMA;

/// SQLite-backed execution repository.
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

fn db_err(context: &str, err: sqlx::Error) -> DprocError {
    DprocError::storage(format!("{}: {}", context, err))
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, DprocError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DprocError::storage(format!("bad timestamp in {}: {}", column, e)))
}

fn parse_opt_timestamp(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>, DprocError> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

fn parse_json(value: &str, column: &str) -> Result<serde_json::Value, DprocError> {
    serde_json::from_str(value)
        .map_err(|e| DprocError::storage(format!("bad JSON in {}: {}", column, e)))
}

fn row_to_record(row: &SqliteRow) -> Result<ExecutionRecord, DprocError> {
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let inputs: String = row.get("inputs");
    let created_at: String = row.get("created_at");

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
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: parse_opt_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_opt_timestamp(row.get("completed_at"), "completed_at")?,
    })
}

fn row_to_stats(row: &SqliteRow) -> Result<PipelineStats, DprocError> {
    let updated_at: String = row.get("updated_at");
    Ok(PipelineStats {
        pipeline_name: row.get("pipeline_name"),
        total_executions: row.get("total_executions"),
        successful_executions: row.get("successful_executions"),
        failed_executions: row.get("failed_executions"),
        avg_execution_time_ms: row.get("avg_execution_time_ms"),
        timed_executions: row.get("timed_executions"),
        total_tokens_used: row.get("total_tokens_used"),
        last_executed_at: parse_opt_timestamp(row.get("last_executed_at"), "last_executed_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

impl SqliteExecutionRepository {
    /// Opens (creating if needed) the database file and applies the schema.
    pub async fn connect(path: &std::path::Path) -> Result<Self, DprocError> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| db_err("failed to open sqlite database", e))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// In-memory database; used by tests and the ephemeral `run` path.
    ///
    /// A single connection keeps the whole database on one handle; a pool
    /// of `:memory:` connections would each see a different database.
    pub async fn in_memory() -> Result<Self, DprocError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| db_err("failed to create in-memory database", e))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), DprocError> {
        for statement in SQLITE_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("failed to apply schema", e))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), DprocError> {
        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                id, job_id, pipeline_name, user_id, inputs, output_format,
                status, priority, output_path, user_output_path, bundle_path,
                processor_metadata, llm_metadata, execution_time_ms,
                tokens_used, error, created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        .bind(record.created_at.to_rfc3339())
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
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

        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
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
                status = ?, output_path = ?, user_output_path = ?,
                bundle_path = ?, processor_metadata = ?, llm_metadata = ?,
                execution_time_ms = ?, tokens_used = ?, error = ?,
                started_at = ?, completed_at = ?
            WHERE id = ?
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
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("failed to update execution", e))?;

        // Fold terminal transitions into the aggregate row inside the same
        // transaction; the DAG guarantees this happens once per execution.
        if new_status.is_terminal() {
            let stats_row = sqlx::query("SELECT * FROM pipeline_stats WHERE pipeline_name = ?")
                .bind(&record.pipeline_name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_err("failed to load pipeline stats", e))?;

            let mut stats = match stats_row {
                Some(row) => row_to_stats(&row)?,
                None => PipelineStats::new(record.pipeline_name.clone(), now),
            };
            stats.record_terminal(new_status, record.execution_time_ms, record.tokens_used, now);

            sqlx::query(
                r#"
                INSERT INTO pipeline_stats (
                    pipeline_name, total_executions, successful_executions,
                    failed_executions, avg_execution_time_ms, timed_executions,
                    total_tokens_used, last_executed_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(pipeline_name) DO UPDATE SET
                    total_executions = excluded.total_executions,
                    successful_executions = excluded.successful_executions,
                    failed_executions = excluded.failed_executions,
                    avg_execution_time_ms = excluded.avg_execution_time_ms,
                    timed_executions = excluded.timed_executions,
                    total_tokens_used = excluded.total_tokens_used,
                    last_executed_at = excluded.last_executed_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&stats.pipeline_name)
            .bind(stats.total_executions)
            .bind(stats.successful_executions)
            .bind(stats.failed_executions)
            .bind(stats.avg_execution_time_ms)
            .bind(stats.timed_executions)
            .bind(stats.total_tokens_used)
            .bind(stats.last_executed_at.map(|t| t.to_rfc3339()))
            .bind(stats.updated_at.to_rfc3339())
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
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to query execution", e))?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn find_by_job_id(&self, job_id: &JobId) -> Result<Option<ExecutionRecord>, DprocError> {
        let row = sqlx::query("SELECT * FROM executions WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to query execution by job id", e))?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn list(&self, filter: ExecutionFilter) -> Result<Vec<ExecutionRecord>, DprocError> {
        let mut sql = String::from("SELECT * FROM executions WHERE 1 = 1");
        if filter.pipeline_name.is_some() {
            sql.push_str(" AND pipeline_name = ?");
        }
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

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
            Some(name) => sqlx::query("SELECT * FROM pipeline_stats WHERE pipeline_name = ?")
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
        rows.iter().map(row_to_stats).collect()
    }

    async fn close(&self) -> Result<(), DprocError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dproc_domain::JobPriority;
    use serde_json::json;

    async fn repo() -> SqliteExecutionRepository {
        SqliteExecutionRepository::in_memory().await.unwrap()
    }

    fn record(n: u32) -> ExecutionRecord {
        let job_id = JobId::from_string(format!("web-{}-suffix", n));
        ExecutionRecord::new_queued(
            ExecutionId::for_job(&job_id, n as i64),
            job_id,
            "demo",
            Some("u-1".to_string()),
            json!({"topic": "AI"}),
            "html",
            JobPriority::Normal,
            Utc::now() + chrono::Duration::milliseconds(n as i64),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let repo = repo().await;
        let rec = record(1);
        repo.insert(&rec).await.unwrap();

        let loaded = repo.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.job_id, rec.job_id);
        assert_eq!(loaded.status, ExecutionStatus::Queued);
        assert_eq!(loaded.inputs, json!({"topic": "AI"}));

        let by_job = repo.find_by_job_id(&rec.job_id).await.unwrap().unwrap();
        assert_eq!(by_job.id, rec.id);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let repo = repo().await;
        let rec = record(1);
        repo.insert(&rec).await.unwrap();
        let err = repo.insert(&rec).await.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_ID");
    }

    #[tokio::test]
    async fn test_update_status_enforces_dag() {
        let repo = repo().await;
        let rec = record(1);
        repo.insert(&rec).await.unwrap();

        // queued -> completed is illegal
        let err = repo
            .update_status(&rec.id, ExecutionStatus::Completed, StatusPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_TRANSITION");

        let processing = repo
            .update_status(&rec.id, ExecutionStatus::Processing, StatusPatch::default())
            .await
            .unwrap();
        assert!(processing.started_at.is_some());

        let completed = repo
            .update_status(
                &rec.id,
                ExecutionStatus::Completed,
                StatusPatch {
                    output_path: Some("output/reports/x.html".into()),
                    tokens_used: Some(420),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(completed.execution_time_ms.is_some());
        assert!(completed.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = repo().await;
        let err = repo
            .update_status(
                &ExecutionId::from_string("exec-0-none"),
                ExecutionStatus::Processing,
                StatusPatch::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_terminal_transition_updates_stats_once() {
        let repo = repo().await;
        for n in 1..=3 {
            let rec = record(n);
            repo.insert(&rec).await.unwrap();
            repo.update_status(&rec.id, ExecutionStatus::Processing, StatusPatch::default())
                .await
                .unwrap();
            let status = if n == 3 {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Completed
            };
            let patch = if status == ExecutionStatus::Failed {
                StatusPatch::with_error("boom")
            } else {
                StatusPatch {
                    output_path: Some("output/reports/x.html".into()),
                    tokens_used: Some(100),
                    ..Default::default()
                }
            };
            repo.update_status(&rec.id, status, patch).await.unwrap();
        }

        let stats = repo.stats(Some("demo")).await.unwrap();
        assert_eq!(stats.len(), 1);
        let stats = &stats[0];
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert_eq!(stats.total_tokens_used, 200);
        assert!(stats.last_executed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_filters_and_order() {
        let repo = repo().await;
        for n in 1..=5 {
            repo.insert(&record(n)).await.unwrap();
        }

        let all = repo.list(ExecutionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        // created_at descending
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let limited = repo
            .list(ExecutionFilter {
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let queued = repo
            .list(ExecutionFilter {
                status: Some(ExecutionStatus::Queued),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(queued.len(), 5);

        let none = repo
            .list(ExecutionFilter {
                pipeline_name: Some("other".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}

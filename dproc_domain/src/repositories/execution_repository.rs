// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Store Port
//!
//! The only shared mutable resource of the core. Backends (embedded SQLite
//! for single-process development, Postgres for production) implement an
//! identical contract; only durability and concurrency characteristics
//! differ.
//!
//! ## Contract highlights
//!
//! - `insert` fails with `DuplicateId` when `id` or `job_id` collide
//! - `update_status` enforces the transition DAG atomically with its sparse
//!   patch, failing with `NotFound` / `IllegalTransition`
//! - Terminal transitions fold the execution into `pipeline_stats` in the
//!   same transaction, so concurrent terminal transitions for one pipeline
//!   serialize and each is counted exactly once

use async_trait::async_trait;

use crate::entities::{ExecutionRecord, ExecutionStatus, PipelineStats, StatusPatch};
use crate::error::DprocError;
use crate::value_objects::{ExecutionId, JobId};

/// Default page size for `list`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Filter for `list`: all fields are conjunctive.
#[derive(Debug, Clone)]
pub struct ExecutionFilter {
    pub pipeline_name: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            pipeline_name: None,
            user_id: None,
            status: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

/// Durable execution-record store port.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Inserts a fresh record. Fails with `DuplicateId` if `id` or `job_id`
    /// already exist.
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), DprocError>;

    /// Applies a status transition and sparse patch atomically, returning
    /// the updated record. Terminal transitions also update the pipeline's
    /// aggregate row.
    async fn update_status(
        &self,
        id: &ExecutionId,
        new_status: ExecutionStatus,
        patch: StatusPatch,
    ) -> Result<ExecutionRecord, DprocError>;

    async fn get(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>, DprocError>;

    /// Lookup by the unique `job_id` index; the executor's redelivery
    /// idempotency path.
    async fn find_by_job_id(&self, job_id: &JobId) -> Result<Option<ExecutionRecord>, DprocError>;

    /// Lists records matching the filter, sorted by `created_at` descending.
    async fn list(&self, filter: ExecutionFilter) -> Result<Vec<ExecutionRecord>, DprocError>;

    /// Aggregate statistics. With a pipeline name, at most one row; without,
    /// every row sorted by `total_executions` descending.
    async fn stats(&self, pipeline_name: Option<&str>) -> Result<Vec<PipelineStats>, DprocError>;

    async fn close(&self) -> Result<(), DprocError>;
}

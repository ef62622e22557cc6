// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Execution Store Schema
//!
//! Two logical tables shared by both backends:
//!
//! - `executions` - one row per execution attempt, keyed by `id`, with a
//!   unique index on `job_id` (the redelivery idempotency lookup) and
//!   secondary indexes on the filterable columns
//! - `pipeline_stats` - one aggregate row per pipeline name
//!
//! Timestamps are RFC 3339 text on SQLite and `timestamptz` on Postgres;
//! JSON payloads are text on both. The DDL is idempotent so startup can
//! apply it unconditionally.

/// SQLite DDL.
pub const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL UNIQUE,
        pipeline_name TEXT NOT NULL,
        user_id TEXT,
        inputs TEXT NOT NULL,
        output_format TEXT NOT NULL,
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        output_path TEXT,
        user_output_path TEXT,
        bundle_path TEXT,
        processor_metadata TEXT,
        llm_metadata TEXT,
        execution_time_ms INTEGER,
        tokens_used INTEGER,
        error TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_executions_pipeline_name ON executions(pipeline_name)",
    "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
    "CREATE INDEX IF NOT EXISTS idx_executions_created_at ON executions(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_stats (
        pipeline_name TEXT PRIMARY KEY,
        total_executions INTEGER NOT NULL DEFAULT 0,
        successful_executions INTEGER NOT NULL DEFAULT 0,
        failed_executions INTEGER NOT NULL DEFAULT 0,
        avg_execution_time_ms REAL NOT NULL DEFAULT 0,
        timed_executions INTEGER NOT NULL DEFAULT 0,
        total_tokens_used INTEGER NOT NULL DEFAULT 0,
        last_executed_at TEXT,
        updated_at TEXT NOT NULL
    )
    "#,
];

/// Postgres DDL.
pub const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL UNIQUE,
        pipeline_name TEXT NOT NULL,
        user_id TEXT,
        inputs TEXT NOT NULL,
        output_format TEXT NOT NULL,
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        output_path TEXT,
        user_output_path TEXT,
        bundle_path TEXT,
        processor_metadata TEXT,
        llm_metadata TEXT,
        execution_time_ms BIGINT,
        tokens_used BIGINT,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_executions_pipeline_name ON executions(pipeline_name)",
    "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
    "CREATE INDEX IF NOT EXISTS idx_executions_created_at ON executions(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_stats (
        pipeline_name TEXT PRIMARY KEY,
        total_executions BIGINT NOT NULL DEFAULT 0,
        successful_executions BIGINT NOT NULL DEFAULT 0,
        failed_executions BIGINT NOT NULL DEFAULT 0,
        avg_execution_time_ms DOUBLE PRECISION NOT NULL DEFAULT 0,
        timed_executions BIGINT NOT NULL DEFAULT 0,
        total_tokens_used BIGINT NOT NULL DEFAULT 0,
        last_executed_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

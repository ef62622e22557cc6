// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Execution store backends: embedded SQLite and server-grade Postgres
//! behind the one domain port.

mod postgres_execution_repository;
mod schema;
mod sqlite_execution_repository;

pub use postgres_execution_repository::PostgresExecutionRepository;
pub use sqlite_execution_repository::SqliteExecutionRepository;

use std::sync::Arc;

use dproc_domain::{DprocError, ExecutionRepository};

use super::config::{Settings, StoreBackend};

/// Builds the execution repository the settings select.
pub async fn create_execution_repository(
    settings: &Settings,
) -> Result<Arc<dyn ExecutionRepository>, DprocError> {
    match &settings.store {
        StoreBackend::Sqlite => {
            if let Some(parent) = settings.sqlite_path().parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DprocError::storage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
            let repo = SqliteExecutionRepository::connect(&settings.sqlite_path()).await?;
            Ok(Arc::new(repo))
        }
        StoreBackend::Postgres { url } => {
            let repo = PostgresExecutionRepository::connect(url).await?;
            Ok(Arc::new(repo))
        }
    }
}

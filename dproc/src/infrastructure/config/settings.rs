// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Runtime Settings
//!
//! Process configuration read once at startup from the environment. There
//! is no live reload: a worker that should see new settings is restarted.
//!
//! ## Recognized environment variables
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `DPROC_WORKSPACE` | workspace root | `./workspace` |
//! | `DATABASE_URL` | `postgres://` selects the relational store | embedded SQLite |
//! | `REDIS_HOST` / `REDIS_PORT` / `REDIS_PASSWORD` | queue broker | in-process queue |
//! | `WORKER_CONCURRENCY` | executors per worker process | `2` |
//! | `DEBUG` / `DPROC_DEBUG` | technical detail in CLI output | off |

use std::path::{Path, PathBuf};

use dproc_domain::DprocError;

/// Which execution store backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Embedded SQLite file under the workspace.
    Sqlite,
    /// Server-grade relational store.
    Postgres { url: String },
}

/// Which queue backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process queue; development and tests only.
    Memory,
    /// Redis broker.
    Redis { url: String },
}

/// Immutable process settings, constructed once at startup and threaded
/// into every component that needs them.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_root: PathBuf,
    pub store: StoreBackend,
    pub queue: QueueBackend,
    pub worker_concurrency: usize,
    pub debug: bool,
}

impl Settings {
    /// Reads settings from the environment, with an optional workspace
    /// override from the CLI.
    pub fn from_env(workspace_override: Option<PathBuf>) -> Result<Self, DprocError> {
        let workspace_root = workspace_override
            .or_else(|| std::env::var_os("DPROC_WORKSPACE").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./workspace"));

        let store = match std::env::var("DATABASE_URL") {
            Ok(url) if url.starts_with("postgresql://") || url.starts_with("postgres://") => {
                StoreBackend::Postgres { url }
            }
            _ => StoreBackend::Sqlite,
        };

        let queue = match std::env::var("REDIS_HOST") {
            Ok(host) if !host.is_empty() => {
                let port = std::env::var("REDIS_PORT")
                    .ok()
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(6379);
                let auth = std::env::var("REDIS_PASSWORD")
                    .ok()
                    .filter(|p| !p.is_empty())
                    .map(|p| format!(":{}@", p))
                    .unwrap_or_default();
                QueueBackend::Redis {
                    url: format!("redis://{}{}:{}", auth, host, port),
                }
            }
            _ => QueueBackend::Memory,
        };

        let worker_concurrency = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(2);

        let debug = ["DPROC_DEBUG", "DEBUG"].iter().any(|var| {
            std::env::var(var)
                .map(|v| !v.is_empty() && v != "0" && v.to_ascii_lowercase() != "false")
                .unwrap_or(false)
        });

        Ok(Self {
            workspace_root,
            store,
            queue,
            worker_concurrency,
            debug,
        })
    }

    /// Root of the per-pipeline trees.
    pub fn pipelines_dir(&self) -> PathBuf {
        self.workspace_root.join("pipelines")
    }

    /// Directory of one pipeline.
    pub fn pipeline_dir(&self, name: &str) -> PathBuf {
        self.pipelines_dir().join(name)
    }

    /// Root of execution artifacts for one pipeline.
    pub fn output_dir(&self, pipeline_name: &str) -> PathBuf {
        self.pipeline_dir(pipeline_name).join("output")
    }

    /// Where the processor's JSON bundle for an execution lands.
    pub fn bundles_dir(&self, pipeline_name: &str) -> PathBuf {
        self.output_dir(pipeline_name).join("bundles")
    }

    /// Where rendered reports for an execution land.
    pub fn reports_dir(&self, pipeline_name: &str) -> PathBuf {
        self.output_dir(pipeline_name).join("reports")
    }

    /// Path of the embedded SQLite database.
    pub fn sqlite_path(&self) -> PathBuf {
        self.workspace_root.join("dproc.db")
    }

    /// Builds settings for a throwaway workspace; used by tests.
    pub fn for_workspace(root: &Path) -> Self {
        Self {
            workspace_root: root.to_path_buf(),
            store: StoreBackend::Sqlite,
            queue: QueueBackend::Memory,
            worker_concurrency: 2,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment-variable driven construction is covered indirectly; these
    // tests pin the path layout, which the executor and loader both rely on.

    #[test]
    fn test_path_layout() {
        let settings = Settings::for_workspace(Path::new("/srv/dproc"));
        assert_eq!(
            settings.pipeline_dir("demo"),
            PathBuf::from("/srv/dproc/pipelines/demo")
        );
        assert_eq!(
            settings.bundles_dir("demo"),
            PathBuf::from("/srv/dproc/pipelines/demo/output/bundles")
        );
        assert_eq!(
            settings.reports_dir("demo"),
            PathBuf::from("/srv/dproc/pipelines/demo/output/reports")
        );
    }
}

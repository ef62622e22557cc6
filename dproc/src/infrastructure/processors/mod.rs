// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Processor Infrastructure
//!
//! Processors are compiled in and registered by name; a pipeline's
//! `processor` artifact names the one it wants. This module provides:
//!
//! - [`ProcessorRegistry`] - the build-time name → implementation table
//! - [`ProcessorCache`] - TTL key/value cache scoped per pipeline path
//! - [`FsProcessorContext`] - the filesystem-backed context handed to a
//!   running processor (data files, bundle writes, cache, cancellation)

mod builtin;

pub use builtin::{DatasetProcessor, EchoProcessor};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use dproc_domain::{DprocError, ExecutionId, Processor, ProcessorContext};

/// Build-time registry of processors.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in processors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoProcessor));
        registry.register(Arc::new(DatasetProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.insert(processor.name(), processor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.processors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// TTL key/value cache, scoped per pipeline path. No cross-pipeline
/// sharing: the scope is part of every key.
#[derive(Default)]
pub struct ProcessorCache {
    entries: Mutex<HashMap<(String, String), (Instant, Value)>>,
}

impl ProcessorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let composite = (scope.to_string(), key.to_string());
        match entries.get(&composite) {
            Some((expires_at, value)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(&composite);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, scope: &str, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.insert(
            (scope.to_string(), key.to_string()),
            (Instant::now() + ttl, value),
        );
    }
}

/// Filesystem-backed processor context for one execution.
pub struct FsProcessorContext {
    execution_id: ExecutionId,
    pipeline_name: String,
    /// Scope string for the cache; the pipeline path, so two pipelines with
    /// the same name in different workspaces never share entries.
    cache_scope: String,
    data_dir: PathBuf,
    bundle_dir: PathBuf,
    cache: Arc<ProcessorCache>,
    cancelled: Arc<AtomicBool>,
}

impl FsProcessorContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: ExecutionId,
        pipeline_name: String,
        pipeline_dir: PathBuf,
        data_dir: PathBuf,
        bundle_dir: PathBuf,
        cache: Arc<ProcessorCache>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            execution_id,
            pipeline_name,
            cache_scope: pipeline_dir.display().to_string(),
            data_dir,
            bundle_dir,
            cache,
            cancelled,
        }
    }

    fn safe_data_path(&self, name: &str) -> Result<PathBuf, DprocError> {
        // Reject separators and parent components outright; data files are
        // flat within data/.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(DprocError::processing(
                "data-processor",
                format!("data file name '{}' escapes the data directory", name),
            ));
        }
        Ok(self.data_dir.join(name))
    }
}

#[async_trait]
impl ProcessorContext for FsProcessorContext {
    fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    async fn read_data_file(&self, name: &str) -> Result<String, DprocError> {
        let path = self.safe_data_path(name)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            DprocError::processing(
                "data-processor",
                format!("cannot read data file {}: {}", path.display(), e),
            )
        })
    }

    async fn save_bundle(&self, data: &Value, name: &str) -> Result<PathBuf, DprocError> {
        let dir = self.bundle_dir.join(self.execution_id.as_str());
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            DprocError::processing(
                "data-processor",
                format!("cannot create bundle dir {}: {}", dir.display(), e),
            )
        })?;
        let path = dir.join(name);
        let body = serde_json::to_vec_pretty(data)?;
        tokio::fs::write(&path, body).await.map_err(|e| {
            DprocError::processing(
                "data-processor",
                format!("cannot write bundle {}: {}", path.display(), e),
            )
        })?;
        Ok(path)
    }

    async fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(&self.cache_scope, key)
    }

    async fn cache_put(&self, key: &str, value: Value, ttl: Duration) {
        self.cache.put(&self.cache_scope, key, value, ttl);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn log(&self, message: &str) {
        info!(
            execution_id = %self.execution_id,
            pipeline = %self.pipeline_name,
            "processor: {}",
            message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_builtins() {
        let registry = ProcessorRegistry::with_builtins();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("dataset").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names(), vec!["dataset", "echo"]);
    }

    #[test]
    fn test_cache_ttl_and_scoping() {
        let cache = ProcessorCache::new();
        cache.put("a", "k", json!(1), Duration::from_secs(60));
        assert_eq!(cache.get("a", "k"), Some(json!(1)));
        // Different scope, same key: no sharing.
        assert_eq!(cache.get("b", "k"), None);

        cache.put("a", "gone", json!(2), Duration::from_millis(0));
        assert_eq!(cache.get("a", "gone"), None);
    }

    #[tokio::test]
    async fn test_context_rejects_traversal() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = FsProcessorContext::new(
            ExecutionId::from_string("exec-1-x"),
            "demo".into(),
            dir.path().to_path_buf(),
            dir.path().join("data"),
            dir.path().join("output/bundles"),
            Arc::new(ProcessorCache::new()),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(ctx.read_data_file("../secrets.json").await.is_err());
        assert!(ctx.read_data_file("sub/dir.json").await.is_err());
    }

    #[tokio::test]
    async fn test_context_bundle_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = FsProcessorContext::new(
            ExecutionId::from_string("exec-1-x"),
            "demo".into(),
            dir.path().to_path_buf(),
            dir.path().join("data"),
            dir.path().join("output/bundles"),
            Arc::new(ProcessorCache::new()),
            Arc::new(AtomicBool::new(false)),
        );
        let path = ctx.save_bundle(&json!({"n": 1}), "aux.json").await.unwrap();
        assert!(path.exists());
        assert!(path.display().to_string().contains("exec-1-x"));
    }
}

// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Task Supervision Utilities
//!
//! Supervised concurrent task execution: every spawned worker/maintenance
//! task is logged on start and settle, and its handle must be awaited, so
//! no failure disappears into a detached task.

use tokio::task::JoinHandle;
use tracing::{debug, error};

use dproc_domain::DprocError;

/// Spawns a task whose outcome is logged and whose handle must be awaited.
pub fn spawn_supervised<F, T>(name: &'static str, fut: F) -> JoinHandle<Result<T, DprocError>>
where
    F: std::future::Future<Output = Result<T, DprocError>> + Send + 'static,
    T: Send + 'static,
{
    debug!(task = name, "task starting");

    tokio::spawn(async move {
        let result = fut.await;
        match &result {
            Ok(_) => debug!(task = name, "task completed"),
            Err(e) => error!(task = name, error = %e, "task failed"),
        }
        result
    })
}

/// Awaits a supervised handle, converting panics and runtime cancellation
/// into taxonomy errors instead of losing them.
pub async fn join_supervised<T>(handle: JoinHandle<Result<T, DprocError>>) -> Result<T, DprocError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(DprocError::processing(
            "runtime",
            format!("task panicked: {}", e),
        )),
        Err(e) => Err(DprocError::processing(
            "runtime",
            format!("task join failed: {}", e),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_propagates() {
        let handle = spawn_supervised("ok", async { Ok::<_, DprocError>(7) });
        assert_eq!(join_supervised(handle).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let handle = spawn_supervised("err", async {
            Err::<(), _>(DprocError::queue("boom"))
        });
        assert_eq!(join_supervised(handle).await.unwrap_err().code(), "QUEUE_ERROR");
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let handle: JoinHandle<Result<(), DprocError>> = tokio::spawn(async {
            panic!("kaboom");
        });
        let err = join_supervised(handle).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}

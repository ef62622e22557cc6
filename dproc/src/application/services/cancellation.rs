// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Per-Execution Cancellation
//!
//! Cancellation is a propagated value, not ambient state: every active
//! execution registers a token here, the executor checks it at each stage
//! boundary, and the processor context exposes it to user code. `cancel`
//! from the submitter (or the HTTP surface) trips the token; the executor
//! observes it at the next checkpoint and writes the terminal record.
//!
//! Distinct from process shutdown: the bootstrap coordinator stops the
//! worker pool, while these tokens abort individual executions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use dproc_domain::ExecutionId;

/// Cooperative cancellation token for one execution.
#[derive(Clone)]
pub struct ExecutionToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ExecutionToken {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled; for `select!` races around
    /// long-running calls.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        // Re-check after arming the waiter so a concurrent cancel between
        // the first check and here is not lost.
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// The raw flag, shared with the processor context.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

/// Process-local map of active executions to their tokens.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<ExecutionId, ExecutionToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token for an execution, returning it. Registering the
    /// same id again returns the existing token, so a cancel that raced
    /// registration is not lost.
    pub fn register(&self, id: &ExecutionId) -> ExecutionToken {
        let mut tokens = self.tokens.lock();
        tokens.entry(id.clone()).or_insert_with(ExecutionToken::new).clone()
    }

    /// Trips the token for an execution. Returns `false` when the execution
    /// has no active token (already finished or never started here).
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        let tokens = self.tokens.lock();
        match tokens.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops the token once the execution reached a terminal state.
    pub fn deregister(&self, id: &ExecutionId) {
        self.tokens.lock().remove(id);
    }

    /// Trips every active token; used when the shutdown grace period
    /// expires with executions still in flight.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    pub fn active(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ExecutionId {
        ExecutionId::from_string(s)
    }

    #[test]
    fn test_register_cancel_deregister() {
        let registry = CancellationRegistry::new();
        let token = registry.register(&id("exec-1-a"));
        assert!(!token.is_cancelled());

        assert!(registry.cancel(&id("exec-1-a")));
        assert!(token.is_cancelled());

        registry.deregister(&id("exec-1-a"));
        assert!(!registry.cancel(&id("exec-1-a")));
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = CancellationRegistry::new();
        let token = registry.register(&id("exec-1-a"));
        assert!(registry.cancel(&id("exec-1-a")));
        assert!(registry.cancel(&id("exec-1-a")));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_register_twice_shares_token() {
        let registry = CancellationRegistry::new();
        let first = registry.register(&id("exec-1-a"));
        let second = registry.register(&id("exec-1-a"));
        first.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let registry = CancellationRegistry::new();
        let token = registry.register(&id("exec-1-a"));
        let waiter = token.clone();

        let task = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel();
        assert!(task.await.unwrap());
    }

    #[test]
    fn test_cancel_all() {
        let registry = CancellationRegistry::new();
        let a = registry.register(&id("exec-1-a"));
        let b = registry.register(&id("exec-1-b"));
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}

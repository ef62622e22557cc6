// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! Manages graceful shutdown across application components: the worker pool
//! stops claiming, in-flight executions get a grace period, then the
//! process exits.
//!
//! One coordinator per process. Components hold a [`ShutdownHandle`] and
//! either poll `is_shutting_down()` in their loops or await
//! `wait_for_signal()` inside a `select!`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Default grace period before forced shutdown.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Cloneable handle observing the shutdown signal.
#[derive(Clone)]
pub struct ShutdownHandle {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// Non-blocking check.
    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is initiated. Returns immediately if it
    /// already was.
    pub async fn wait_for_signal(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The sender lives as long as the coordinator; a closed channel
        // also means the process is going down.
        let _ = rx.wait_for(|signalled| *signalled).await;
    }
}

/// Coordinates graceful shutdown with a grace period.
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    grace_period: Duration,
    initiated: AtomicBool,
    drained: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            grace_period,
            initiated: AtomicBool::new(false),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Hands out an observer handle.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle { rx: self.tx.subscribe() }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Signals every handle. Idempotent.
    pub fn initiate(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!(grace_period = ?self.grace_period, "initiating graceful shutdown");
            let _ = self.tx.send(true);
        }
    }

    /// Called by the component that finished draining in-flight work.
    pub fn mark_drained(&self) {
        self.drained.notify_waiters();
    }

    /// Waits for the drain notification or the grace period, whichever
    /// comes first. Returns `true` when the drain completed in time.
    pub async fn wait_for_drain(&self) -> bool {
        tokio::select! {
            _ = self.drained.notified() => {
                tracing::info!("shutdown drained gracefully");
                true
            }
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!("shutdown grace period expired, forcing exit");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_observes_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let handle = coordinator.handle();
        assert!(!handle.is_shutting_down());

        coordinator.initiate();
        assert!(handle.is_shutting_down());
        // Must resolve immediately.
        handle.wait_for_signal().await;
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.initiate();
        coordinator.initiate();
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_wait_for_signal_across_tasks() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));
        let handle = coordinator.handle();

        let waiter = tokio::spawn(async move {
            handle.wait_for_signal().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.initiate();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_drain_beats_grace_period() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));
        coordinator.initiate();

        let c = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.mark_drained();
        });

        assert!(coordinator.wait_for_drain().await);
    }

    #[tokio::test]
    async fn test_grace_period_expiry() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(30));
        coordinator.initiate();
        assert!(!coordinator.wait_for_drain().await);
    }
}

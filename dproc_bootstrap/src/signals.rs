// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! Wires SIGINT/SIGTERM (ctrl-c on all platforms) to the shutdown
//! coordinator. Long-running commands (`worker`, `serve`) install this once
//! at startup; short commands exit before signals matter.

use std::sync::Arc;

use crate::shutdown::ShutdownCoordinator;

/// Spawns a background task that initiates shutdown on the first
/// termination signal. A second signal aborts the process immediately.
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        wait_for_termination().await;
        coordinator.initiate();

        wait_for_termination().await;
        tracing::warn!("second termination signal, aborting");
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

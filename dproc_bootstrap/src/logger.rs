// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logger
//!
//! Tracing initialization plus a minimal logging abstraction for the
//! bootstrap phase, before the application wiring exists.
//!
//! The application itself logs through `tracing` macros directly; this
//! trait only exists so bootstrap code paths (argument validation, wiring
//! failures) stay testable without a global subscriber.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Filter precedence: `RUST_LOG` if set, otherwise `debug` when the debug
/// flag is on, otherwise `info`. Safe to call once per process; later calls
/// are ignored.
pub fn init_tracing(debug: bool) {
    let default_directive = if debug { "dproc=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Bootstrap logging abstraction.
pub trait BootstrapLogger: Send + Sync {
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Routes bootstrap logs through tracing.
pub struct ConsoleLogger {
    prefix: String,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self::with_prefix("bootstrap")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapLogger for ConsoleLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "bootstrap", "[{}] {}", self.prefix, message);
    }
}

/// Discards all messages; for tests.
pub struct NoOpLogger;

impl BootstrapLogger for NoOpLogger {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

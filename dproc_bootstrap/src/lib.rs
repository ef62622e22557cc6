// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # Bootstrap Module
//!
//! The bootstrap module sits **outside** the enterprise application layers
//! (domain, application, infrastructure) and provides:
//!
//! - **Argument parsing** - CLI structure and shape-level validation
//! - **Logging** - Tracing subscriber initialization
//! - **Signal handling** - Graceful shutdown on SIGTERM/SIGINT
//! - **Shutdown coordination** - Grace-period draining of in-flight work
//! - **Exit codes** - `0` success / `1` failure mapping
//!
//! ## Architecture Position
//!
//! Bootstrap can reference every layer (it wires them together in `main`),
//! but no enterprise layer may depend on bootstrap. The per-execution
//! cancellation tokens the executor uses live in the application layer;
//! this module only owns process-level shutdown.

pub mod cli;
pub mod exit_code;
pub mod logger;
pub mod shutdown;
pub mod signals;

pub use cli::{parse_and_validate, Cli, Commands, ParseError};
pub use exit_code::{result_to_exit_code, ExitCode};
pub use logger::{init_tracing, BootstrapLogger, ConsoleLogger, NoOpLogger};
pub use shutdown::{ShutdownCoordinator, ShutdownHandle, DEFAULT_GRACE_PERIOD};
pub use signals::install_signal_handlers;

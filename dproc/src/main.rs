// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # dproc binary
//!
//! Entry point: parse and validate arguments (bootstrap), read settings
//! from the environment, initialize tracing, dispatch the command, and map
//! the result to the process exit code. Taxonomy errors render with
//! `userMessage`, `code`, and numbered fixes; technical detail appears only
//! under `--verbose` or `DPROC_DEBUG`.

use dproc::infrastructure::config::Settings;
use dproc::presentation::cli::run_command;
use dproc_bootstrap::{init_tracing, parse_and_validate, result_to_exit_code, ExitCode};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = match parse_and_validate() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::Failure.into();
        }
    };

    let settings = match Settings::from_env(cli.workspace.clone()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", err.to_cli(false));
            return ExitCode::Failure.into();
        }
    };

    let debug = cli.verbose || settings.debug;
    init_tracing(debug);

    let result = run_command(cli, settings).await;
    if let Err(err) = &result {
        eprintln!("{}", err.to_cli(debug));
    }
    result_to_exit_code(&result).into()
}

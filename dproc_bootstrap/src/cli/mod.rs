// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! Bootstrap-layer CLI handling.
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  1. parser::parse_cli()             │  Parse CLI with clap
//! └─────────────────┬───────────────────┘
//!                   v
//! ┌─────────────────────────────────────┐
//! │  2. validate_cli()                  │  Argument validation
//! └─────────────────┬───────────────────┘
//!                   v
//! ┌─────────────────────────────────────┐
//! │  3. Cli (validated)                 │  Handed to the application
//! └─────────────────────────────────────┘
//! ```
//!
//! Validation here is shape-level only (names, ranges); anything that needs
//! the workspace or the store is the application's business.

pub mod parser;

pub use parser::{parse_cli, Cli, Commands};

use thiserror::Error;

/// CLI validation failures, reported before the application starts.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid value for --{arg}: {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("invalid pipeline name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

fn validate_pipeline_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty() || name.len() > 64 {
        return Err(ParseError::InvalidName {
            name: name.to_string(),
            reason: "must be 1-64 characters".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ParseError::InvalidName {
            name: name.to_string(),
            reason: "only alphanumerics, '-' and '_' are allowed".to_string(),
        });
    }
    Ok(())
}

/// Parse and validate CLI arguments.
pub fn parse_and_validate() -> Result<Cli, ParseError> {
    let cli = parse_cli();
    validate_cli(&cli)?;
    Ok(cli)
}

/// Validate parsed CLI arguments.
pub fn validate_cli(cli: &Cli) -> Result<(), ParseError> {
    match &cli.command {
        Commands::Init { name }
        | Commands::Validate { name }
        | Commands::Run { name, .. }
        | Commands::Execute { name, .. } => validate_pipeline_name(name)?,
        Commands::History { name, limit } => {
            if let Some(name) = name {
                validate_pipeline_name(name)?;
            }
            if *limit == 0 || *limit > 1000 {
                return Err(ParseError::InvalidValue {
                    arg: "limit".to_string(),
                    reason: "must be between 1 and 1000".to_string(),
                });
            }
        }
        Commands::Stats { name } => {
            if let Some(name) = name {
                validate_pipeline_name(name)?;
            }
        }
        Commands::Worker { concurrency } => {
            if let Some(n) = concurrency {
                if *n == 0 || *n > 64 {
                    return Err(ParseError::InvalidValue {
                        arg: "concurrency".to_string(),
                        reason: "must be between 1 and 64".to_string(),
                    });
                }
            }
        }
        Commands::Configure { provider, api_key } => {
            if !matches!(provider.as_str(), "openai" | "anthropic" | "google") {
                return Err(ParseError::InvalidValue {
                    arg: "provider".to_string(),
                    reason: "must be one of openai, anthropic, google".to_string(),
                });
            }
            if api_key.trim().is_empty() {
                return Err(ParseError::InvalidValue {
                    arg: "api-key".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Commands::List | Commands::Serve { .. } => {}
    }
    Ok(())
}

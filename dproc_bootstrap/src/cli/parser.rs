// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! CLI structure and clap parsing. Parsing only; validation lives in the
//! parent module so clap concerns stay in one place.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dproc - queue-backed report-generation pipelines
#[derive(Debug, Parser)]
#[command(name = "dproc", version, about, long_about = None)]
pub struct Cli {
    /// Workspace root (overrides DPROC_WORKSPACE)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Include technical error detail and debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scaffold a new pipeline directory
    Init {
        /// Pipeline name
        name: String,
    },

    /// List pipelines in the workspace with their validation state
    List,

    /// Validate one pipeline's layout and schema files
    Validate {
        /// Pipeline name
        name: String,
    },

    /// Run a pipeline synchronously, bypassing the queue
    Run {
        /// Pipeline name
        name: String,

        /// Inputs as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,

        /// Output format
        #[arg(long, default_value = "mdx")]
        format: String,
    },

    /// Submit a pipeline execution to the queue
    Execute {
        /// Pipeline name
        name: String,

        /// Inputs as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,

        /// Output format
        #[arg(long, default_value = "mdx")]
        format: String,

        /// Priority: low, normal, high
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Tag the execution with a user id
        #[arg(long)]
        user: Option<String>,
    },

    /// Show recent executions
    History {
        /// Restrict to one pipeline
        name: Option<String>,

        /// Maximum number of records
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show aggregated pipeline statistics
    Stats {
        /// Restrict to one pipeline
        name: Option<String>,
    },

    /// Store a provider API key in the secrets file
    Configure {
        /// Provider: openai, anthropic, google
        #[arg(long)]
        provider: String,

        /// The API key to store
        #[arg(long)]
        api_key: String,
    },

    /// Run a worker pool against the configured queue
    Worker {
        /// Concurrent executors (overrides WORKER_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Serve the HTTP surface
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: String,
    },
}

/// Parse CLI arguments. Clap handles --help/--version itself.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_execute() {
        let cli = Cli::try_parse_from([
            "dproc", "execute", "demo", "--input", r#"{"topic":"AI"}"#, "--format", "html",
            "--priority", "high",
        ])
        .unwrap();
        match cli.command {
            Commands::Execute { name, format, priority, .. } => {
                assert_eq!(name, "demo");
                assert_eq!(format, "html");
                assert_eq!(priority, "high");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_history_defaults() {
        let cli = Cli::try_parse_from(["dproc", "history"]).unwrap();
        match cli.command {
            Commands::History { name, limit } => {
                assert!(name.is_none());
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_verbose_flag() {
        let cli = Cli::try_parse_from(["dproc", "list", "-v"]).unwrap();
        assert!(cli.verbose);
    }
}

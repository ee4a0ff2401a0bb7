// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `interchange`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "interchange",
    version,
    about = "Shuttle tasks between a remote task broker and local executors.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `interchange.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "interchange.toml")]
    pub config: String,

    /// Endpoint id; overrides `[endpoint].endpoint_id`.
    #[arg(long, value_name = "ID")]
    pub endpoint_id: Option<String>,

    /// JSON file with pre-registered channel descriptors.
    ///
    /// When given, the control service is never contacted.
    #[arg(long, value_name = "PATH")]
    pub reg_info: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `INTERCHANGE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Try registration exactly once instead of following the configured
    /// retry policy.
    #[arg(long)]
    pub single_attempt: bool,

    /// Parse + validate, print the resolved setup, but don't connect.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

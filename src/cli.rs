// src/cli.rs

//! CLI argument parsing using `clap`.

use std::collections::BTreeMap;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `localci`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "localci",
    version,
    about = "Run a resolved CI pipeline locally, honoring stages, needs and retries.",
    long_about = None
)]
pub struct CliArgs {
    /// Jobs to run (exact or base name). Default: every job.
    #[arg(value_name = "JOB")]
    pub jobs: Vec<String>,

    /// Path to the resolved pipeline file (TOML).
    #[arg(long, short = 'f', value_name = "PATH", default_value = ".localci.toml")]
    pub file: String,

    /// Order jobs by `needs` instead of strict stage sequence.
    #[arg(long)]
    pub needs: bool,

    /// Authorize a `when: manual` job to run (repeatable).
    #[arg(long, value_name = "JOB")]
    pub manual: Vec<String>,

    /// Maximum number of jobs running at once.
    #[arg(long, short = 'j', value_name = "N", default_value_t = default_concurrency())]
    pub concurrency: usize,

    /// Only run jobs of this stage.
    #[arg(long, value_name = "STAGE")]
    pub stage: Option<String>,

    /// Override a variable for every job (repeatable).
    #[arg(long = "variable", short = 'v', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Directory jobs run in. Default: the current directory.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<String>,

    /// Shell that runs job scripts as `<shell> -e -c <script>`.
    #[arg(long, value_name = "SHELL", default_value = "sh")]
    pub shell: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOCALCI_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the expanded plan, but don't run anything.
    #[arg(long)]
    pub list: bool,
}

impl CliArgs {
    pub fn variable_overrides(&self) -> BTreeMap<String, String> {
        self.variables.iter().cloned().collect()
    }
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

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

// src/logging.rs

//! `tracing` subscriber for the `localci` binary.
//!
//! The filter comes from, in order:
//! 1. `--log-level`, applied to every target
//! 2. `LOCALCI_LOG`, parsed as `EnvFilter` directives
//!    (e.g. `info,localci::dag=debug`)
//! 3. `info`
//!
//! Logs go to stderr; job output is prefixed and printed on stdout.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "LOCALCI_LOG";

/// Install the global subscriber. Fails if one is already installed or the
/// directives in [`LOG_ENV`] do not parse.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(directive(level)));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| anyhow!("invalid {LOG_ENV} value '{directives}': {e}")),
        None => Ok(EnvFilter::new("info")),
    }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_beats_environment() {
        let filter = build_filter(Some(LogLevel::Debug), Some("error")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn environment_accepts_per_module_directives() {
        let filter = build_filter(None, Some("warn,localci::dag=trace")).unwrap();
        assert!(filter.to_string().contains("localci::dag=trace"));
    }

    #[test]
    fn blank_environment_falls_back_to_info() {
        let filter = build_filter(None, Some("  ")).unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn garbage_directives_are_an_error() {
        assert!(build_filter(None, Some("localci=loudest")).is_err());
    }
}

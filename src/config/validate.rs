// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;

use crate::config::model::{JobConfig, ParallelConfig, PipelineFile, RawPipelineFile, RetryConfig};
use crate::errors::{PipelineError, Result};
use crate::types::When;

/// Highest `retry.max` accepted, as on hosted runners.
pub const MAX_RETRIES: u32 = 2;
/// Highest `parallel` count accepted.
pub const MAX_PARALLEL: u32 = 200;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = crate::errors::PipelineError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_pipeline(&raw)?;
        Ok(PipelineFile::new_unchecked(raw.stages, raw.variables, raw.job))
    }
}

fn validate_raw_pipeline(cfg: &RawPipelineFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_stages(cfg)?;
    for (name, job) in cfg.job.iter() {
        validate_job(&cfg.stages, name, job)?;
    }
    Ok(())
}

fn ensure_has_jobs(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(PipelineError::ConfigError(
            "pipeline must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_stages(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.stages.is_empty() {
        return Err(PipelineError::ConfigError(
            "`stages` must list at least one stage".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for stage in cfg.stages.iter() {
        if !seen.insert(stage.as_str()) {
            return Err(PipelineError::ConfigError(format!(
                "stage '{}' is listed more than once in `stages`",
                stage
            )));
        }
    }
    Ok(())
}

fn validate_job(stages: &[String], name: &str, job: &JobConfig) -> Result<()> {
    if !stages.contains(&job.stage) {
        return Err(PipelineError::UnknownStage(format!(
            "job '{}' uses stage '{}', which is not in `stages`",
            name, job.stage
        )));
    }

    if let Some(retry) = &job.retry {
        let max = match retry {
            RetryConfig::Count(n) => *n,
            RetryConfig::Policy { max, .. } => *max,
        };
        if max > MAX_RETRIES {
            return Err(PipelineError::ConfigError(format!(
                "job '{}' has retry max {} (must be 0..={})",
                name, max, MAX_RETRIES
            )));
        }
    }

    if let Some(parallel) = &job.parallel {
        validate_parallel(name, parallel)?;
    }

    match (job.when, &job.start_in) {
        (When::Delayed, None) => {
            return Err(PipelineError::ConfigError(format!(
                "job '{}' is when:delayed but has no `start_in`",
                name
            )));
        }
        (_, Some(start_in)) => {
            parse_duration(start_in).map_err(|e| {
                PipelineError::ConfigError(format!("job '{}' has invalid start_in: {}", name, e))
            })?;
        }
        _ => {}
    }

    if let Some(timeout) = &job.timeout {
        parse_duration(timeout).map_err(|e| {
            PipelineError::ConfigError(format!("job '{}' has invalid timeout: {}", name, e))
        })?;
    }

    if let Some(pattern) = &job.coverage_regex {
        Regex::new(pattern).map_err(|e| {
            PipelineError::ConfigError(format!(
                "job '{}' has invalid coverage_regex: {}",
                name, e
            ))
        })?;
    }

    Ok(())
}

fn validate_parallel(name: &str, parallel: &ParallelConfig) -> Result<()> {
    match parallel {
        ParallelConfig::Count(n) => {
            if *n == 0 || *n > MAX_PARALLEL {
                return Err(PipelineError::ConfigError(format!(
                    "job '{}' has parallel {} (must be 1..={})",
                    name, n, MAX_PARALLEL
                )));
            }
        }
        ParallelConfig::Matrix { matrix } => {
            if matrix.is_empty() {
                return Err(PipelineError::ConfigError(format!(
                    "job '{}' has an empty parallel matrix",
                    name
                )));
            }
            for entry in matrix.iter() {
                if entry.is_empty() {
                    return Err(PipelineError::ConfigError(format!(
                        "job '{}' has an empty entry in its parallel matrix",
                        name
                    )));
                }
                for (key, value) in entry.iter() {
                    if value.values().is_empty() {
                        return Err(PipelineError::ConfigError(format!(
                            "job '{}' has matrix key '{}' with no values",
                            name, key
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Parse durations like `"500ms"`, `"30s"`, `"10m"`, `"2h"` or several of
/// them separated by whitespace (`"1h 30m"`).
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    for part in s.split_whitespace() {
        total = total
            .checked_add(parse_duration_part(part)?)
            .ok_or_else(|| format!("duration too large: '{}'", s))?;
    }
    Ok(total)
}

fn parse_duration_part(s: &str) -> std::result::Result<Duration, String> {
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration too large: '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1h 30m"), Ok(Duration::from_secs(5400)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("3d").is_err());
        assert!(parse_duration("  ").is_err());
    }

    #[test]
    fn oversized_durations_are_errors_not_panics() {
        assert!(parse_duration("18446744073709551615s 1s").is_err());
        assert!(parse_duration("18446744073709551615h").is_err());
        assert!(parse_duration("5124095576030431h").is_ok());
    }
}

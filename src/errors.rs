// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// A `needs` entry names a job that does not exist.
    #[error("`{source_job}` needs `{target}`, but no such job exists")]
    UnknownNeed { source_job: String, target: String },

    #[error("`{target}` is when:never, but it is needed by `{source_job}`")]
    NeverNeeded { source_job: String, target: String },

    #[error("`{target}` is when:manual, is needed by `{source_job}`, and not specified in --manual")]
    ManualNotAuthorized { source_job: String, target: String },

    #[error("Cycle detected in job graph: {0}")]
    DagCycle(String),

    /// The executor could not establish any job state (e.g. unusable
    /// working directory); the whole run is aborted.
    #[error("Executor setup failed for `{job}`: {reason}")]
    ExecutorSetup { job: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;

// src/config/model.rs

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::types::{ExportWhen, When};

/// Default stage list when a pipeline file does not declare one.
pub fn default_stages() -> Vec<String> {
    [".pre", "build", "test", "deploy", ".post"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Resolved pipeline as read from a TOML file, before semantic validation.
///
/// ```toml
/// stages = ["build", "test"]
///
/// [variables]
/// GLOBAL = "1"
///
/// [job.build]
/// stage = "build"
/// script = ["make"]
///
/// [job.test]
/// stage = "test"
/// script = ["make test"]
/// needs = ["build"]
/// ```
///
/// Job tables keep their declaration order; it is the scheduler's tie-breaker.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    /// Pipeline-wide variables, overridden by each job's own `variables`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub job: IndexMap<String, JobConfig>,
}

/// A pipeline file that passed validation (see `config::validate`).
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub stages: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub job: IndexMap<String, JobConfig>,
}

impl PipelineFile {
    /// Wrap already-validated parts. Prefer `PipelineFile::try_from(raw)`.
    pub fn new_unchecked(
        stages: Vec<String>,
        variables: BTreeMap<String, String>,
        job: IndexMap<String, JobConfig>,
    ) -> Self {
        Self {
            stages,
            variables,
            job,
        }
    }
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobConfig {
    #[serde(default = "default_job_stage")]
    pub stage: String,

    #[serde(default)]
    pub script: Vec<String>,

    #[serde(default)]
    pub after_script: Vec<String>,

    /// Absent means "no needs key"; an empty list is meaningful.
    #[serde(default)]
    pub needs: Option<Vec<NeedConfig>>,

    #[serde(default)]
    pub when: When,

    /// Duration string such as `"30s"` or `"1h 30m"`; required for
    /// `when = "delayed"`.
    #[serde(default)]
    pub start_in: Option<String>,

    #[serde(default)]
    pub allow_failure: bool,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub coverage_regex: Option<String>,

    #[serde(default)]
    pub artifacts: Option<ArtifactsConfig>,

    #[serde(default)]
    pub cache: Option<CacheField>,

    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub parallel: Option<ParallelConfig>,
}

fn default_job_stage() -> String {
    "test".to_string()
}

/// One `needs` entry.
///
/// Variant order matters for untagged matching: tables carrying `project`
/// or `pipeline` must not be mistaken for a plain job reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NeedConfig {
    Name(String),
    Project {
        project: String,
        job: String,
        #[serde(default, rename = "ref")]
        reference: Option<String>,
        #[serde(default)]
        artifacts: Option<bool>,
    },
    Pipeline {
        pipeline: String,
        job: String,
    },
    Job {
        job: String,
        #[serde(default = "default_true")]
        artifacts: bool,
        #[serde(default)]
        optional: bool,
    },
}

fn default_true() -> bool {
    true
}

/// `retry = 2` or `retry = { max = 2, exit_codes = [1] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RetryConfig {
    Count(u32),
    Policy {
        #[serde(default)]
        max: u32,
        #[serde(default)]
        exit_codes: Option<Vec<i32>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub when: ExportWhen,
}

/// `cache` may be a single table or a list of tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CacheField {
    One(CacheConfig),
    Many(Vec<CacheConfig>),
}

impl CacheField {
    pub fn entries(&self) -> Vec<&CacheConfig> {
        match self {
            CacheField::One(c) => vec![c],
            CacheField::Many(list) => list.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_key")]
    pub key: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub when: ExportWhen,
}

fn default_cache_key() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        url: Option<String>,
    },
}

/// `parallel = 3` or `parallel = { matrix = [ { A = ["1", "2"], B = "x" } ] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParallelConfig {
    Count(u32),
    Matrix {
        matrix: Vec<IndexMap<String, MatrixValueConfig>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MatrixValueConfig {
    List(Vec<ScalarConfig>),
    Scalar(ScalarConfig),
}

impl MatrixValueConfig {
    /// Scalars are wrapped into a single-element list.
    pub fn values(&self) -> Vec<String> {
        match self {
            MatrixValueConfig::List(list) => list.iter().map(ScalarConfig::render).collect(),
            MatrixValueConfig::Scalar(s) => vec![s.render()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScalarConfig {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarConfig {
    pub fn render(&self) -> String {
        match self {
            ScalarConfig::String(s) => s.clone(),
            ScalarConfig::Integer(i) => i.to_string(),
            ScalarConfig::Float(f) => f.to_string(),
            ScalarConfig::Bool(b) => b.to_string(),
        }
    }
}

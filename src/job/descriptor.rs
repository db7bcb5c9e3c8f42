// src/job/descriptor.rs

//! Fully resolved job descriptors as consumed by the engine.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::{ExportWhen, When};

/// Canonical job name type used throughout the engine.
pub type JobName = String;

/// One job as handed to the engine by the resolved job source.
///
/// Matrix variants are ordinary descriptors: each owns its own `variables`
/// map and `environment`, so nothing is shared between siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    /// Unique display name (`build: [1/2]` for variants).
    pub name: JobName,
    /// Name before matrix expansion; equal to `name` for plain jobs.
    pub base_name: JobName,
    pub stage: String,
    pub script: Vec<String>,
    pub after_script: Vec<String>,
    /// `None` when the job has no `needs` key at all, `Some(vec![])` for an
    /// explicit empty list.
    pub needs: Option<Vec<Need>>,
    pub when: When,
    /// Delay for `when: delayed` jobs.
    pub start_in: Option<Duration>,
    pub allow_failure: bool,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
    pub coverage_regex: Option<String>,
    pub artifacts: Option<ArtifactsSpec>,
    pub cache: Vec<CacheSpec>,
    pub environment: Option<Environment>,
    pub variables: BTreeMap<String, String>,
    /// Present until the matrix expander has run.
    pub parallel: Option<ParallelSpec>,
    /// Position of an integer `parallel` variant.
    pub node: Option<NodeIndex>,
    /// Ordered matrix assignment of a matrix variant.
    pub matrix: Vec<(String, String)>,
}

impl JobDescriptor {
    /// A plain `on_success` job with no script, no needs and no extras.
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base_name: name.clone(),
            name,
            stage: stage.into(),
            script: Vec::new(),
            after_script: Vec::new(),
            needs: None,
            when: When::OnSuccess,
            start_in: None,
            allow_failure: false,
            retry: RetryPolicy::default(),
            timeout: None,
            coverage_regex: None,
            artifacts: None,
            cache: Vec::new(),
            environment: None,
            variables: BTreeMap::new(),
            parallel: None,
            node: None,
            matrix: Vec::new(),
        }
    }

    /// Whether this descriptor is one variant of a `parallel` job.
    pub fn is_variant(&self) -> bool {
        self.name != self.base_name
    }
}

/// One `needs` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Need {
    /// Dependency on a job of this pipeline, by exact or base name.
    Job {
        job: JobName,
        artifacts: bool,
        optional: bool,
    },
    /// Cross-project or parent-pipeline reference. Not runnable locally;
    /// dropped with a warning while building the graph.
    Unsupported { reference: String },
}

impl Need {
    pub fn job(name: impl Into<String>) -> Self {
        Need::Job {
            job: name.into(),
            artifacts: true,
            optional: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max: u32,
    /// Exit codes that may be retried; `None` means every failure may.
    pub exit_codes: Option<Vec<i32>>,
}

impl RetryPolicy {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            exit_codes: None,
        }
    }

    /// Whether a failure with `exit_code` may consume a retry.
    pub fn is_retryable(&self, exit_code: i32) -> bool {
        match &self.exit_codes {
            Some(codes) => codes.contains(&exit_code),
            None => true,
        }
    }

    /// Whether attempt number `attempt` (1-based) failing with `exit_code`
    /// should be followed by another attempt.
    pub fn should_retry(&self, attempt: u32, exit_code: i32) -> bool {
        attempt <= self.max && self.is_retryable(exit_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactsSpec {
    pub paths: Vec<String>,
    pub when: ExportWhen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    pub key: String,
    pub paths: Vec<String>,
    pub when: ExportWhen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub url: Option<String>,
}

/// `parallel` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParallelSpec {
    /// Replicate the job N times.
    Count(u32),
    /// Each entry expands to the cartesian product of its own values; the
    /// entries' expansions are concatenated.
    Matrix(Vec<MatrixEntry>),
}

/// One map of a `parallel: matrix` list, keys in first-seen order.
///
/// Scalar values are stored as single-element lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixEntry {
    pub keys: Vec<(String, Vec<String>)>,
}

impl MatrixEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, values: &[&str]) -> Self {
        self.keys
            .push((key.into(), values.iter().map(|v| v.to_string()).collect()));
        self
    }
}

/// 1-based position of an integer `parallel` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIndex {
    pub index: u32,
    pub total: u32,
}

// src/config/resolve.rs

//! Turn a validated [`PipelineFile`] into engine-ready [`JobDescriptor`]s.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::model::{
    EnvironmentConfig, JobConfig, NeedConfig, ParallelConfig, PipelineFile, RetryConfig,
};
use crate::config::validate::parse_duration;
use crate::errors::{PipelineError, Result};
use crate::job::{
    ArtifactsSpec, CacheSpec, Environment, JobDescriptor, MatrixEntry, Need, ParallelSpec,
    RetryPolicy,
};

impl PipelineFile {
    /// Descriptors in declaration order, before matrix expansion.
    ///
    /// Variable precedence, lowest first: pipeline `[variables]`, the job's
    /// own `variables`, then operator `overrides` (`--variable KEY=VALUE`).
    pub fn job_descriptors(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<JobDescriptor>> {
        self.job
            .iter()
            .map(|(name, cfg)| self.descriptor_for(name, cfg, overrides))
            .collect()
    }

    fn descriptor_for(
        &self,
        name: &str,
        cfg: &JobConfig,
        overrides: &BTreeMap<String, String>,
    ) -> Result<JobDescriptor> {
        let mut job = JobDescriptor::new(name, cfg.stage.clone());
        job.script = cfg.script.clone();
        job.after_script = cfg.after_script.clone();
        job.needs = cfg
            .needs
            .as_ref()
            .map(|needs| needs.iter().map(need_from_config).collect());
        job.when = cfg.when;
        job.start_in = cfg
            .start_in
            .as_deref()
            .map(|s| duration_field(name, "start_in", s))
            .transpose()?;
        job.allow_failure = cfg.allow_failure;
        job.retry = match &cfg.retry {
            None => RetryPolicy::default(),
            Some(RetryConfig::Count(max)) => RetryPolicy::new(*max),
            Some(RetryConfig::Policy { max, exit_codes }) => RetryPolicy {
                max: *max,
                exit_codes: exit_codes.clone(),
            },
        };
        job.timeout = cfg
            .timeout
            .as_deref()
            .map(|s| duration_field(name, "timeout", s))
            .transpose()?;
        job.coverage_regex = cfg.coverage_regex.clone();
        job.artifacts = cfg.artifacts.as_ref().map(|a| ArtifactsSpec {
            paths: a.paths.clone(),
            when: a.when,
        });
        job.cache = cfg
            .cache
            .as_ref()
            .map(|field| {
                field
                    .entries()
                    .into_iter()
                    .map(|c| CacheSpec {
                        key: c.key.clone(),
                        paths: c.paths.clone(),
                        when: c.when,
                    })
                    .collect()
            })
            .unwrap_or_default();
        job.environment = cfg.environment.as_ref().map(|env| match env {
            EnvironmentConfig::Name(name) => Environment {
                name: name.clone(),
                url: None,
            },
            EnvironmentConfig::Full { name, url } => Environment {
                name: name.clone(),
                url: url.clone(),
            },
        });

        let mut variables = self.variables.clone();
        variables.extend(cfg.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        variables.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        job.variables = variables;

        job.parallel = cfg.parallel.as_ref().map(|p| match p {
            ParallelConfig::Count(n) => ParallelSpec::Count(*n),
            ParallelConfig::Matrix { matrix } => ParallelSpec::Matrix(
                matrix
                    .iter()
                    .map(|entry| MatrixEntry {
                        keys: entry
                            .iter()
                            .map(|(k, v)| (k.clone(), v.values()))
                            .collect(),
                    })
                    .collect(),
            ),
        });

        debug!(job = %name, stage = %job.stage, when = %job.when, "resolved job descriptor");
        Ok(job)
    }
}

fn need_from_config(need: &NeedConfig) -> Need {
    match need {
        NeedConfig::Name(job) => Need::job(job.clone()),
        NeedConfig::Job {
            job,
            artifacts,
            optional,
        } => Need::Job {
            job: job.clone(),
            artifacts: *artifacts,
            optional: *optional,
        },
        NeedConfig::Project {
            project,
            job,
            reference,
            ..
        } => Need::Unsupported {
            reference: format!(
                "project {}@{} job {}",
                project,
                reference.as_deref().unwrap_or("HEAD"),
                job
            ),
        },
        NeedConfig::Pipeline { pipeline, job } => Need::Unsupported {
            reference: format!("pipeline {} job {}", pipeline, job),
        },
    }
}

fn duration_field(job: &str, field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| {
        PipelineError::ConfigError(format!("job '{}' has invalid {}: {}", job, field, e))
    })
}

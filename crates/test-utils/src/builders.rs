#![allow(dead_code)]

use std::collections::HashSet;
use std::time::Duration;

use localci::dag::{BuildOptions, DependencyGraph, Scheduler};
use localci::errors::Result;
use localci::job::{
    Environment, JobDescriptor, MatrixEntry, MatrixExpander, Need, ParallelSpec, RetryPolicy,
};
use localci::types::{SchedulingMode, When};

/// Builder for a set of jobs plus the options needed to turn them into a
/// `DependencyGraph` or a `Scheduler`.
pub struct PipelineBuilder {
    stages: Vec<String>,
    jobs: Vec<JobDescriptor>,
    mode: SchedulingMode,
    manual: HashSet<String>,
}

impl PipelineBuilder {
    /// Pipeline with the usual `build`, `test`, `deploy` stages.
    pub fn new() -> Self {
        Self::with_stages(&["build", "test", "deploy"])
    }

    pub fn with_stages(stages: &[&str]) -> Self {
        Self {
            stages: stages.iter().map(|s| s.to_string()).collect(),
            jobs: Vec::new(),
            mode: SchedulingMode::Stages,
            manual: HashSet::new(),
        }
    }

    pub fn needs_mode(mut self) -> Self {
        self.mode = SchedulingMode::Needs;
        self
    }

    pub fn authorize(mut self, job: &str) -> Self {
        self.manual.insert(job.to_string());
        self
    }

    pub fn job(mut self, job: JobBuilder) -> Self {
        self.jobs.push(job.build());
        self
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Expand matrices and build the graph.
    pub fn try_graph(self) -> Result<DependencyGraph> {
        let expanded = MatrixExpander::expand_all(self.jobs);
        DependencyGraph::build(
            expanded,
            &self.stages,
            &BuildOptions {
                mode: self.mode,
                manual: self.manual,
            },
        )
    }

    pub fn graph(self) -> DependencyGraph {
        self.try_graph()
            .expect("Failed to build valid graph from builder")
    }

    /// Scheduler over every job of the pipeline.
    pub fn scheduler(self, concurrency: usize) -> Scheduler {
        Scheduler::for_all(self.graph(), concurrency)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `JobDescriptor`.
pub struct JobBuilder {
    job: JobDescriptor,
}

impl JobBuilder {
    pub fn new(name: &str, stage: &str) -> Self {
        let mut job = JobDescriptor::new(name, stage);
        job.script = vec![format!("echo {name}")];
        Self { job }
    }

    pub fn script(mut self, lines: &[&str]) -> Self {
        self.job.script = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn after_script(mut self, lines: &[&str]) -> Self {
        self.job.after_script = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Add a hard `needs` entry (creates the key if absent).
    pub fn needs(mut self, job: &str) -> Self {
        self.job.needs.get_or_insert_with(Vec::new).push(Need::job(job));
        self
    }

    pub fn needs_optional(mut self, job: &str) -> Self {
        self.job.needs.get_or_insert_with(Vec::new).push(Need::Job {
            job: job.to_string(),
            artifacts: true,
            optional: true,
        });
        self
    }

    /// `needs: []`.
    pub fn no_needs(mut self) -> Self {
        self.job.needs = Some(Vec::new());
        self
    }

    pub fn when(mut self, when: When) -> Self {
        self.job.when = when;
        self
    }

    pub fn delayed(mut self, start_in: Duration) -> Self {
        self.job.when = When::Delayed;
        self.job.start_in = Some(start_in);
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.job.allow_failure = true;
        self
    }

    pub fn retry(mut self, max: u32) -> Self {
        self.job.retry = RetryPolicy::new(max);
        self
    }

    pub fn retry_on(mut self, max: u32, exit_codes: &[i32]) -> Self {
        self.job.retry = RetryPolicy {
            max,
            exit_codes: Some(exit_codes.to_vec()),
        };
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.job.timeout = Some(timeout);
        self
    }

    pub fn variable(mut self, key: &str, value: &str) -> Self {
        self.job.variables.insert(key.to_string(), value.to_string());
        self
    }

    pub fn parallel(mut self, count: u32) -> Self {
        self.job.parallel = Some(ParallelSpec::Count(count));
        self
    }

    pub fn matrix(mut self, entries: Vec<MatrixEntry>) -> Self {
        self.job.parallel = Some(ParallelSpec::Matrix(entries));
        self
    }

    pub fn coverage_regex(mut self, regex: &str) -> Self {
        self.job.coverage_regex = Some(regex.to_string());
        self
    }

    pub fn environment(mut self, name: &str) -> Self {
        self.job.environment = Some(Environment {
            name: name.to_string(),
            url: None,
        });
        self
    }

    pub fn build(self) -> JobDescriptor {
        self.job
    }
}

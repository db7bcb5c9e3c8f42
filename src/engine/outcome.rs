// src/engine/outcome.rs

//! Reduce per-job terminal statuses to stage and pipeline results.

use std::fmt;
use std::time::Duration;

use crate::dag::{JobInfo, JobStatus, SkipReason};
use crate::engine::JobOutcome;
use crate::job::JobName;

/// Overall result of a stage or of the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Success,
    /// Only allowed failures (`warning`) went wrong.
    PartialFailure,
    Failed,
    Canceled,
    /// Nothing ran (every job skipped or manual).
    Skipped,
}

impl PipelineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Success => "success",
            PipelineStatus::PartialFailure => "partial-failure",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
        }
    }

    /// Process exit code: `warning` alone never makes the run fail.
    pub fn exit_code(self) -> i32 {
        match self {
            PipelineStatus::Success | PipelineStatus::PartialFailure | PipelineStatus::Skipped => 0,
            PipelineStatus::Failed | PipelineStatus::Canceled => 1,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Whether the engine keeps running independent branches after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDecision {
    /// Failures only affect their dependents; everything else keeps going.
    Continue,
    /// No job state can be established; cancel the whole run.
    Abort,
}

/// Drain policy: only fatal executor setup errors stop the run.
pub fn drain_decision(outcome: &JobOutcome) -> DrainDecision {
    match outcome {
        JobOutcome::Fatal(_) => DrainDecision::Abort,
        JobOutcome::Success | JobOutcome::Failed(_) | JobOutcome::Canceled => {
            DrainDecision::Continue
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub name: JobName,
    pub stage: String,
    pub status: JobStatus,
    pub skip_reason: Option<SkipReason>,
    pub allow_failure: bool,
    pub exit_code: Option<i32>,
    /// Attempts actually started (0 if the job never ran).
    pub attempts: u32,
    pub coverage: Option<f64>,
    pub duration: Option<Duration>,
}

impl JobReport {
    fn from_info(info: &JobInfo) -> Self {
        Self {
            name: info.name.clone(),
            stage: info.descriptor.stage.clone(),
            status: info.status(),
            skip_reason: info.skip_reason,
            allow_failure: info.descriptor.allow_failure,
            exit_code: info.exit_code,
            attempts: info.attempt,
            coverage: info.coverage,
            duration: info.duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub name: String,
    pub status: PipelineStatus,
    pub jobs: Vec<JobName>,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    /// Stages that had jobs in this run, in `stages` order.
    pub stages: Vec<StageSummary>,
    /// Jobs in declaration order.
    pub jobs: Vec<JobReport>,
}

impl PipelineResult {
    /// Build the result from the jobs of a finished run.
    pub fn reduce<'a>(stages: &[String], jobs: impl IntoIterator<Item = &'a JobInfo>) -> Self {
        let jobs: Vec<JobReport> = jobs.into_iter().map(JobReport::from_info).collect();

        let stages = stages
            .iter()
            .filter_map(|stage| {
                let members: Vec<&JobReport> = jobs.iter().filter(|j| j.stage == *stage).collect();
                if members.is_empty() {
                    return None;
                }
                Some(StageSummary {
                    name: stage.clone(),
                    status: reduce_statuses(members.iter().map(|j| j.status)),
                    jobs: members.iter().map(|j| j.name.clone()).collect(),
                })
            })
            .collect();

        Self {
            status: reduce_statuses(jobs.iter().map(|j| j.status)),
            stages,
            jobs,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failed)
    }
}

/// Failed beats canceled beats warning beats success; all-skipped is skipped.
fn reduce_statuses(statuses: impl Iterator<Item = JobStatus>) -> PipelineStatus {
    let mut failed = false;
    let mut canceled = false;
    let mut warning = false;
    let mut ran = false;

    for status in statuses {
        match status {
            JobStatus::Failed => failed = true,
            JobStatus::Canceled => canceled = true,
            JobStatus::Warning => warning = true,
            JobStatus::Success => ran = true,
            // Non-terminal only if the run was torn down early.
            JobStatus::Pending | JobStatus::Ready | JobStatus::Running => canceled = true,
            JobStatus::Skipped | JobStatus::ManualBlocked => {}
        }
    }

    if failed {
        PipelineStatus::Failed
    } else if canceled {
        PipelineStatus::Canceled
    } else if warning {
        PipelineStatus::PartialFailure
    } else if ran {
        PipelineStatus::Success
    } else {
        PipelineStatus::Skipped
    }
}

// src/dag/job_info.rs

//! Per-job run state and the types handed to the executor.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::job::{JobDescriptor, JobName};

/// Status of one job within the pipeline run.
///
/// Transitions only move forward:
/// `Pending -> Ready -> Running -> {Success, Warning, Failed, Canceled}`,
/// plus `Pending -> {Skipped, ManualBlocked, Canceled}`,
/// `Ready -> Canceled` and `Running -> Running` for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    /// `when: manual` and not authorized for this run.
    ManualBlocked,
    /// All predecessors are settled; waiting for a concurrency slot.
    Ready,
    Running,
    Success,
    /// Failed, but `allow_failure` was set.
    Warning,
    Failed,
    Canceled,
    Skipped,
}

impl JobStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success
                | JobStatus::Warning
                | JobStatus::Failed
                | JobStatus::Canceled
                | JobStatus::Skipped
        )
    }

    /// Terminal, or parked as manual: nothing more will happen to it.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == JobStatus::ManualBlocked
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, ManualBlocked)
                | (Pending, Canceled)
                | (Ready, Running)
                | (Ready, Canceled)
                | (Running, Running)
                | (Running, Success)
                | (Running, Warning)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::ManualBlocked => "manual",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Warning => "warning",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why a job ended up `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// `when: never`.
    Never,
    /// Its `when` condition did not hold (e.g. `on_failure` with no failure).
    WhenNotMet,
    /// A predecessor failed, was canceled, or was itself skipped for that reason.
    UpstreamFailed,
    /// A predecessor can never run (manual and not authorized).
    Blocked,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Never => "when: never",
            SkipReason::WhenNotMet => "when condition not met",
            SkipReason::UpstreamFailed => "upstream failed",
            SkipReason::Blocked => "blocked by a manual job",
        };
        f.write_str(s)
    }
}

/// Static job information plus its state in this run.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub name: JobName,
    pub descriptor: Arc<JobDescriptor>,
    pub stage_index: usize,
    pub declared_index: usize,
    /// Manual job the operator asked to run.
    pub authorized_manual: bool,

    status: JobStatus,
    pub skip_reason: Option<SkipReason>,
    /// 0 until first dispatched, then 1-based.
    pub attempt: u32,
    pub exit_code: Option<i32>,
    /// Result of the main script on the final attempt.
    pub script_succeeded: Option<bool>,
    pub coverage: Option<f64>,

    pub delay_requested: bool,
    pub delay_elapsed: bool,

    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl JobInfo {
    pub fn new(
        descriptor: Arc<JobDescriptor>,
        stage_index: usize,
        declared_index: usize,
        authorized_manual: bool,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            descriptor,
            stage_index,
            declared_index,
            authorized_manual,
            status: JobStatus::Pending,
            skip_reason: None,
            attempt: 0,
            exit_code: None,
            script_succeeded: None,
            coverage: None,
            delay_requested: false,
            delay_elapsed: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Apply a transition; illegal ones are refused and reported as `false`.
    pub(crate) fn set_status(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                job = %self.name,
                from = %self.status,
                to = %next,
                "refusing illegal status transition"
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        true
    }

    /// Whether this job counts as a failure for its dependents.
    pub fn carries_failure(&self) -> bool {
        match self.status {
            JobStatus::Failed | JobStatus::Canceled => true,
            JobStatus::Skipped => matches!(
                self.skip_reason,
                Some(SkipReason::UpstreamFailed) | Some(SkipReason::Blocked)
            ),
            _ => false,
        }
    }

    /// Wall time from first dispatch to terminal status.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// A job the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: JobName,
    /// 1-based; greater than 1 for retries.
    pub attempt: u32,
    pub descriptor: Arc<JobDescriptor>,
    /// Finished predecessors whose artifacts are imported before the job starts.
    pub artifact_sources: Vec<JobName>,
}

/// Artifact/cache export requested once a job's terminal status is known.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub job: JobName,
    pub descriptor: Arc<JobDescriptor>,
    pub script_succeeded: bool,
}

/// A status change produced by one scheduler step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job: JobName,
    pub status: JobStatus,
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub skip_reason: Option<SkipReason>,
}

// src/engine/mod.rs

//! Orchestration engine for localci.
//!
//! This module ties together:
//! - the job scheduler
//! - the outcome reducer that turns per-job statuses into a pipeline result
//! - the main runtime event loop that reacts to:
//!   - job completion events
//!   - delayed-job timers
//!   - cancellation requests (Ctrl-C)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

pub use crate::job::JobName;

/// Synthetic exit code for a job the executor could not start.
pub const EXIT_CODE_EXECUTOR_ERROR: i32 = -1;
/// Synthetic exit code for a job killed by its `timeout`.
pub const EXIT_CODE_TIMEOUT: i32 = -2;

/// Outcome of one job attempt as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Script failure, timeout or executor error, with its exit code.
    Failed(i32),
    /// Stopped because the run was canceled.
    Canceled,
    /// The executor cannot establish job state at all; aborts the run.
    Fatal(String),
}

/// What the executor reports when an attempt ends.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub outcome: JobOutcome,
    /// Percentage extracted with the job's `coverage_regex`.
    pub coverage: Option<f64>,
}

impl JobCompletion {
    pub fn new(outcome: JobOutcome) -> Self {
        Self {
            outcome,
            coverage: None,
        }
    }

    pub fn success() -> Self {
        Self::new(JobOutcome::Success)
    }

    pub fn failed(exit_code: i32) -> Self {
        Self::new(JobOutcome::Failed(exit_code))
    }

    pub fn canceled() -> Self {
        Self::new(JobOutcome::Canceled)
    }

    pub fn with_coverage(mut self, coverage: Option<f64>) -> Self {
        self.coverage = coverage;
        self
    }
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Build [`PipelineEvent`]s for an attached sink.
    pub emit_events: bool,
}

/// Events flowing into the runtime from executors, timers and signals.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// One attempt of a job ended.
    JobCompleted {
        job: JobName,
        attempt: u32,
        completion: JobCompletion,
    },
    /// The `start_in` timer of a delayed job fired.
    DelayElapsed { job: JobName },
    /// Cancel the run (e.g. Ctrl-C).
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod events;
pub mod outcome;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use events::{ChannelSink, EventSink, PipelineEvent};
pub use outcome::{DrainDecision, JobReport, PipelineResult, PipelineStatus, StageSummary};
pub use runtime::Runtime;

// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::time::Duration;

use crate::dag::job_info::{ExportRequest, ScheduledJob, Transition};
use crate::job::JobName;

/// Structured result of a single scheduler "step".
///
/// Tests step the scheduler by hand and assert on these; the engine turns
/// them into commands.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs (or retry attempts) to hand to the executor now.
    pub dispatched: Vec<ScheduledJob>,
    /// Delayed jobs whose timer must be started.
    pub delays: Vec<(JobName, Duration)>,
    /// Running jobs the executor must cancel.
    pub cancels: Vec<JobName>,
    /// Exports to perform; always before any dispatch of the same step.
    pub exports: Vec<ExportRequest>,
    /// Status changes in the order they happened.
    pub transitions: Vec<Transition>,
    /// Whether this step settled the last job of the run.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn dispatched_names(&self) -> Vec<&str> {
        self.dispatched.iter().map(|j| j.name.as_str()).collect()
    }

    pub fn merge(&mut self, other: SchedulerStep) {
        self.dispatched.extend(other.dispatched);
        self.delays.extend(other.delays);
        self.cancels.extend(other.cancels);
        self.exports.extend(other.exports);
        self.transitions.extend(other.transitions);
        self.run_just_finished |= other.run_just_finished;
    }
}

// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledJob`s to the executor
//! - timers, artifact transfer and Ctrl+C
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_cancel, handle_delay_elapsed, handle_job_completion, handle_start, CoreStep,
};
use crate::engine::outcome::PipelineResult;
use crate::engine::{JobName, RuntimeEvent, RuntimeOptions};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    options: RuntimeOptions,
    /// First fatal executor error, if any.
    fatal: Option<(JobName, String)>,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            scheduler,
            options,
            fatal: None,
        }
    }

    pub fn set_emit_events(&mut self, emit: bool) {
        self.options.emit_events = emit;
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Fatal executor error that aborted the run.
    pub fn fatal(&self) -> Option<&(JobName, String)> {
        self.fatal.as_ref()
    }

    /// Gate, settle and dispatch the initial jobs.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler, &self.options)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobCompleted {
                job,
                attempt,
                completion,
            } => handle_job_completion(
                &mut self.scheduler,
                &self.options,
                &mut self.fatal,
                job,
                attempt,
                completion,
            ),
            RuntimeEvent::DelayElapsed { job } => {
                handle_delay_elapsed(&mut self.scheduler, &self.options, job)
            }
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler, &self.options),
        }
    }

    /// Pipeline result from the current job statuses.
    pub fn result(&self) -> PipelineResult {
        PipelineResult::reduce(self.scheduler.graph().stages(), self.scheduler.jobs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{BuildOptions, DependencyGraph};
    use crate::engine::{CoreCommand, JobCompletion, JobOutcome};
    use crate::job::{JobDescriptor, Need};

    fn core(jobs: Vec<JobDescriptor>, concurrency: usize) -> CoreRuntime {
        let stages = vec!["build".to_string(), "test".to_string()];
        let graph = DependencyGraph::build(jobs, &stages, &BuildOptions::default()).unwrap();
        CoreRuntime::new(
            Scheduler::for_all(graph, concurrency),
            RuntimeOptions::default(),
        )
    }

    fn completed(job: &str, outcome: JobOutcome) -> RuntimeEvent {
        RuntimeEvent::JobCompleted {
            job: job.to_string(),
            attempt: 1,
            completion: JobCompletion::new(outcome),
        }
    }

    fn kinds(step: &CoreStep) -> Vec<&'static str> {
        step.commands
            .iter()
            .map(|c| match c {
                CoreCommand::Notify(_) => "notify",
                CoreCommand::Export(_) => "export",
                CoreCommand::CancelJobs(_) => "cancel",
                CoreCommand::StartDelay { .. } => "delay",
                CoreCommand::Dispatch(_) => "dispatch",
                CoreCommand::Finish => "finish",
            })
            .collect()
    }

    #[test]
    fn export_precedes_dispatch_of_dependents() {
        let mut test = JobDescriptor::new("unit", "test");
        test.needs = Some(vec![Need::job("compile")]);
        let mut core = core(vec![JobDescriptor::new("compile", "build"), test], 2);

        assert_eq!(kinds(&core.start()), vec!["dispatch"]);
        let step = core.step(completed("compile", JobOutcome::Success));
        assert_eq!(kinds(&step), vec!["export", "dispatch"]);
        assert!(step.keep_running);

        let step = core.step(completed("unit", JobOutcome::Success));
        assert_eq!(kinds(&step), vec!["export", "finish"]);
        assert!(!step.keep_running);
        assert!(core.is_finished());
    }

    #[test]
    fn events_are_built_only_when_requested() {
        let mut core = core(vec![JobDescriptor::new("compile", "build")], 1);
        core.set_emit_events(true);
        assert_eq!(kinds(&core.start()), vec!["notify", "dispatch"]);
    }

    #[test]
    fn fatal_outcome_cancels_the_rest_and_is_recorded() {
        let mut core = core(
            vec![
                JobDescriptor::new("a", "build"),
                JobDescriptor::new("b", "build"),
                JobDescriptor::new("c", "test"),
            ],
            2,
        );
        core.start();

        let step = core.step(completed("a", JobOutcome::Fatal("no shell".into())));
        assert_eq!(kinds(&step), vec!["export", "cancel"]);
        assert!(core.scheduler().is_canceled());
        assert_eq!(
            core.fatal(),
            Some(&("a".to_string(), "no shell".to_string()))
        );

        let step = core.step(completed("b", JobOutcome::Canceled));
        assert!(!step.keep_running);
        assert_eq!(core.result().status, crate::engine::PipelineStatus::Failed);
    }

    #[test]
    fn cancel_request_with_nothing_running_finishes() {
        let mut core = core(vec![JobDescriptor::new("a", "build")], 1);
        core.start();
        core.step(completed("a", JobOutcome::Success));
        assert!(core.is_finished());

        let step = core.step(RuntimeEvent::CancelRequested);
        assert!(!step.keep_running);
        assert_eq!(core.result().status, crate::engine::PipelineStatus::Success);
    }
}

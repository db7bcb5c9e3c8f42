// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::Duration;

use tracing::{error, warn};

use crate::dag::{ExportRequest, ScheduledJob, Scheduler, SchedulerStep};
use crate::engine::events::{events_for, PipelineEvent};
use crate::engine::outcome::{drain_decision, DrainDecision};
use crate::engine::{JobCompletion, JobName, JobOutcome, RuntimeOptions};

/// Command produced by the pure core, to be executed by the outer IO shell.
///
/// Commands of one step must be executed in order: exports precede the
/// dispatch of jobs that may import them.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand events to the attached sink.
    Notify(Vec<PipelineEvent>),
    /// Export artifacts/caches of jobs that just reached a terminal status.
    Export(Vec<ExportRequest>),
    /// Ask the executor to stop these running jobs.
    CancelJobs(Vec<JobName>),
    /// Start a timer and send `DelayElapsed` when it fires.
    StartDelay { job: JobName, delay: Duration },
    /// Import artifacts for, then send these jobs to the executor.
    Dispatch(Vec<ScheduledJob>),
    /// The run is over.
    Finish,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Kick off the run.
pub fn handle_start(scheduler: &mut Scheduler, options: &RuntimeOptions) -> CoreStep {
    let step = scheduler.start();
    into_core_step(scheduler, options, step)
}

/// Handle the end of one job attempt.
///
/// A fatal outcome records the job as failed and then cancels the rest of
/// the run.
pub fn handle_job_completion(
    scheduler: &mut Scheduler,
    options: &RuntimeOptions,
    fatal: &mut Option<(JobName, String)>,
    job: JobName,
    attempt: u32,
    completion: JobCompletion,
) -> CoreStep {
    let abort = drain_decision(&completion.outcome) == DrainDecision::Abort;
    if let JobOutcome::Fatal(reason) = &completion.outcome {
        error!(job = %job, reason = %reason, "fatal executor error; aborting run");
        if fatal.is_none() {
            *fatal = Some((job.clone(), reason.clone()));
        }
    }

    let mut step = scheduler.handle_completion(&job, attempt, completion);
    if abort {
        step.merge(scheduler.cancel());
    }
    into_core_step(scheduler, options, step)
}

pub fn handle_delay_elapsed(
    scheduler: &mut Scheduler,
    options: &RuntimeOptions,
    job: JobName,
) -> CoreStep {
    let step = scheduler.handle_delay_elapsed(&job);
    into_core_step(scheduler, options, step)
}

pub fn handle_cancel(scheduler: &mut Scheduler, options: &RuntimeOptions) -> CoreStep {
    if scheduler.is_finished() {
        warn!("cancel requested after the run finished; ignoring");
    }
    let step = scheduler.cancel();
    into_core_step(scheduler, options, step)
}

/// Translate a scheduler step into ordered shell commands.
fn into_core_step(
    scheduler: &Scheduler,
    options: &RuntimeOptions,
    step: SchedulerStep,
) -> CoreStep {
    let mut commands = Vec::new();

    if options.emit_events {
        let events: Vec<PipelineEvent> = step.transitions.iter().flat_map(events_for).collect();
        if !events.is_empty() {
            commands.push(CoreCommand::Notify(events));
        }
    }
    if !step.exports.is_empty() {
        commands.push(CoreCommand::Export(step.exports));
    }
    for (job, delay) in step.delays {
        commands.push(CoreCommand::StartDelay { job, delay });
    }
    if !step.dispatched.is_empty() {
        commands.push(CoreCommand::Dispatch(step.dispatched));
    }
    // After dispatch: an abort may cancel jobs dispatched in the same step.
    if !step.cancels.is_empty() {
        commands.push(CoreCommand::CancelJobs(step.cancels));
    }

    let keep_running = !scheduler.is_finished();
    if !keep_running {
        commands.push(CoreCommand::Finish);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

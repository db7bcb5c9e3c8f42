use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::job_info::{ExportRequest, JobInfo, JobStatus, ScheduledJob, SkipReason};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{transition_of, ReadOnlyStateManager, StateManager};
use crate::engine::{JobCompletion, JobOutcome, EXIT_CODE_EXECUTOR_ERROR};
use crate::job::JobName;
use crate::types::When;

/// Scheduler holds the immutable graph plus the mutable state of one run.
///
/// It is responsible for:
/// - gating `never` and unauthorized `manual` jobs up front
/// - deciding when a job's predecessors are settled and what its `when`
///   condition makes of that
/// - keeping at most `concurrency` jobs running, in declaration order
/// - retrying failed attempts according to the job's retry policy
/// - cancelling everything that has not finished on request
///
/// It never touches processes or timers; every decision comes back as a
/// [`SchedulerStep`].
#[derive(Debug)]
pub struct Scheduler {
    graph: DependencyGraph,
    jobs: HashMap<JobName, JobInfo>,
    /// Jobs of this run in declaration order.
    order: Vec<JobName>,
    ready: VecDeque<JobName>,
    in_flight: usize,
    concurrency: usize,
    started: bool,
    canceled: bool,
    finished: bool,
}

impl Scheduler {
    /// Scheduler over the jobs of `plan` (names not in the graph are ignored).
    ///
    /// `concurrency` is clamped to at least 1.
    pub fn new(
        graph: DependencyGraph,
        plan: impl IntoIterator<Item = JobName>,
        concurrency: usize,
    ) -> Self {
        let selected: HashSet<JobName> = plan.into_iter().collect();
        let mut jobs = HashMap::new();
        let mut order = Vec::new();

        for name in graph.jobs() {
            if !selected.contains(name) {
                continue;
            }
            let (Some(descriptor), Some(stage_index), Some(declared_index)) = (
                graph.descriptor(name),
                graph.stage_index_of(name),
                graph.declared_index_of(name),
            ) else {
                continue;
            };
            let authorized = graph.is_manual_authorized(name);
            let info = JobInfo::new(descriptor.clone(), stage_index, declared_index, authorized);
            order.push(name.to_string());
            jobs.insert(name.to_string(), info);
        }

        for name in selected.iter() {
            if !jobs.contains_key(name) {
                warn!(job = %name, "planned job is not in the graph; ignoring");
            }
        }

        Self {
            graph,
            jobs,
            order,
            ready: VecDeque::new(),
            in_flight: 0,
            concurrency: concurrency.max(1),
            started: false,
            canceled: false,
            finished: false,
        }
    }

    /// Scheduler over every job in the graph.
    pub fn for_all(graph: DependencyGraph, concurrency: usize) -> Self {
        let plan: Vec<JobName> = graph.jobs().map(str::to_string).collect();
        Self::new(graph, plan, concurrency)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of jobs currently holding an execution slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn status_of(&self, job: &str) -> Option<JobStatus> {
        self.jobs.get(job).map(|info| info.status())
    }

    pub fn job(&self, job: &str) -> Option<&JobInfo> {
        self.jobs.get(job)
    }

    /// Jobs of this run in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &JobInfo> {
        self.order.iter().filter_map(|name| self.jobs.get(name))
    }

    /// Whether every in-run predecessor of `job` has settled.
    ///
    /// Returns `None` if the job is not part of this run.
    pub fn deps_satisfied(&self, job: &str) -> Option<bool> {
        if !self.jobs.contains_key(job) {
            return None;
        }
        let mgr = ReadOnlyStateManager::new(&self.graph, &self.jobs);
        Some(mgr.predecessors_terminal(job))
    }

    /// Gate the initial jobs and dispatch everything that can start.
    pub fn start(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.started {
            warn!("scheduler: start called twice; ignoring");
            return step;
        }
        self.started = true;

        info!(
            jobs = self.jobs.len(),
            concurrency = self.concurrency,
            mode = ?self.graph.mode(),
            "scheduler: starting pipeline run"
        );

        for name in self.order.iter() {
            let Some(info) = self.jobs.get_mut(name) else {
                continue;
            };
            match info.descriptor.when {
                When::Never => {
                    if info.set_status(JobStatus::Skipped) {
                        info.skip_reason = Some(SkipReason::Never);
                        debug!(job = %name, "when: never; skipped");
                        step.transitions.push(transition_of(info));
                    }
                }
                When::Manual if !info.authorized_manual => {
                    if info.set_status(JobStatus::ManualBlocked) {
                        info!(job = %name, "manual job not authorized; blocked");
                        step.transitions.push(transition_of(info));
                    }
                }
                _ => {}
            }
        }

        let candidates = self.order.clone();
        self.settle(candidates, &mut step);
        self.fill_slots(&mut step);
        self.check_finished(&mut step);
        step
    }

    /// Apply the result of one attempt of a running job.
    ///
    /// Stale reports (wrong attempt, job not running) are ignored.
    pub fn handle_completion(
        &mut self,
        job: &str,
        attempt: u32,
        completion: JobCompletion,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let canceled = self.canceled;

        let Some(info) = self.jobs.get_mut(job) else {
            warn!(job = %job, "completion for unknown job; ignoring");
            return step;
        };
        if info.status() != JobStatus::Running || info.attempt != attempt {
            warn!(
                job = %job,
                attempt,
                current_attempt = info.attempt,
                status = %info.status(),
                "stale completion; ignoring"
            );
            return step;
        }

        info.coverage = completion.coverage.or(info.coverage);

        let next = match completion.outcome {
            JobOutcome::Success => {
                info.exit_code = Some(0);
                info.script_succeeded = Some(true);
                debug!(job = %job, attempt, "job succeeded");
                JobStatus::Success
            }
            JobOutcome::Canceled => {
                info.script_succeeded = Some(false);
                info!(job = %job, attempt, "job canceled");
                JobStatus::Canceled
            }
            JobOutcome::Failed(code) => {
                info.exit_code = Some(code);
                info.script_succeeded = Some(false);

                if !canceled && info.descriptor.retry.should_retry(attempt, code) {
                    info.attempt += 1;
                    info!(
                        job = %job,
                        exit_code = code,
                        attempt = info.attempt,
                        max_retries = info.descriptor.retry.max,
                        "job failed; retrying"
                    );
                    info.set_status(JobStatus::Running);
                    step.transitions.push(transition_of(info));
                    let name = info.name.clone();
                    let attempt = info.attempt;
                    let descriptor = info.descriptor.clone();
                    step.dispatched.push(ScheduledJob {
                        artifact_sources: self.artifact_sources(job),
                        name,
                        attempt,
                        descriptor,
                    });
                    return step;
                }

                if info.descriptor.allow_failure {
                    warn!(job = %job, exit_code = code, "job failed (allowed to fail)");
                    JobStatus::Warning
                } else {
                    warn!(job = %job, exit_code = code, attempt, "job failed");
                    JobStatus::Failed
                }
            }
            JobOutcome::Fatal(reason) => {
                info.exit_code = Some(EXIT_CODE_EXECUTOR_ERROR);
                info.script_succeeded = Some(false);
                warn!(job = %job, reason = %reason, "executor could not run job");
                JobStatus::Failed
            }
        };

        info.set_status(next);
        step.transitions.push(transition_of(info));
        if next != JobStatus::Canceled {
            step.exports.push(ExportRequest {
                job: info.name.clone(),
                descriptor: info.descriptor.clone(),
                script_succeeded: info.script_succeeded.unwrap_or(false),
            });
        }

        self.in_flight = self.in_flight.saturating_sub(1);

        let dependents = self.graph.dependents_of(job).to_vec();
        self.settle(dependents, &mut step);
        self.fill_slots(&mut step);
        self.check_finished(&mut step);
        step
    }

    /// The `start_in` timer of a delayed job fired.
    pub fn handle_delay_elapsed(&mut self, job: &str) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.jobs.get_mut(job) {
            Some(info) if info.status() == JobStatus::Pending && info.delay_requested => {
                debug!(job = %job, "delay elapsed");
                info.delay_elapsed = true;
            }
            Some(info) => {
                debug!(job = %job, status = %info.status(), "delay elapsed for settled job; ignoring");
                return step;
            }
            None => {
                warn!(job = %job, "delay elapsed for unknown job; ignoring");
                return step;
            }
        }

        self.settle(vec![job.to_string()], &mut step);
        self.fill_slots(&mut step);
        self.check_finished(&mut step);
        step
    }

    /// Cancel the run: unstarted jobs become `Canceled`, running ones are
    /// asked to stop. No retries happen afterwards.
    pub fn cancel(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if self.canceled || self.finished {
            debug!("scheduler: cancel already requested or run finished");
            return step;
        }
        self.canceled = true;
        self.ready.clear();
        info!("scheduler: canceling pipeline run");

        for name in self.order.iter() {
            let Some(info) = self.jobs.get_mut(name) else {
                continue;
            };
            match info.status() {
                JobStatus::Pending | JobStatus::Ready => {
                    info.set_status(JobStatus::Canceled);
                    step.transitions.push(transition_of(info));
                }
                JobStatus::Running => step.cancels.push(name.clone()),
                _ => {}
            }
        }

        self.check_finished(&mut step);
        step
    }

    fn settle(&mut self, candidates: Vec<JobName>, step: &mut SchedulerStep) {
        let mut mgr = StateManager::new(&self.graph, &mut self.jobs);
        let settled = mgr.settle(candidates);

        step.transitions.extend(settled.transitions);
        step.delays.extend(settled.delays);

        // FIFO by ready time; declaration order only within one batch.
        let mut batch = settled.ready;
        let jobs = &self.jobs;
        batch.sort_by_key(|name| jobs.get(name).map(|i| i.declared_index));
        self.ready.extend(batch);
    }

    fn fill_slots(&mut self, step: &mut SchedulerStep) {
        while !self.canceled && self.in_flight < self.concurrency {
            let Some(name) = self.ready.pop_front() else {
                break;
            };
            let sources = self.artifact_sources(&name);
            let Some(info) = self.jobs.get_mut(&name) else {
                continue;
            };
            if !info.set_status(JobStatus::Running) {
                continue;
            }
            info.attempt = 1;
            info.started_at = Some(Instant::now());
            self.in_flight += 1;

            info!(job = %name, stage = %info.descriptor.stage, "dispatching job");
            step.transitions.push(transition_of(info));
            step.dispatched.push(ScheduledJob {
                name: name.clone(),
                attempt: 1,
                descriptor: info.descriptor.clone(),
                artifact_sources: sources,
            });
        }
    }

    /// Finished predecessors whose artifacts the job imports.
    fn artifact_sources(&self, job: &str) -> Vec<JobName> {
        self.graph
            .predecessors_of(job)
            .iter()
            .filter(|p| p.artifacts)
            .filter(|p| {
                self.jobs.get(&p.job).is_some_and(|info| {
                    matches!(
                        info.status(),
                        JobStatus::Success | JobStatus::Warning | JobStatus::Failed
                    )
                })
            })
            .map(|p| p.job.clone())
            .collect()
    }

    fn check_finished(&mut self, step: &mut SchedulerStep) {
        if self.finished || self.in_flight > 0 || !self.ready.is_empty() {
            return;
        }

        let armed_delays = self.jobs.values().any(|info| {
            info.status() == JobStatus::Pending && info.delay_requested && !info.delay_elapsed
        });
        if armed_delays {
            return;
        }

        // Nothing running, queued or timed: any job still pending can never start.
        for name in self.order.iter() {
            let Some(info) = self.jobs.get_mut(name) else {
                continue;
            };
            if info.status() == JobStatus::Pending && info.set_status(JobStatus::Skipped) {
                info.skip_reason = Some(SkipReason::Blocked);
                warn!(job = %name, "job can never start; marking skipped");
                step.transitions.push(transition_of(info));
            }
        }

        let mgr = ReadOnlyStateManager::new(&self.graph, &self.jobs);
        if mgr.all_settled() {
            info!(canceled = self.canceled, "scheduler: all jobs settled; run finished");
            self.finished = true;
            step.run_just_finished = true;
        }
    }
}

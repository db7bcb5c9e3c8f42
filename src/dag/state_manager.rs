// src/dag/state_manager.rs

//! Readiness evaluation and local fan-out of status changes.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dag::graph::{DependencyGraph, EdgeKind};
use crate::dag::job_info::{JobInfo, JobStatus, SkipReason, Transition};
use crate::job::JobName;
use crate::types::When;

/// What should happen to a `Pending` job given its predecessors' statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Some predecessor is not settled yet (or the job is not pending).
    Waiting,
    Ready,
    /// `when: delayed` job whose timer has not fired.
    Delay(Duration),
    Skip(SkipReason),
}

/// Changes produced by [`StateManager::settle`].
#[derive(Debug, Default)]
pub struct Settled {
    pub ready: Vec<JobName>,
    pub delays: Vec<(JobName, Duration)>,
    pub transitions: Vec<Transition>,
}

/// Applies readiness decisions to the per-run job map.
pub struct StateManager<'a> {
    graph: &'a DependencyGraph,
    jobs: &'a mut HashMap<JobName, JobInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DependencyGraph, jobs: &'a mut HashMap<JobName, JobInfo>) -> Self {
        Self { graph, jobs }
    }

    /// Re-evaluate `candidates` and, transitively, the dependents of every
    /// job this skips.
    ///
    /// Only the jobs reachable from the change are visited, never the whole
    /// graph.
    pub fn settle(&mut self, candidates: Vec<JobName>) -> Settled {
        let mut out = Settled::default();
        let mut stack = candidates;
        stack.reverse();

        while let Some(name) = stack.pop() {
            let readiness = ReadOnlyStateManager::new(self.graph, &*self.jobs).evaluate(&name);
            let Some(info) = self.jobs.get_mut(&name) else {
                continue;
            };

            match readiness {
                Readiness::Waiting => {}
                Readiness::Ready => {
                    if info.set_status(JobStatus::Ready) {
                        debug!(job = %name, "predecessors settled; job is ready");
                        out.transitions.push(transition_of(info));
                        out.ready.push(name);
                    }
                }
                Readiness::Delay(delay) => {
                    if !info.delay_requested {
                        info.delay_requested = true;
                        debug!(job = %name, ?delay, "delayed job armed");
                        out.delays.push((name, delay));
                    }
                }
                Readiness::Skip(reason) => {
                    if info.set_status(JobStatus::Skipped) {
                        info.skip_reason = Some(reason);
                        debug!(job = %name, %reason, "job skipped");
                        out.transitions.push(transition_of(info));
                        stack.extend(self.graph.dependents_of(&name).iter().rev().cloned());
                    }
                }
            }
        }

        out
    }
}

/// Shared-borrow view used for readiness checks.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a DependencyGraph,
    jobs: &'a HashMap<JobName, JobInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a DependencyGraph, jobs: &'a HashMap<JobName, JobInfo>) -> Self {
        Self { graph, jobs }
    }

    /// Decide what a `Pending` job should do next.
    ///
    /// Predecessors outside this run are ignored. A stage-barrier predecessor
    /// that is manual-blocked does not hold the job back; a `needs`
    /// predecessor that is, blocks it for good.
    pub fn evaluate(&self, name: &str) -> Readiness {
        let Some(info) = self.jobs.get(name) else {
            warn!(job = %name, "readiness check for job outside this run");
            return Readiness::Waiting;
        };
        if info.status() != JobStatus::Pending {
            return Readiness::Waiting;
        }

        let mut upstream_failed = false;
        for pred in self.graph.predecessors_of(name) {
            let Some(p) = self.jobs.get(&pred.job) else {
                continue;
            };
            match p.status() {
                JobStatus::ManualBlocked => {
                    if pred.kind == EdgeKind::Need {
                        return Readiness::Skip(SkipReason::Blocked);
                    }
                }
                status if !status.is_terminal() => return Readiness::Waiting,
                _ => upstream_failed |= p.carries_failure(),
            }
        }

        match info.descriptor.when {
            When::Always => Readiness::Ready,
            When::Never => Readiness::Skip(SkipReason::Never),
            When::OnFailure if upstream_failed => Readiness::Ready,
            When::OnFailure => Readiness::Skip(SkipReason::WhenNotMet),
            When::Manual if !info.authorized_manual => Readiness::Waiting,
            When::OnSuccess | When::Manual | When::Delayed if upstream_failed => {
                Readiness::Skip(SkipReason::UpstreamFailed)
            }
            When::Delayed if !info.delay_elapsed => {
                Readiness::Delay(info.descriptor.start_in.unwrap_or_default())
            }
            When::OnSuccess | When::Manual | When::Delayed => Readiness::Ready,
        }
    }

    /// Whether every job in the run is terminal or manual-blocked.
    pub fn all_settled(&self) -> bool {
        self.jobs.values().all(|info| info.status().is_settled())
    }

    /// Whether every in-run predecessor of `name` is terminal.
    pub fn predecessors_terminal(&self, name: &str) -> bool {
        self.graph
            .predecessors_of(name)
            .iter()
            .filter_map(|p| self.jobs.get(&p.job))
            .all(|p| p.status().is_settled())
    }
}

pub(crate) fn transition_of(info: &JobInfo) -> Transition {
    Transition {
        job: info.name.clone(),
        status: info.status(),
        attempt: info.attempt,
        exit_code: info.exit_code,
        skip_reason: info.skip_reason,
    }
}

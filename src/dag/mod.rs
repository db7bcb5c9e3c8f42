// src/dag/mod.rs

//! Dependency graph and scheduling.
//!
//! - [`graph`] validates the expanded jobs and records who waits for whom.
//! - [`selection`] narrows a run to requested jobs or a stage.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   jobs are ready to run, retried, skipped or canceled.
//! - [`job_info`] provides per-job run state and scheduled job types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] evaluates readiness and fans out status changes.

pub mod graph;
pub mod job_info;
pub mod scheduler;
pub mod scheduler_step;
pub mod selection;
pub mod state_manager;

pub use graph::{BuildOptions, DependencyGraph, EdgeKind, NeedEdge, Predecessor};
pub use job_info::{ExportRequest, JobInfo, JobStatus, ScheduledJob, SkipReason, Transition};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use selection::{select, Selection};

// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running job scripts, using
//! `tokio::process::Command`, and reporting back to the orchestration
//! runtime via `RuntimeEvent`s.
//!
//! - [`executor_loop`] owns the main executor loop which manages job processes.
//! - [`job_runner`] handles one attempt of one job.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `ShellExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod job_runner;

pub use backend::{ExecutorBackend, ShellExecutorBackend};
pub use executor_loop::{spawn_executor, ExecutorCommand, ShellOptions};

// src/exec/backend.rs

//! Seam between the runtime and whatever actually runs job scripts.
//!
//! [`ShellExecutorBackend`] feeds the shell executor loop; the integration
//! tests plug in a fake that completes attempts from a script of outcomes.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::dag::ScheduledJob;
use crate::engine::{JobName, RuntimeEvent};
use crate::errors::{Error, Result};

use super::executor_loop::{spawn_executor, ExecutorCommand, ShellOptions};

/// Trait abstracting how scheduled jobs are executed.
///
/// Every dispatched attempt must eventually produce exactly one
/// `RuntimeEvent::JobCompleted`, including canceled ones.
pub trait ExecutorBackend: Send {
    /// Start the given job attempts.
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask running jobs to stop. Unknown or finished jobs are ignored.
    fn cancel_jobs(
        &mut self,
        jobs: Vec<JobName>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Executor backend running scripts through a local shell.
pub struct ShellExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl ShellExecutorBackend {
    /// Spawns the executor loop right away; completions go to `runtime_tx`.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, options: ShellOptions) -> Self {
        let tx = spawn_executor(runtime_tx, options);
        Self { tx }
    }

    fn send_all(
        &self,
        commands: Vec<ExecutorCommand>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            for command in commands {
                tx.send(command).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }
}

impl ExecutorBackend for ShellExecutorBackend {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.send_all(jobs.into_iter().map(ExecutorCommand::Run).collect())
    }

    fn cancel_jobs(
        &mut self,
        jobs: Vec<JobName>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.send_all(jobs.into_iter().map(ExecutorCommand::Cancel).collect())
    }
}

// src/exec/executor_loop.rs

//! Main executor loop that manages running job processes.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::dag::ScheduledJob;
use crate::engine::{JobName, RuntimeEvent};
use crate::exec::job_runner::run_job;

/// Request sent from the backend to the executor loop.
#[derive(Debug, Clone)]
pub enum ExecutorCommand {
    /// Start one attempt of a job.
    Run(ScheduledJob),
    /// Stop a running job; a no-op if it already finished.
    Cancel(JobName),
}

/// How job scripts are launched.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Directory every job runs in.
    pub workdir: PathBuf,
    /// Shell binary; scripts run as `<shell> -e -c <script>`.
    pub shell: String,
}

impl ShellOptions {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            shell: "sh".to_string(),
        }
    }
}

/// Internal handle for a currently-running job process.
///
/// - `cancel` is used by the executor to request that the process be stopped.
/// - `handle` is the Tokio task that is actually running the script.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned `mpsc::Sender<ExecutorCommand>` is what
/// `ShellExecutorBackend` uses. Each attempt runs in its own Tokio task and
/// reports exactly one `JobCompleted` event.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    options: ShellOptions,
) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(32);

    tokio::spawn(async move {
        info!(workdir = %options.workdir.display(), "executor loop started");

        // At most one ActiveJob per job name.
        let mut active: HashMap<JobName, ActiveJob> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, job| !job.handle.is_finished());
            match command {
                ExecutorCommand::Run(job) => {
                    handle_run(job, &mut active, &runtime_tx, &options);
                }
                ExecutorCommand::Cancel(name) => handle_cancel(&name, &mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_run(
    job: ScheduledJob,
    active: &mut HashMap<JobName, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    options: &ShellOptions,
) {
    let name = job.name.clone();

    if let Some(existing) = active.get(&name) {
        if !existing.handle.is_finished() {
            // A retry is only dispatched after the previous attempt reported,
            // so this is the tail of that task.
            debug!(job = %name, attempt = job.attempt, "previous attempt still winding down");
        }
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let opts = options.clone();
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        run_job(job, rt_tx, cancel_rx, opts).await;
        debug!(job = %spawn_name, "job runner future finished");
    });

    active.insert(
        name,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn handle_cancel(name: &str, active: &mut HashMap<JobName, ActiveJob>) {
    let Some(existing) = active.get_mut(name) else {
        debug!(job = %name, "cancel for job that is not running; ignoring");
        return;
    };

    match existing.cancel.take() {
        Some(cancel) => {
            info!(job = %name, "cancelling running job");
            if cancel.send(()).is_err() {
                debug!(job = %name, "job already finished while cancelling");
            }
        }
        None => {
            debug!(job = %name, "job was already asked to cancel");
        }
    }
}

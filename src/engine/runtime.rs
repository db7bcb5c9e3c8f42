// src/engine/runtime.rs

use std::fmt;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{ExportRequest, ScheduledJob};
use crate::errors::{PipelineError, Result};
use crate::exec::ExecutorBackend;
use crate::store::ArtifactStore;

use super::core::CoreRuntime;
use super::events::{EventSink, PipelineEvent};
use super::outcome::PipelineResult;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s and delegates
/// process execution to an `ExecutorBackend` and artifact transfer to an
/// `ArtifactStore`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. Store transfers run on the blocking pool; the loop
/// awaits them so exports still land before dependents are dispatched.
pub struct Runtime<E: ExecutorBackend, S: ArtifactStore + 'static> {
    core: CoreRuntime,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    /// Lent to the blocking pool for the duration of each transfer.
    store: Option<S>,
    sink: Option<Box<dyn EventSink>>,
}

impl<E: ExecutorBackend, S: ArtifactStore + 'static> fmt::Debug for Runtime<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend, S: ArtifactStore + 'static> Runtime<E, S> {
    /// `event_tx` must feed `event_rx`; it is used for delay timers.
    pub fn new(
        core: CoreRuntime,
        event_tx: mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        store: S,
    ) -> Self {
        Self {
            core,
            event_tx,
            event_rx,
            executor,
            store: Some(store),
            sink: None,
        }
    }

    /// Attach an observer; without one no events are built at all.
    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.core.set_emit_events(true);
        self.sink = Some(sink);
        self
    }

    /// Main event loop.
    ///
    /// - Starts the run and executes the initial commands.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them to the core.
    /// - Returns the pipeline result once every job has settled, or
    ///   `ExecutorSetup` if a fatal executor error aborted the run.
    pub async fn run(mut self) -> Result<PipelineResult> {
        info!("localci runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    return Err(PipelineError::Other(anyhow!(
                        "runtime event channel closed before the pipeline finished"
                    )));
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }

        if let Some((job, reason)) = self.core.fatal() {
            return Err(PipelineError::ExecutorSetup {
                job: job.clone(),
                reason: reason.clone(),
            });
        }

        let result = self.core.result();
        self.notify(&[PipelineEvent::PipelineFinished {
            status: result.status,
        }]);

        info!(status = %result.status, "runtime exiting");
        Ok(result)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Notify(events) => self.notify(&events),
            CoreCommand::Export(requests) => self.export(requests).await?,
            CoreCommand::CancelJobs(jobs) => {
                debug!(?jobs, "canceling running jobs");
                self.executor.cancel_jobs(jobs).await?;
            }
            CoreCommand::StartDelay { job, delay } => {
                let tx = self.event_tx.clone();
                debug!(job = %job, ?delay, "starting delay timer");
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Runtime gone means the run is over.
                    let _ = tx.send(RuntimeEvent::DelayElapsed { job }).await;
                });
            }
            CoreCommand::Dispatch(jobs) => self.spawn_ready(jobs).await?,
            CoreCommand::Finish => {
                info!("core reported the run finished");
            }
        }
        Ok(())
    }

    fn notify(&self, events: &[PipelineEvent]) {
        if let Some(sink) = &self.sink {
            for event in events {
                sink.emit(event);
            }
        }
    }

    async fn export(&mut self, requests: Vec<ExportRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        self.on_store(move |store| {
            for request in &requests {
                if let Err(e) = store.export(request) {
                    warn!(job = %request.job, error = %e, "artifact export failed");
                }
            }
        })
        .await
    }

    async fn spawn_ready(&mut self, jobs: Vec<ScheduledJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let jobs = self
            .on_store(move |store| {
                for job in jobs.iter() {
                    if let Err(e) = store.import(job) {
                        warn!(job = %job.name, error = %e, "artifact import failed");
                    }
                }
                jobs
            })
            .await?;

        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        let attempts: Vec<_> = jobs.iter().map(|j| j.attempt).collect();
        debug!(?names, ?attempts, "spawning ready jobs");

        self.executor.spawn_jobs(jobs).await
    }

    /// Run `work` against the store on the blocking pool.
    async fn on_store<T, F>(&mut self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        let mut store = self.store.take().ok_or_else(|| {
            PipelineError::Other(anyhow!("artifact store lost by an earlier transfer"))
        })?;

        let (store, out) = tokio::task::spawn_blocking(move || {
            let out = work(&mut store);
            (store, out)
        })
        .await
        .map_err(|e| PipelineError::Other(anyhow!("artifact transfer task failed: {e}")))?;

        self.store = Some(store);
        Ok(out)
    }
}

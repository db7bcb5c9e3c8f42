use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use localci::dag::ScheduledJob;
use localci::engine::{JobCompletion, JobName, RuntimeEvent};
use localci::errors::Result;
use localci::exec::ExecutorBackend;

/// What the fake executor saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Started { job: JobName, attempt: u32 },
    Finished { job: JobName, attempt: u32 },
    Canceled { job: JobName, attempt: u32 },
}

/// Shared, inspectable log of a `FakeExecutor`.
#[derive(Debug, Clone, Default)]
pub struct FakeLog {
    events: Arc<Mutex<Vec<FakeEvent>>>,
}

impl FakeLog {
    fn push(&self, event: FakeEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Job names in the order they were started (retries included).
    pub fn started(&self) -> Vec<JobName> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FakeEvent::Started { job, .. } => Some(job),
                _ => None,
            })
            .collect()
    }

    pub fn attempts_of(&self, job: &str) -> u32 {
        self.events()
            .iter()
            .filter(|e| matches!(e, FakeEvent::Started { job: j, .. } if j == job))
            .count() as u32
    }

    /// Index of the first `Started` event of `job`.
    pub fn start_index(&self, job: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, FakeEvent::Started { job: j, .. } if j == job))
    }

    /// Index of the last `Finished`/`Canceled` event of `job`.
    pub fn end_index(&self, job: &str) -> Option<usize> {
        self.events().iter().rposition(|e| match e {
            FakeEvent::Finished { job: j, .. } | FakeEvent::Canceled { job: j, .. } => j == job,
            _ => false,
        })
    }

    /// Highest number of attempts that were running at the same time.
    pub fn max_overlap(&self) -> usize {
        let mut running = 0usize;
        let mut max = 0usize;
        for event in self.events() {
            match event {
                FakeEvent::Started { .. } => {
                    running += 1;
                    max = max.max(running);
                }
                FakeEvent::Finished { .. } | FakeEvent::Canceled { .. } => {
                    running = running.saturating_sub(1);
                }
            }
        }
        max
    }
}

/// A fake executor that:
/// - records when attempts start and end
/// - reports the scripted completion for each attempt (success by default)
/// - can hold jobs "running" until they are canceled.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    log: FakeLog,
    outcomes: HashMap<JobName, Vec<JobCompletion>>,
    held: HashSet<JobName>,
    delay: Duration,
    cancels: Arc<Mutex<HashMap<JobName, oneshot::Sender<()>>>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            log: FakeLog::default(),
            outcomes: HashMap::new(),
            held: HashSet::new(),
            delay: Duration::from_millis(5),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Completions for attempts 1, 2, ... of `job`; later attempts reuse the
    /// last entry.
    pub fn script(mut self, job: &str, completions: Vec<JobCompletion>) -> Self {
        self.outcomes.insert(job.to_string(), completions);
        self
    }

    /// Keep `job` running until it is canceled.
    pub fn hold(mut self, job: &str) -> Self {
        self.held.insert(job.to_string());
        self
    }

    /// Simulated run time of every attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn log(&self) -> FakeLog {
        self.log.clone()
    }

    fn completion_for(&self, job: &str, attempt: u32) -> JobCompletion {
        match self.outcomes.get(job) {
            Some(list) if !list.is_empty() => {
                let idx = (attempt as usize).saturating_sub(1).min(list.len() - 1);
                list[idx].clone()
            }
            _ => JobCompletion::success(),
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_jobs(
        &mut self,
        jobs: Vec<ScheduledJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for job in jobs {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                self.cancels
                    .lock()
                    .unwrap()
                    .insert(job.name.clone(), cancel_tx);

                self.log.push(FakeEvent::Started {
                    job: job.name.clone(),
                    attempt: job.attempt,
                });

                let completion = self.completion_for(&job.name, job.attempt);
                let held = self.held.contains(&job.name);
                let delay = self.delay;
                let tx = self.runtime_tx.clone();
                let log = self.log.clone();

                tokio::spawn(async move {
                    let finish = async {
                        if held {
                            std::future::pending::<()>().await;
                        } else {
                            tokio::time::sleep(delay).await;
                        }
                    };

                    let completion = tokio::select! {
                        _ = finish => {
                            log.push(FakeEvent::Finished {
                                job: job.name.clone(),
                                attempt: job.attempt,
                            });
                            completion
                        }
                        _ = cancel_rx => {
                            log.push(FakeEvent::Canceled {
                                job: job.name.clone(),
                                attempt: job.attempt,
                            });
                            JobCompletion::canceled()
                        }
                    };

                    let _ = tx
                        .send(RuntimeEvent::JobCompleted {
                            job: job.name,
                            attempt: job.attempt,
                            completion,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel_jobs(
        &mut self,
        jobs: Vec<JobName>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let cancels = Arc::clone(&self.cancels);
        Box::pin(async move {
            let mut guard = cancels.lock().unwrap();
            for job in jobs {
                if let Some(tx) = guard.remove(&job) {
                    let _ = tx.send(());
                }
            }
            Ok(())
        })
    }
}

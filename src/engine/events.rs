// src/engine/events.rs

//! Optional observer for pipeline progress.

use tokio::sync::mpsc;

use crate::dag::{JobStatus, SkipReason, Transition};
use crate::engine::outcome::PipelineStatus;
use crate::job::JobName;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Predecessors settled; waiting for a slot.
    JobQueued { job: JobName },
    JobStarted { job: JobName, attempt: u32 },
    /// A failed attempt will be retried as `attempt`.
    JobRetrying {
        job: JobName,
        attempt: u32,
        exit_code: Option<i32>,
    },
    JobFinished {
        job: JobName,
        status: JobStatus,
        exit_code: Option<i32>,
    },
    /// Skipped, or parked as manual.
    JobSkipped {
        job: JobName,
        status: JobStatus,
        reason: Option<SkipReason>,
    },
    PipelineFinished { status: PipelineStatus },
}

/// Receives every [`PipelineEvent`] of a run.
pub trait EventSink: Send {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &PipelineEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

/// Events describing one scheduler transition.
pub fn events_for(transition: &Transition) -> Vec<PipelineEvent> {
    let job = transition.job.clone();
    match transition.status {
        JobStatus::Pending => Vec::new(),
        JobStatus::Ready => vec![PipelineEvent::JobQueued { job }],
        JobStatus::Running if transition.attempt > 1 => vec![
            PipelineEvent::JobRetrying {
                job: job.clone(),
                attempt: transition.attempt,
                exit_code: transition.exit_code,
            },
            PipelineEvent::JobStarted {
                job,
                attempt: transition.attempt,
            },
        ],
        JobStatus::Running => vec![PipelineEvent::JobStarted {
            job,
            attempt: transition.attempt,
        }],
        JobStatus::Skipped | JobStatus::ManualBlocked => vec![PipelineEvent::JobSkipped {
            job,
            status: transition.status,
            reason: transition.skip_reason,
        }],
        JobStatus::Success | JobStatus::Warning | JobStatus::Failed | JobStatus::Canceled => {
            vec![PipelineEvent::JobFinished {
                job,
                status: transition.status,
                exit_code: transition.exit_code,
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(status: JobStatus, attempt: u32, exit_code: Option<i32>) -> Transition {
        Transition {
            job: "test".to_string(),
            status,
            attempt,
            exit_code,
            skip_reason: None,
        }
    }

    #[test]
    fn retry_emits_retrying_then_started() {
        let events = events_for(&transition(JobStatus::Running, 2, Some(1)));
        assert_eq!(
            events,
            vec![
                PipelineEvent::JobRetrying {
                    job: "test".into(),
                    attempt: 2,
                    exit_code: Some(1)
                },
                PipelineEvent::JobStarted {
                    job: "test".into(),
                    attempt: 2
                },
            ]
        );
    }

    #[test]
    fn channel_sink_forwards_clones() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(&PipelineEvent::JobQueued { job: "a".into() });
        assert_eq!(
            rx.try_recv().ok(),
            Some(PipelineEvent::JobQueued { job: "a".into() })
        );
    }
}

//! Separation progress relay.
//!
//! A producer task owns the separator process and pushes [`RelayEvent`]s
//! into a bounded channel; the HTTP response drains it. The stream always
//! opens with `0` and ends with exactly one terminal event. When the
//! response is dropped (client gone) the channel closes and the producer
//! kills the separator.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::progress::parse_progress;
use crate::resolver::{StemFiles, resolve_outputs};
use crate::runner::{SeparationProcess, SeparatorCommand};
use crate::storage::SeparationJob;

pub const DONE_MARKER: &str = "DONE";
pub const ERROR_MARKER: &str = "ERROR";
pub const FIELD_DELIMITER: char = '|';

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// One message on a job's progress stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// Percentage in `0..=99`.
    Progress(u8),
    /// Separation finished; names of the two stem files.
    Done { vocals: String, instrumental: String },
    /// Separation failed.
    Error,
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Progress(_))
    }

    /// Encode as a single server-sent event.
    pub fn to_sse(&self) -> Bytes {
        Bytes::from(format!("data: {self}\n\n"))
    }
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Progress(value) => write!(f, "{value}"),
            RelayEvent::Done {
                vocals,
                instrumental,
            } => write!(
                f,
                "{DONE_MARKER}{FIELD_DELIMITER}{vocals}{FIELD_DELIMITER}{instrumental}"
            ),
            RelayEvent::Error => f.write_str(ERROR_MARKER),
        }
    }
}

impl From<StemFiles> for RelayEvent {
    fn from(stems: StemFiles) -> Self {
        RelayEvent::Done {
            vocals: stems.vocals,
            instrumental: stems.instrumental,
        }
    }
}

enum JobOutcome {
    Completed(StemFiles),
    Failed(String),
    Abandoned,
}

/// Start separating `job` and return its event stream.
pub fn start(job: SeparationJob, separator: SeparatorCommand) -> mpsc::Receiver<RelayEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(run_job(job, separator, tx));
    rx
}

async fn run_job(job: SeparationJob, separator: SeparatorCommand, tx: mpsc::Sender<RelayEvent>) {
    if tx.send(RelayEvent::Progress(0)).await.is_err() {
        return;
    }
    let started = std::time::Instant::now();
    let terminal = match drive(&job, &separator, &tx).await {
        JobOutcome::Completed(stems) => {
            tracing::info!(
                job_id = %job.id,
                track = %job.track_name,
                vocals = %stems.vocals,
                instrumental = %stems.instrumental,
                elapsed_ms = %started.elapsed().as_millis(),
                "separation finished"
            );
            RelayEvent::from(stems)
        }
        JobOutcome::Failed(reason) => {
            tracing::warn!(job_id = %job.id, track = %job.track_name, reason = %reason, "separation failed");
            RelayEvent::Error
        }
        JobOutcome::Abandoned => return,
    };
    let _ = tx.send(terminal).await;
}

async fn drive(
    job: &SeparationJob,
    separator: &SeparatorCommand,
    tx: &mpsc::Sender<RelayEvent>,
) -> JobOutcome {
    let mut process = match separator.spawn(&job.upload_path, &job.output_root) {
        Ok(process) => process,
        Err(e) => return JobOutcome::Failed(format!("spawn {}: {e}", separator.program)),
    };
    tracing::info!(job_id = %job.id, pid = ?process.id(), "separator started");

    loop {
        tokio::select! {
            _ = tx.closed() => {
                abandon(job, &mut process).await;
                return JobOutcome::Abandoned;
            }
            line = process.next_line() => match line {
                Some(line) => {
                    tracing::debug!(job_id = %job.id, line = %line, "separator output");
                    let Some(value) = parse_progress(&line) else {
                        continue;
                    };
                    if tx.send(RelayEvent::Progress(value)).await.is_err() {
                        abandon(job, &mut process).await;
                        return JobOutcome::Abandoned;
                    }
                }
                None => break,
            },
        }
    }

    let status = tokio::select! {
        _ = tx.closed() => {
            abandon(job, &mut process).await;
            return JobOutcome::Abandoned;
        }
        status = process.wait() => status,
    };
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            for line in process.output_tail() {
                tracing::warn!(job_id = %job.id, line = %line, "separator output");
            }
            return JobOutcome::Failed(format!("separator exited with {status}"));
        }
        Err(e) => return JobOutcome::Failed(format!("wait for separator: {e}")),
    }

    match resolve_outputs(&job.track_dir, &job.track_name).await {
        Ok(stems) => JobOutcome::Completed(stems),
        Err(e) => JobOutcome::Failed(format!("{e:#}")),
    }
}

async fn abandon(job: &SeparationJob, process: &mut SeparationProcess) {
    tracing::info!(job_id = %job.id, "client disconnected; terminating separator");
    if let Err(e) = process.kill().await {
        tracing::warn!(job_id = %job.id, error = %e, "failed to kill separator");
    }
}

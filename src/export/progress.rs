//! Progress events and reporters.
//!
//! Each job emits zero or more [`ProgressEvent::Progress`] events with a
//! strictly increasing `completed` count, then exactly one terminal event.
//! Reporters may be shared across jobs; every event is tagged with the
//! [`JobId`] of the job that produced it.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::axes::IndexTuple;
use crate::error::ErrorKind;

/// Process-unique identifier of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        JobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// An event emitted by a running export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// `completed` of `total` units have been written
    Progress { completed: usize, total: usize },

    /// The destination was finalized
    Succeeded { destination: PathBuf, units: usize },

    /// The run stopped on an error; `index` names the failing unit if any
    Failed {
        kind: ErrorKind,
        detail: String,
        index: Option<IndexTuple>,
    },

    /// The run stopped on a cancellation request
    Cancelled { completed: usize },
}

impl ProgressEvent {
    /// Whether this event ends the job's event stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

/// Receiver of progress events.
///
/// `report` is called from the job's task and must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, job: JobId, event: ProgressEvent);
}

// =============================================================================
// Reporters
// =============================================================================

/// Forwards events to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<(JobId, ProgressEvent)>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(JobId, ProgressEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, job: JobId, event: ProgressEvent) {
        if self.tx.send((job, event)).is_err() {
            debug!(job = %job, "Progress receiver dropped");
        }
    }
}

/// Logs events with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, job: JobId, event: ProgressEvent) {
        match event {
            ProgressEvent::Progress { completed, total } => {
                debug!(job = %job, completed, total, "Export progress");
            }
            ProgressEvent::Succeeded { destination, units } => {
                info!(job = %job, destination = %destination.display(), units, "Export succeeded");
            }
            ProgressEvent::Failed {
                kind,
                detail,
                index,
            } => {
                let index = index.map(|i| i.to_string()).unwrap_or_default();
                warn!(job = %job, kind = %kind, index = %index, "Export failed: {}", detail);
            }
            ProgressEvent::Cancelled { completed } => {
                info!(job = %job, completed, "Export cancelled");
            }
        }
    }
}

/// Calls a closure for every event.
pub struct FnReporter<F>(F);

impl<F> FnReporter<F>
where
    F: Fn(JobId, ProgressEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ProgressReporter for FnReporter<F>
where
    F: Fn(JobId, ProgressEvent) + Send + Sync,
{
    fn report(&self, job: JobId, event: ProgressEvent) {
        (self.0)(job, event)
    }
}

//! Export job state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::axes::IndexTuple;
use crate::error::ExportError;
use crate::selection::IterationPlan;
use crate::source::SourceReader;

use super::progress::{JobId, ProgressEvent};

/// Handle for cancelling a running export.
///
/// Cancellation is cooperative: the pipeline observes the flag between
/// units. Cancelling a job that already finished has no effect.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One run of the pipeline: the source it reads, the plan it follows, the
/// destination it writes, and how far it got.
pub struct ExportJob {
    id: JobId,
    source: Box<dyn SourceReader>,
    plan: IterationPlan,
    destination: PathBuf,
    completed: usize,
    cancel: CancelHandle,
}

impl ExportJob {
    pub fn new(
        source: Box<dyn SourceReader>,
        plan: IterationPlan,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: JobId::next(),
            source,
            plan,
            destination: destination.into(),
            completed: 0,
            cancel: CancelHandle::new(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source(&self) -> &dyn SourceReader {
        self.source.as_ref()
    }

    pub fn plan(&self) -> &IterationPlan {
        &self.plan
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Units written so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Units in the plan.
    pub fn total(&self) -> usize {
        self.plan.len()
    }

    /// A handle that cancels this job.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn record_unit(&mut self) -> usize {
        self.completed += 1;
        self.completed
    }
}

/// How a job ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded {
        destination: PathBuf,
        units: usize,
    },
    Failed {
        error: ExportError,
        index: Option<IndexTuple>,
    },
    Cancelled {
        completed: usize,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    /// Terminal event reporting this outcome.
    pub fn to_event(&self) -> ProgressEvent {
        match self {
            JobOutcome::Succeeded { destination, units } => ProgressEvent::Succeeded {
                destination: destination.clone(),
                units: *units,
            },
            JobOutcome::Failed { error, index } => ProgressEvent::Failed {
                kind: error.kind(),
                detail: error.to_string(),
                index: index.clone(),
            },
            JobOutcome::Cancelled { completed } => ProgressEvent::Cancelled {
                completed: *completed,
            },
        }
    }
}

//! Export service: the entry point for callers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ExportService                         │
//! │  start_export()                                              │
//! │   1. open_source   ─┐  errors returned to the caller         │
//! │   2. resolve plan  ─┘                                        │
//! │   3. tokio::spawn ──────► ExportPipeline::run(job)           │
//! │   4. return JobHandle        │            │                  │
//! │                              ▼            ▼                  │
//! │                       SourceReader   SinkWriter              │
//! │                              └──► ProgressReporter ◄──┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::axes::AxisMetadata;
use crate::error::ExportError;
use crate::format::open_source;
use crate::selection::{resolve, SelectionSpec};
use crate::sink::{OmeTiffSink, SinkWriter};

use super::job::{CancelHandle, ExportJob, JobOutcome};
use super::pipeline::ExportPipeline;
use super::progress::{JobId, ProgressReporter};

// =============================================================================
// Export Request
// =============================================================================

/// A request to export a subset of a source file.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Source file (ND2 or OME-TIFF)
    pub source: PathBuf,

    /// Destination OME-TIFF path
    pub destination: PathBuf,

    /// Which indices to export along each axis
    pub selection: SelectionSpec,
}

impl ExportRequest {
    /// Export everything from `source` to `destination`.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            selection: SelectionSpec::all(),
        }
    }

    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }
}

// =============================================================================
// Job Handle
// =============================================================================

/// Handle to an export running in the background.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    cancel: CancelHandle,
    task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Request cancellation. Non-blocking; a no-op once the job finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clonable handle that cancels this job.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Whether the job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job to finish.
    ///
    /// # Errors
    ///
    /// [`ExportError::IoFailure`] if the background task panicked or was
    /// aborted by the runtime.
    pub async fn wait(self) -> Result<JobOutcome, ExportError> {
        self.task
            .await
            .map_err(|e| ExportError::IoFailure(format!("export task {} failed: {}", self.id, e)))
    }
}

// =============================================================================
// Export Service
// =============================================================================

/// Opens sources, resolves selections and runs exports.
///
/// Each export owns its reader and sink handle; only the reporter may be
/// shared between concurrent jobs.
#[derive(Debug, Clone, Default)]
pub struct ExportService<S = OmeTiffSink> {
    sink: S,
}

impl ExportService<OmeTiffSink> {
    /// Service writing OME-TIFF files.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> ExportService<S>
where
    S: SinkWriter + Clone + 'static,
    S::Handle: 'static,
{
    /// Service writing through a custom sink.
    pub fn with_sink(sink: S) -> Self {
        Self { sink }
    }

    /// Open `path` and return its axis metadata without reading pixels.
    ///
    /// # Errors
    ///
    /// [`ExportError::SourceUnreadable`] if the file is missing or not a
    /// supported format.
    pub async fn load_metadata(&self, path: impl AsRef<Path>) -> Result<AxisMetadata, ExportError> {
        let source = open_source(path).await?;
        let metadata = source.metadata().clone();
        source.close().await;
        Ok(metadata)
    }

    /// Open the source, resolve the plan, and spawn the export.
    ///
    /// Returns as soon as the job is spawned. Progress and the terminal
    /// outcome are delivered to `reporter`.
    ///
    /// # Errors
    ///
    /// Opening and resolution errors (`SourceUnreadable`, `InvalidSelection`,
    /// `UnknownAxis`, `EmptySelection`) are returned here and never reported
    /// as events.
    pub async fn start_export(
        &self,
        request: ExportRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<JobHandle, ExportError> {
        let job = self.prepare(request).await?;
        Ok(self.spawn(job, reporter))
    }

    /// Run an export on the current task and wait for its outcome.
    pub async fn run_export(
        &self,
        request: ExportRequest,
        reporter: &dyn ProgressReporter,
    ) -> Result<JobOutcome, ExportError> {
        let mut job = self.prepare(request).await?;
        Ok(ExportPipeline::new(&self.sink, reporter).run(&mut job).await)
    }

    /// Cancel a running job.
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }

    /// Spawn a prepared job onto the tokio runtime.
    pub fn spawn(&self, mut job: ExportJob, reporter: Arc<dyn ProgressReporter>) -> JobHandle {
        let id = job.id();
        let cancel = job.cancel_handle();
        let sink = self.sink.clone();

        let task = tokio::spawn(async move {
            ExportPipeline::new(&sink, reporter.as_ref())
                .run(&mut job)
                .await
        });

        JobHandle { id, cancel, task }
    }

    async fn prepare(&self, request: ExportRequest) -> Result<ExportJob, ExportError> {
        let source = open_source(&request.source).await?;

        let plan = match resolve(source.metadata(), &request.selection) {
            Ok(plan) => plan,
            Err(err) => {
                source.close().await;
                return Err(err);
            }
        };

        let job = ExportJob::new(source, plan, request.destination);
        info!(
            job = %job.id(),
            source = %request.source.display(),
            units = job.total(),
            "Prepared export"
        );
        Ok(job)
    }
}

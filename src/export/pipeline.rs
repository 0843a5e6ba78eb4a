//! Export pipeline.
//!
//! Drives one [`ExportJob`] end to end:
//!
//! ```text
//! sink.begin -> for each unit in plan order:
//!                 cancelled?  -> sink.abort, Cancelled
//!                 read_slice  -> write_unit -> Progress
//!                 error       -> sink.abort, Failed
//!            -> sink.finalize -> Succeeded
//! ```
//!
//! Units are processed one at a time; the pipeline never reorders or
//! parallelizes them.

use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::sink::SinkWriter;

use super::job::{ExportJob, JobOutcome};
use super::progress::{ProgressEvent, ProgressReporter};

/// Runs export jobs against a sink, reporting to a reporter.
pub struct ExportPipeline<'a, S: SinkWriter> {
    sink: &'a S,
    reporter: &'a dyn ProgressReporter,
}

impl<'a, S: SinkWriter> ExportPipeline<'a, S> {
    pub fn new(sink: &'a S, reporter: &'a dyn ProgressReporter) -> Self {
        Self { sink, reporter }
    }

    /// Run `job` to a terminal state.
    ///
    /// Emits the progress events and exactly one terminal event, closes the
    /// job's source, and returns the outcome it reported.
    pub async fn run(&self, job: &mut ExportJob) -> JobOutcome {
        info!(
            job = %job.id(),
            source = job.source().identifier(),
            destination = %job.destination().display(),
            units = job.total(),
            "Starting export"
        );

        let outcome = self.drive(job).await;
        job.source().close().await;

        match &outcome {
            JobOutcome::Succeeded { units, .. } => {
                info!(job = %job.id(), units, "Export finished");
            }
            JobOutcome::Failed { error, index } => {
                warn!(job = %job.id(), kind = %error.kind(), index = ?index, "Export failed: {}", error);
            }
            JobOutcome::Cancelled { completed } => {
                info!(job = %job.id(), completed, "Export cancelled");
            }
        }

        self.reporter.report(job.id(), outcome.to_event());
        outcome
    }

    async fn drive(&self, job: &mut ExportJob) -> JobOutcome {
        let total = job.total();

        let mut handle = match self
            .sink
            .begin(job.destination(), job.source().metadata(), job.plan())
            .await
        {
            Ok(handle) => handle,
            Err(error) => return JobOutcome::Failed { error, index: None },
        };

        for n in 0..total {
            if job.is_cancelled() {
                self.sink.abort(handle).await;
                return JobOutcome::Cancelled {
                    completed: job.completed(),
                };
            }

            let Some(index) = job.plan().unit(n) else {
                break;
            };

            let buffer = match job.source().read_slice(&index).await {
                Ok(buffer) => buffer,
                Err(error) => {
                    self.sink.abort(handle).await;
                    return JobOutcome::Failed {
                        error,
                        index: Some(index),
                    };
                }
            };

            if let Err(error) = self.sink.write_unit(&mut handle, &index, &buffer).await {
                self.sink.abort(handle).await;
                return JobOutcome::Failed {
                    error,
                    index: Some(index),
                };
            }

            let completed = job.record_unit();
            debug!(job = %job.id(), index = %index, completed, total, "Wrote unit");
            self.reporter
                .report(job.id(), ProgressEvent::Progress { completed, total });
        }

        match self.sink.finalize(handle).await {
            Ok(destination) => JobOutcome::Succeeded {
                destination,
                units: job.completed(),
            },
            Err(error) => JobOutcome::Failed {
                error: match error {
                    ExportError::WriteFailure(_) => error,
                    other => ExportError::WriteFailure(other.to_string()),
                },
                index: None,
            },
        }
    }
}

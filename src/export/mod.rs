//! Export orchestration.
//!
//! - [`ExportService`]: opens sources, resolves selections, spawns jobs
//! - [`ExportPipeline`]: drives one [`ExportJob`] through a [`SinkWriter`](crate::sink::SinkWriter)
//! - [`ProgressReporter`]: receives [`ProgressEvent`]s tagged with a [`JobId`]

mod job;
mod pipeline;
mod progress;
mod service;

pub use job::{CancelHandle, ExportJob, JobOutcome};
pub use pipeline::ExportPipeline;
pub use progress::{
    ChannelReporter, FnReporter, JobId, ProgressEvent, ProgressReporter, TracingReporter,
};
pub use service::{ExportRequest, ExportService, JobHandle};

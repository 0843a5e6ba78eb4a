//! # nd2-export
//!
//! Dimension-aware lazy export of multidimensional microscopy acquisitions
//! (Nikon ND2) to OME-TIFF.
//!
//! Opening a file reads only its headers and metadata. An export resolves a
//! per-axis selection into an ordered plan of 2-D planes and streams exactly
//! those planes from the source into a BigTIFF container, one at a time, in
//! a background tokio task that reports progress and can be cancelled.
//!
//! ## Features
//!
//! - **Lazy reads**: pixel data is fetched one plane per read, never the whole file
//! - **Subset selection**: any combination of Position, Scene, Time, Channel and Z indices
//! - **Metadata preservation**: calibration, channel names and colors, plane timestamps
//! - **Safe output**: planes go to `<dest>.partial`, renamed only once finalized
//! - **Round trips**: exported files can be reopened as sources
//!
//! ## Architecture
//!
//! - [`io`] - byte-range reads with block caching
//! - [`mod@format`] - ND2 and OME-TIFF readers, TIFF writer primitives
//! - [`axes`] - axis metadata model and index tuples
//! - [`selection`] - selection specs and the subset resolver
//! - [`sink`] - destination writers
//! - [`export`] - pipeline, jobs, progress reporting and the export service
//! - [`config`] - CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nd2_export::{AxisKind, ExportRequest, ExportService, SelectionSpec, TracingReporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nd2_export::ExportError> {
//!     let service = ExportService::new();
//!
//!     let metadata = service.load_metadata("cells.nd2").await?;
//!     println!("{} planes", metadata.plane_count());
//!
//!     let selection = SelectionSpec::all()
//!         .with_indices(AxisKind::Position, [1])
//!         .with_indices(AxisKind::Z, [0, 5, 9]);
//!     let request = ExportRequest::new("cells.nd2", "cells.ome.tif").with_selection(selection);
//!
//!     let handle = service.start_export(request, Arc::new(TracingReporter)).await?;
//!     let outcome = handle.wait().await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod axes;
pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod io;
pub mod selection;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use axes::{
    Axis, AxisKind, AxisMetadata, Calibration, ChannelInfo, IndexTuple, PixelType,
};
pub use config::{Cli, Command, ExportConfig, InfoConfig};
pub use error::{
    ErrorKind, ExportError, FormatError, IoError, Nd2Error, SelectionParseError, TiffError,
};
pub use export::{
    CancelHandle, ChannelReporter, ExportJob, ExportPipeline, ExportRequest, ExportService,
    FnReporter, JobHandle, JobId, JobOutcome, ProgressEvent, ProgressReporter, TracingReporter,
};
pub use format::nd2::Nd2Reader;
pub use format::tiff::OmeTiffReader;
pub use format::{detect_format, open_source, SourceFormat};
pub use io::{BlockCache, FileRangeReader, RangeReader};
pub use selection::{resolve, AxisSelection, IterationPlan, SelectionSpec};
pub use sink::{partial_path, OmeTiffSink, SinkWriter, PARTIAL_SUFFIX};
pub use source::{PixelBuffer, SourceReader};

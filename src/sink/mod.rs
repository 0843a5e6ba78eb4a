//! Destination writers.
//!
//! A [`SinkWriter`] receives planes one at a time, strictly in plan order,
//! and only makes the destination visible once every plane has been written
//! and [`finalize`](SinkWriter::finalize) succeeds.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::axes::{AxisMetadata, IndexTuple};
use crate::error::ExportError;
use crate::selection::IterationPlan;
use crate::source::PixelBuffer;

mod ome_tiff;

pub use ome_tiff::{OmeTiffHandle, OmeTiffSink};

/// Suffix of the in-progress file written next to the destination.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Path of the in-progress file for a destination: `<dest>.partial`.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Incremental writer of an export destination.
///
/// The sink is stateless; all per-export state lives in the `Handle`
/// returned by [`begin`](SinkWriter::begin), which is consumed by exactly one
/// of [`finalize`](SinkWriter::finalize) or [`abort`](SinkWriter::abort).
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Per-export state.
    type Handle: Send;

    /// Prepare the destination for `plan`.
    ///
    /// # Errors
    ///
    /// [`ExportError::DestinationUnwritable`] if the destination cannot be
    /// created.
    async fn begin(
        &self,
        destination: &Path,
        metadata: &AxisMetadata,
        plan: &IterationPlan,
    ) -> Result<Self::Handle, ExportError>;

    /// Append one plane. Units must arrive in plan order.
    ///
    /// # Errors
    ///
    /// [`ExportError::WriteFailure`] on I/O errors, out-of-order units, or
    /// planes whose geometry does not match the metadata.
    async fn write_unit(
        &self,
        handle: &mut Self::Handle,
        index: &IndexTuple,
        buffer: &PixelBuffer,
    ) -> Result<(), ExportError>;

    /// Complete the container and move it to the destination path.
    ///
    /// Returns the final destination path.
    async fn finalize(&self, handle: Self::Handle) -> Result<PathBuf, ExportError>;

    /// Stop writing. The destination path is never created.
    async fn abort(&self, handle: Self::Handle);
}

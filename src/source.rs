//! Source reader abstraction.
//!
//! A [`SourceReader`] opens a multidimensional acquisition, exposes its
//! [`AxisMetadata`] and serves individual 2-D planes on demand. Opening a
//! reader only parses headers and metadata; pixel bytes are read one plane
//! at a time by [`SourceReader::read_slice`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::axes::{AxisMetadata, IndexTuple, PixelType};
use crate::error::ExportError;

/// One 2-D plane of pixel data.
///
/// `data` holds `width * height` samples in little-endian byte order, rows
/// packed without padding.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    pub data: Bytes,

    /// Acquisition timestamp in milliseconds, if the source records one
    pub timestamp_ms: Option<f64>,
}

impl PixelBuffer {
    /// Expected payload size for this geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_type.bytes_per_sample()
    }
}

/// Lazy reader over a multidimensional acquisition.
///
/// Implementations must be object-safe so that format detection can hand
/// out a `Box<dyn SourceReader>`.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Axis metadata discovered at open time.
    fn metadata(&self) -> &AxisMetadata;

    /// Read one plane.
    ///
    /// # Errors
    ///
    /// - [`ExportError::IndexOutOfRange`] if the tuple does not match the
    ///   source's axes or a component exceeds its extent
    /// - [`ExportError::IoFailure`] for truncated data, I/O errors, or reads
    ///   after [`close`](SourceReader::close)
    async fn read_slice(&self, index: &IndexTuple) -> Result<PixelBuffer, ExportError>;

    /// Release the underlying file handle. Idempotent.
    async fn close(&self);

    /// Identifier of the source (its path), for logging.
    fn identifier(&self) -> &str;
}

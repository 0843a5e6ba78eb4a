use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a file-like resource.
///
/// Container parsers (ND2 chunk maps, TIFF IFD chains) work on top of this
/// abstraction so they never need the whole file in memory. Implementations
/// must be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging and cache keys).
    ///
    /// For local files this is the path.
    fn identifier(&self) -> &str;

    /// Release the underlying handle. Reads issued afterwards fail with
    /// [`IoError::Closed`]. Calling it more than once is a no-op.
    async fn close(&self) {}
}

#[async_trait]
impl<R: RangeReader + ?Sized> RangeReader for Arc<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        (**self).read_exact_at(offset, len).await
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn identifier(&self) -> &str {
        (**self).identifier()
    }

    async fn close(&self) {
        (**self).close().await
    }
}

// =============================================================================
// Field Readers
// =============================================================================
//
// ND2 chunk headers, chunk maps and lite-variant metadata are always
// little-endian; TIFF may be either. Each reader panics if `bytes` is
// shorter than the field.

#[inline]
fn field<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes(field(bytes))
}

#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(field(bytes))
}

#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(field(bytes))
}

/// Read a little-endian IEEE double (ND2 frame timestamps, CLX doubles).
#[inline]
pub fn read_f64_le(bytes: &[u8]) -> f64 {
    f64::from_le_bytes(field(bytes))
}

/// Read a big-endian u16, for TIFF files written in Motorola order.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes(field(bytes))
}

#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(field(bytes))
}

#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(field(bytes))
}

//! Source format detection by magic bytes.
//!
//! - **ND2**: starts with the chunk magic `0x0ABECEDA` (little-endian)
//! - **OME-TIFF**: TIFF or BigTIFF header (`II`/`MM` + 42/43)
//!
//! Legacy JPEG2000-based ND2 files are recognized only to be rejected with
//! a clear reason.

use serde::Serialize;

use crate::error::FormatError;
use crate::io::{read_u32_le, RangeReader};

use super::nd2::ND2_CHUNK_MAGIC;
use super::tiff::{ByteOrder, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};

/// JPEG2000 signature box that opens legacy ND2 files.
const LEGACY_ND2_MAGIC: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// Detected source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceFormat {
    /// Nikon ND2 (chunked container, version 3)
    Nd2,

    /// OME-TIFF (TIFF or BigTIFF with OME-XML)
    OmeTiff,
}

impl SourceFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            SourceFormat::Nd2 => "ND2",
            SourceFormat::OmeTiff => "OME-TIFF",
        }
    }
}

/// Detect the format of a source file from its first bytes.
pub async fn detect_format<R: RangeReader>(reader: &R) -> Result<SourceFormat, FormatError> {
    let len = (reader.size() as usize).min(BIGTIFF_HEADER_SIZE);
    if len < 4 {
        return Err(FormatError::UnsupportedFormat {
            reason: "file too small to identify".to_string(),
        });
    }

    let bytes = reader.read_exact_at(0, len).await?;
    detect_from_bytes(&bytes)
}

/// Classify header bytes.
pub fn detect_from_bytes(bytes: &[u8]) -> Result<SourceFormat, FormatError> {
    if bytes.len() >= 4 && read_u32_le(bytes) == ND2_CHUNK_MAGIC {
        return Ok(SourceFormat::Nd2);
    }

    if is_tiff_header(bytes) {
        return Ok(SourceFormat::OmeTiff);
    }

    if bytes.starts_with(&LEGACY_ND2_MAGIC) {
        return Err(FormatError::UnsupportedFormat {
            reason: "legacy JPEG2000-based ND2 files are not supported".to_string(),
        });
    }

    Err(FormatError::UnsupportedFormat {
        reason: "not an ND2 or TIFF file".to_string(),
    })
}

/// Check if bytes represent a TIFF or BigTIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }

    let byte_order = match [bytes[0], bytes[1]] {
        [0x49, 0x49] => ByteOrder::LittleEndian,
        [0x4D, 0x4D] => ByteOrder::BigEndian,
        _ => return false,
    };

    matches!(byte_order.read_u16(&bytes[2..4]), 42 | 43)
}

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::axes::{AxisKind, IndexTuple};

/// I/O errors that can occur when reading byte ranges from a file
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Underlying read failed (permissions, device errors, short reads)
    #[error("I/O error: {0}")]
    Io(String),

    /// Reader was closed before the read was issued
    #[error("Reader closed: {0}")]
    Closed(String),
}

/// Errors related to source format detection
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// File format is not supported
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing ND2 containers
#[derive(Debug, Clone, Error)]
pub enum Nd2Error {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// A chunk header did not start with the ND2 chunk magic
    #[error("Invalid chunk magic at offset {offset}: expected 0x0ABECEDA, got 0x{magic:08X}")]
    InvalidChunkMagic { offset: u64, magic: u32 },

    /// The first chunk is not the ND2 file signature
    #[error("Missing ND2 file signature")]
    MissingSignature,

    /// The trailing chunk map signature is absent or damaged
    #[error("Missing or damaged chunk map")]
    MissingChunkMap,

    /// A required chunk is not listed in the chunk map
    #[error("Missing chunk: {0}")]
    MissingChunk(String),

    /// A lite-variant metadata block could not be decoded
    #[error("Malformed metadata in {chunk}: {message}")]
    MalformedMetadata { chunk: String, message: String },

    /// A required attribute is missing from the image attributes
    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// The file uses a feature this reader does not handle
    #[error("Unsupported ND2 file: {0}")]
    Unsupported(String),
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only uncompressed planes are supported)")]
    UnsupportedCompression(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// ImageDescription is missing or is not usable OME-XML
    #[error("Invalid OME-XML: {0}")]
    InvalidOmeXml(String),

    /// Plane layout the reader cannot serve
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),
}

/// Errors produced while parsing user axis selections (e.g. `0-2,7`)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionParseError {
    /// Token is not a non-negative integer
    #[error("Invalid index '{0}': expected a non-negative integer")]
    InvalidIndex(String),

    /// Range with start after end, or malformed bounds
    #[error("Invalid range '{0}': expected START-END with START <= END")]
    InvalidRange(String),

    /// Axis name is not one of position, scene, channel, time, z
    #[error("Unknown axis name '{0}'")]
    UnknownAxisName(String),
}

// =============================================================================
// Export Errors
// =============================================================================

/// Kind of an export error, used in terminal `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SourceUnreadable,
    IoFailure,
    IndexOutOfRange,
    InvalidSelection,
    UnknownAxis,
    EmptySelection,
    DestinationUnwritable,
    WriteFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SourceUnreadable => "SourceUnreadable",
            ErrorKind::IoFailure => "IoFailure",
            ErrorKind::IndexOutOfRange => "IndexOutOfRange",
            ErrorKind::InvalidSelection => "InvalidSelection",
            ErrorKind::UnknownAxis => "UnknownAxis",
            ErrorKind::EmptySelection => "EmptySelection",
            ErrorKind::DestinationUnwritable => "DestinationUnwritable",
            ErrorKind::WriteFailure => "WriteFailure",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the export core.
///
/// Metadata and resolution errors (`SourceUnreadable`, `InvalidSelection`,
/// `UnknownAxis`, `EmptySelection`) are returned directly to the caller.
/// The remaining kinds happen while a job runs and are reported through a
/// terminal `Failed` event.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    /// Source file is absent, corrupt, or not a recognized format
    #[error("Source unreadable: {path}: {reason}")]
    SourceUnreadable { path: String, reason: String },

    /// Reading a unit failed (truncated file, I/O error, closed reader)
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// An index tuple does not fit the source's axes
    #[error("Index out of range at {index}: {detail}")]
    IndexOutOfRange { index: IndexTuple, detail: String },

    /// A requested index lies outside `[0, extent)`
    #[error("Invalid selection: index {index} is out of range for axis {axis} (extent {extent})")]
    InvalidSelection {
        axis: AxisKind,
        index: usize,
        extent: usize,
    },

    /// The selection names an axis the source does not have
    #[error("Unknown axis: the source has no {0} axis")]
    UnknownAxis(AxisKind),

    /// The selection would export nothing
    #[error("Empty selection: no indices selected for axis {0}")]
    EmptySelection(AxisKind),

    /// The destination could not be created
    #[error("Destination unwritable: {path}: {reason}")]
    DestinationUnwritable { path: String, reason: String },

    /// Writing to the destination failed mid-run
    #[error("Write failure: {0}")]
    WriteFailure(String),
}

impl ExportError {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            ExportError::IoFailure(_) => ErrorKind::IoFailure,
            ExportError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            ExportError::InvalidSelection { .. } => ErrorKind::InvalidSelection,
            ExportError::UnknownAxis(_) => ErrorKind::UnknownAxis,
            ExportError::EmptySelection(_) => ErrorKind::EmptySelection,
            ExportError::DestinationUnwritable { .. } => ErrorKind::DestinationUnwritable,
            ExportError::WriteFailure(_) => ErrorKind::WriteFailure,
        }
    }

    /// Wrap an open-time error as `SourceUnreadable`.
    pub fn source_unreadable(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        ExportError::SourceUnreadable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a destination creation error as `DestinationUnwritable`.
    pub fn destination_unwritable(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        ExportError::DestinationUnwritable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

// Errors met while reading a slice are I/O failures; open-time errors are
// mapped explicitly with `ExportError::source_unreadable`.

impl From<IoError> for ExportError {
    fn from(err: IoError) -> Self {
        ExportError::IoFailure(err.to_string())
    }
}

impl From<Nd2Error> for ExportError {
    fn from(err: Nd2Error) -> Self {
        ExportError::IoFailure(err.to_string())
    }
}

impl From<TiffError> for ExportError {
    fn from(err: TiffError) -> Self {
        ExportError::IoFailure(err.to_string())
    }
}

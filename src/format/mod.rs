//! Source and container formats.
//!
//! # Format Detection
//!
//! Use [`open_source`] to open any supported file as a
//! [`SourceReader`]. The format is identified from the file's magic bytes by
//! [`detect::detect_format`]:
//!
//! - **ND2**: Nikon chunked container ([`nd2::Nd2Reader`])
//! - **OME-TIFF**: TIFF/BigTIFF with OME-XML ([`tiff::OmeTiffReader`]),
//!   which also reads back the files this crate writes

pub mod detect;
pub mod nd2;
pub mod tiff;

use std::path::Path;

use tracing::debug;

use crate::error::ExportError;
use crate::io::FileRangeReader;
use crate::source::SourceReader;

pub use detect::{detect_format, is_tiff_header, SourceFormat};

/// Open a source file, dispatching on its detected format.
///
/// # Errors
///
/// [`ExportError::SourceUnreadable`] if the file is missing, unrecognized,
/// or its metadata cannot be parsed.
pub async fn open_source(path: impl AsRef<Path>) -> Result<Box<dyn SourceReader>, ExportError> {
    let path = path.as_ref();
    let unreadable = |e: &dyn std::fmt::Display| ExportError::source_unreadable(path.display(), e);

    let file = FileRangeReader::open(path)
        .await
        .map_err(|e| unreadable(&e))?;
    let format = detect_format(&file).await.map_err(|e| unreadable(&e))?;

    debug!(path = %path.display(), format = format.name(), "Detected source format");

    let source: Box<dyn SourceReader> = match format {
        SourceFormat::Nd2 => Box::new(
            nd2::Nd2Reader::from_reader(file)
                .await
                .map_err(|e| unreadable(&e))?,
        ),
        SourceFormat::OmeTiff => Box::new(
            tiff::OmeTiffReader::from_reader(file)
                .await
                .map_err(|e| unreadable(&e))?,
        ),
    };

    Ok(source)
}

use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::RangeReader;
use crate::error::IoError;

/// Range reader over a local file.
///
/// The file handle sits behind an async mutex; each read is a seek followed
/// by `read_exact`. Reads are therefore serialized per reader, which matches
/// how the export pipeline consumes a source (one unit at a time).
pub struct FileRangeReader {
    file: Mutex<Option<File>>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open a file for range reads.
    ///
    /// # Errors
    ///
    /// - [`IoError::NotFound`] if the path does not exist
    /// - [`IoError::Io`] if the path is a directory or cannot be opened
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();

        let file = File::open(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => IoError::NotFound(identifier.clone()),
            _ => IoError::Io(format!("{}: {}", identifier, e)),
        })?;

        let meta = file
            .metadata()
            .await
            .map_err(|e| IoError::Io(format!("{}: {}", identifier, e)))?;
        if !meta.is_file() {
            return Err(IoError::Io(format!("{}: not a regular file", identifier)));
        }

        debug!(path = %identifier, size = meta.len(), "Opened file");

        Ok(Self {
            file: Mutex::new(Some(file)),
            size: meta.len(),
            identifier,
        })
    }

    /// Whether [`close`](RangeReader::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.file.lock().await.is_none()
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset.checked_add(len as u64).map_or(true, |end| end > self.size) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| IoError::Closed(self.identifier.clone()))?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::Io(format!("{}: seek to {}: {}", self.identifier, offset, e)))?;

        let mut buf = BytesMut::zeroed(len);
        file.read_exact(&mut buf).await.map_err(|e| {
            IoError::Io(format!(
                "{}: read {} bytes at {}: {}",
                self.identifier, len, offset, e
            ))
        })?;

        Ok(buf.freeze())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn close(&self) {
        if self.file.lock().await.take().is_some() {
            debug!(path = %self.identifier, "Closed file");
        }
    }
}

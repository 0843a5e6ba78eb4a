//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry or at an offset in the
//! file. Arrays (strip offsets and byte counts) are fetched in a single
//! range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

/// Reads tag values respecting the file's byte order and TIFF flavor.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw bytes of an entry's value, inline or fetched from its offset.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header.byte_order);
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// Single unsigned integer (Short, Long or Long8).
    pub async fn read_u64(&self, tag: TiffTag, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.header.byte_order) {
            return Ok(value);
        }

        let values = self.read_u64_array(tag, entry).await?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected count 1, got {}", entry.count),
            }),
        }
    }

    /// Array of unsigned integers, widened to u64.
    pub async fn read_u64_array(
        &self,
        tag: TiffTag,
        entry: &IfdEntry,
    ) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        let width = match field_type {
            FieldType::Short | FieldType::Long | FieldType::Long8 => field_type.size_in_bytes(),
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: tag.name(),
                    message: format!("expected Short, Long, or Long8, got {:?}", other),
                })
            }
        };

        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        let byte_order = self.header.byte_order;

        Ok(bytes
            .chunks_exact(width)
            .map(|chunk| match field_type {
                FieldType::Short => byte_order.read_u16(chunk) as u64,
                FieldType::Long => byte_order.read_u32(chunk) as u64,
                _ => byte_order.read_u64(chunk),
            })
            .collect())
    }

    /// ASCII string with the trailing NUL stripped.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; OME-XML written by
    /// other tools is occasionally Latin-1.
    pub async fn read_string(&self, tag: TiffTag, entry: &IfdEntry) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected Ascii, got type {}", entry.field_type_raw),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

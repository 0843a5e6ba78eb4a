//! BigTIFF encoding.
//!
//! Produces little-endian BigTIFF headers and IFDs. Entries are sorted by
//! tag; values that do not fit the 8-byte value field are placed right
//! after the IFD table, each padded to an 8-byte boundary.

use super::parser::{BIGTIFF_HEADER_SIZE, BYTE_ORDER_LITTLE_ENDIAN, VERSION_BIGTIFF};
use super::tags::{FieldType, TiffTag};

/// Size of one BigTIFF IFD entry.
const ENTRY_SIZE: u64 = 20;

/// Encode a little-endian BigTIFF header.
///
/// A `first_ifd_offset` of 0 produces the placeholder header of an
/// unfinalized file.
pub fn bigtiff_header(first_ifd_offset: u64) -> [u8; BIGTIFF_HEADER_SIZE] {
    let mut header = [0u8; BIGTIFF_HEADER_SIZE];
    header[0..2].copy_from_slice(&BYTE_ORDER_LITTLE_ENDIAN.to_le_bytes());
    header[2..4].copy_from_slice(&VERSION_BIGTIFF.to_le_bytes());
    header[4..6].copy_from_slice(&8u16.to_le_bytes());
    header[8..16].copy_from_slice(&first_ifd_offset.to_le_bytes());
    header
}

/// Round `offset` up to the next multiple of 8.
#[inline]
pub fn align8(offset: u64) -> u64 {
    (offset + 7) & !7
}

#[derive(Debug, Clone)]
struct Entry {
    tag: u16,
    field_type: FieldType,
    count: u64,
    data: Vec<u8>,
}

impl Entry {
    fn is_inline(&self) -> bool {
        self.data.len() <= 8
    }

    fn external_len(&self) -> u64 {
        if self.is_inline() {
            0
        } else {
            align8(self.data.len() as u64)
        }
    }
}

/// Builder for a single BigTIFF IFD.
#[derive(Debug, Clone, Default)]
pub struct IfdBuilder {
    entries: Vec<Entry>,
}

impl IfdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, tag: TiffTag, field_type: FieldType, count: u64, data: Vec<u8>) -> Self {
        self.entries.retain(|e| e.tag != tag.as_u16());
        self.entries.push(Entry {
            tag: tag.as_u16(),
            field_type,
            count,
            data,
        });
        self
    }

    pub fn short(self, tag: TiffTag, value: u16) -> Self {
        self.push(tag, FieldType::Short, 1, value.to_le_bytes().to_vec())
    }

    pub fn long(self, tag: TiffTag, value: u32) -> Self {
        self.push(tag, FieldType::Long, 1, value.to_le_bytes().to_vec())
    }

    pub fn long8_array(self, tag: TiffTag, values: &[u64]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push(tag, FieldType::Long8, values.len() as u64, data)
    }

    /// NUL-terminated ASCII value.
    pub fn ascii(self, tag: TiffTag, value: &str) -> Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        let count = data.len() as u64;
        self.push(tag, FieldType::Ascii, count, data)
    }

    /// Encoded size of the IFD including its out-of-line values.
    pub fn encoded_len(&self) -> u64 {
        let table = 8 + self.entries.len() as u64 * ENTRY_SIZE + 8;
        self.entries
            .iter()
            .fold(table, |len, e| len + e.external_len())
    }

    /// Encode the IFD as it will sit at file offset `at` (8-byte aligned),
    /// linking to `next_ifd_offset` (0 for the last IFD).
    pub fn encode(&self, at: u64, next_ifd_offset: u64) -> Vec<u8> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.tag);

        let table_len = 8 + entries.len() as u64 * ENTRY_SIZE + 8;
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        let mut external = Vec::new();
        let mut external_offset = at + table_len;

        out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for entry in &entries {
            out.extend_from_slice(&entry.tag.to_le_bytes());
            out.extend_from_slice(&(entry.field_type as u16).to_le_bytes());
            out.extend_from_slice(&entry.count.to_le_bytes());

            let mut field = [0u8; 8];
            if entry.is_inline() {
                field[..entry.data.len()].copy_from_slice(&entry.data);
            } else {
                field.copy_from_slice(&external_offset.to_le_bytes());
                external.extend_from_slice(&entry.data);
                external.resize(align8(external.len() as u64) as usize, 0);
                external_offset += entry.external_len();
            }
            out.extend_from_slice(&field);
        }
        out.extend_from_slice(&next_ifd_offset.to_le_bytes());
        out.extend_from_slice(&external);
        out
    }
}

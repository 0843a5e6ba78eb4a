//! TIFF header and IFD chain parsing.
//!
//! ```text
//!            order  version  first IFD
//! TIFF:      II|MM  42       u32 at 4
//! BigTIFF:   II|MM  43       offset size u16 = 8, reserved u16, u64 at 8
//! ```
//!
//! Exports are written as little-endian BigTIFF, but any byte order and
//! either flavor is accepted on read. The exporter writes a zero first-IFD
//! offset until it finalizes, so an unfinished `.partial` never parses.

use std::collections::HashSet;

use tracing::debug;

use crate::error::TiffError;
use crate::io::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

/// "II"
pub const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
/// "MM"
pub const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

pub const VERSION_TIFF: u16 = 42;
pub const VERSION_BIGTIFF: u16 = 43;

pub const TIFF_HEADER_SIZE: usize = 8;
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on IFDs followed in one chain.
const MAX_IFD_COUNT: usize = 1 << 20;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order declared by the first two bytes of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the first 8 (TIFF) or 16 (BigTIFF) bytes of a file.
    ///
    /// A first-IFD offset of 0, or one past the end of the file, is
    /// [`TiffError::InvalidIfdOffset`].
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Size of an IFD entry: 12 bytes (classic) or 20 bytes (BigTIFF).
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of offsets, and of the value/offset field of an entry.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IFD Entries
// =============================================================================

/// One 12- or 20-byte IFD entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Numeric tag ID
    pub tag: u16,

    /// Decoded field type, `None` if this crate does not handle it
    pub field_type: Option<FieldType>,

    /// Raw field type value
    pub field_type_raw: u16,

    /// Number of values
    pub count: u64,

    /// Raw value/offset field (4 or 8 bytes)
    pub value_offset_bytes: Vec<u8>,

    /// Whether the value is stored in `value_offset_bytes`
    pub is_inline: bool,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let byte_order = header.byte_order;
        let tag = byte_order.read_u16(&bytes[0..2]);
        let field_type_raw = byte_order.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_start) = if header.is_bigtiff {
            (byte_order.read_u64(&bytes[4..12]), 12)
        } else {
            (byte_order.read_u32(&bytes[4..8]) as u64, 8)
        };
        let value_offset_bytes = bytes[value_start..value_start + header.offset_size()].to_vec();

        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }

    /// Total byte size of the value, if the field type is known.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|ft| ft.size_in_bytes() as u64 * self.count)
    }

    /// Interpret the value/offset field as an offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() == 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Single inline integer value (Short, Long or Long8 with count 1).
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_offset_bytes)),
            _ => None,
        }
    }
}

// =============================================================================
// IFD
// =============================================================================

/// An Image File Directory: the tag entries of one plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    /// Entries in file order
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Read the IFD at `offset`.
    pub async fn read<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, TiffError> {
        if offset == 0 || offset >= reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
        let count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)
        } else {
            header.byte_order.read_u16(&count_bytes) as u64
        };

        let body_len = count as usize * header.ifd_entry_size() + header.offset_size();
        let body = reader
            .read_exact_at(offset + header.ifd_count_size() as u64, body_len)
            .await?;

        Ok(Self::parse_entries(&body, count as usize, header))
    }

    /// Parse `count` entries followed by the next-IFD offset.
    pub fn parse_entries(bytes: &[u8], count: usize, header: &TiffHeader) -> Self {
        let entry_size = header.ifd_entry_size();
        let entries = (0..count)
            .map(|i| IfdEntry::parse(&bytes[i * entry_size..(i + 1) * entry_size], header))
            .collect();
        let next_ifd_offset = header.read_offset(&bytes[count * entry_size..]);

        Ifd {
            entries,
            next_ifd_offset,
        }
    }

    /// Look up an entry by tag.
    pub fn get(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag.as_u16())
    }

    /// Look up an entry that must be present.
    pub fn require(&self, tag: TiffTag) -> Result<&IfdEntry, TiffError> {
        self.get(tag).ok_or(TiffError::MissingTag(tag.name()))
    }
}

/// Read the whole IFD chain starting at the header's first IFD.
///
/// Stops at a zero next-offset; a loop in the chain is an error.
pub async fn read_ifd_chain<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 {
        if !seen.insert(offset) || ifds.len() >= MAX_IFD_COUNT {
            return Err(TiffError::InvalidIfdOffset(offset));
        }
        let ifd = Ifd::read(reader, header, offset).await?;
        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    debug!(count = ifds.len(), "Read IFD chain");
    Ok(ifds)
}

// =============================================================================
// Tests
// =============================================================================

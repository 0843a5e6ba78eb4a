//! Decoder for the CLX "lite variant" binary metadata encoding.
//!
//! Every item is laid out as:
//!
//! ```text
//! type u8 | name_len u8 (UTF-16 units, including NUL) | name UTF-16LE | value
//! ```
//!
//! A LEVEL value is `item_count u32 | length u64` followed by its child items
//! and an `item_count * 8` byte offset table. `length` is measured from the
//! start of the LEVEL item to the end of its children.

use crate::error::Nd2Error;
use crate::io::{read_u16_le, read_u32_le, read_u64_le};

const TYPE_BOOL: u8 = 1;
const TYPE_I32: u8 = 2;
const TYPE_U32: u8 = 3;
const TYPE_I64: u8 = 4;
const TYPE_U64: u8 = 5;
const TYPE_F64: u8 = 6;
const TYPE_POINTER: u8 = 7;
const TYPE_STRING: u8 = 8;
const TYPE_BYTES: u8 = 9;
const TYPE_LEVEL: u8 = 11;
const TYPE_COMPRESSED: u8 = 76;

/// A decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum ClxValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Pointer(u64),
    String(String),
    Bytes(Vec<u8>),
    Level(ClxLevel),
}

impl ClxValue {
    /// Integer view of any integral value.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            ClxValue::Bool(b) => Some(b as u64),
            ClxValue::I32(v) => u64::try_from(v).ok(),
            ClxValue::U32(v) => Some(v as u64),
            ClxValue::I64(v) => u64::try_from(v).ok(),
            ClxValue::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Floating-point view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ClxValue::F64(v) => Some(v),
            ClxValue::I32(v) => Some(v as f64),
            ClxValue::U32(v) => Some(v as f64),
            ClxValue::I64(v) => Some(v as f64),
            ClxValue::U64(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ClxValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<&ClxLevel> {
        match self {
            ClxValue::Level(level) => Some(level),
            _ => None,
        }
    }
}

/// An ordered list of named items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClxLevel {
    items: Vec<(String, ClxValue)>,
}

impl ClxLevel {
    /// Decode the content of chunk `chunk`.
    pub fn decode(chunk: &str, data: &[u8]) -> Result<Self, Nd2Error> {
        let mut decoder = Decoder { chunk, data, pos: 0 };
        decoder.items(None)
    }

    /// First item named `name`.
    pub fn get(&self, name: &str) -> Option<&ClxValue> {
        self.items
            .iter()
            .find(|(item, _)| item == name)
            .map(|(_, value)| value)
    }

    /// Follow a dotted path of nested levels, e.g. `uLoopPars.uiCount`.
    pub fn path(&self, path: &str) -> Option<&ClxValue> {
        let mut parts = path.split('.');
        let mut value = self.get(parts.next()?)?;
        for part in parts {
            value = value.as_level()?.get(part)?;
        }
        Some(value)
    }

    pub fn level(&self, name: &str) -> Option<&ClxLevel> {
        self.get(name)?.as_level()
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.get(name)?.as_u64()
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClxValue)> {
        self.items.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Decoder
// =============================================================================

struct Decoder<'a> {
    chunk: &'a str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn malformed(&self, message: impl Into<String>) -> Nd2Error {
        Nd2Error::MalformedMetadata {
            chunk: self.chunk.to_string(),
            message: message.into(),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Nd2Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                self.malformed(format!("need {} bytes at offset {}", len, self.pos))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Decode items until `count` are read or the data ends.
    fn items(&mut self, count: Option<usize>) -> Result<ClxLevel, Nd2Error> {
        let mut level = ClxLevel::default();

        while self.pos < self.data.len() && count.map_or(true, |c| level.items.len() < c) {
            let (name, value) = self.item()?;
            level.items.push((name, value));
        }

        Ok(level)
    }

    fn item(&mut self) -> Result<(String, ClxValue), Nd2Error> {
        let start = self.pos;
        let header = self.take(2)?;
        let (kind, name_units) = (header[0], header[1] as usize);
        let name = self.name(name_units)?;

        let value = match kind {
            TYPE_BOOL => ClxValue::Bool(self.take(1)?[0] != 0),
            TYPE_I32 => ClxValue::I32(read_u32_le(self.take(4)?) as i32),
            TYPE_U32 => ClxValue::U32(read_u32_le(self.take(4)?)),
            TYPE_I64 => ClxValue::I64(read_u64_le(self.take(8)?) as i64),
            TYPE_U64 => ClxValue::U64(read_u64_le(self.take(8)?)),
            TYPE_F64 => ClxValue::F64(f64::from_bits(read_u64_le(self.take(8)?))),
            TYPE_POINTER => ClxValue::Pointer(read_u64_le(self.take(8)?)),
            TYPE_STRING => ClxValue::String(self.string()?),
            TYPE_BYTES => {
                let len = read_u64_le(self.take(8)?) as usize;
                ClxValue::Bytes(self.take(len)?.to_vec())
            }
            TYPE_LEVEL => ClxValue::Level(self.level(start)?),
            TYPE_COMPRESSED => {
                return Err(Nd2Error::Unsupported(format!(
                    "compressed metadata in {}",
                    self.chunk
                )))
            }
            other => {
                return Err(self.malformed(format!("unknown item type {} for {:?}", other, name)))
            }
        };

        Ok((name, value))
    }

    fn level(&mut self, start: usize) -> Result<ClxLevel, Nd2Error> {
        let count = read_u32_le(self.take(4)?) as usize;
        let length = read_u64_le(self.take(8)?) as usize;

        let end = start
            .checked_add(length)
            .filter(|&end| end >= self.pos && end <= self.data.len())
            .ok_or_else(|| self.malformed(format!("level length {} out of range", length)))?;

        let mut nested = Decoder {
            chunk: self.chunk,
            data: &self.data[self.pos..end],
            pos: 0,
        };
        let level = nested.items(Some(count))?;

        // Skip the child offset table
        self.pos = end.saturating_add(count * 8).min(self.data.len());
        Ok(level)
    }

    fn name(&mut self, units: usize) -> Result<String, Nd2Error> {
        let bytes = self.take(units * 2)?;
        let utf16: Vec<u16> = bytes
            .chunks_exact(2)
            .map(read_u16_le)
            .take_while(|&u| u != 0)
            .collect();
        Ok(String::from_utf16_lossy(&utf16))
    }

    fn string(&mut self) -> Result<String, Nd2Error> {
        let mut utf16 = Vec::new();
        loop {
            let unit = read_u16_le(self.take(2)?);
            if unit == 0 {
                break;
            }
            utf16.push(unit);
        }
        Ok(String::from_utf16_lossy(&utf16))
    }
}

//! ND2 chunk container.
//!
//! # Layout
//!
//! ```text
//! Chunk:      magic u32 (0x0ABECEDA) | name_len u32 | data_len u64 | name | data
//! File start: "ND2 FILE SIGNATURE CHUNK NAME01!" chunk, data "Ver3.0"
//! File end:   "ND2 CHUNK MAP SIGNATURE 0000001!" | chunk map offset u64
//! Chunk map:  chunk named "ND2 FILEMAP SIGNATURE NAME 0001!" whose data is a
//!             run of  name ending in '!' | offset u64 | size u64
//!             terminated by the chunk map signature entry
//! ```
//!
//! All integers are little-endian. Map offsets point at chunk headers.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;

use crate::error::Nd2Error;
use crate::io::{read_u32_le, read_u64_le, RangeReader};

/// Magic number opening every chunk header.
pub const ND2_CHUNK_MAGIC: u32 = 0x0ABE_CEDA;

/// Size of a chunk header (magic, name length, data length).
pub const CHUNK_HEADER_SIZE: usize = 16;

/// Name of the first chunk of every ND2 file.
pub const FILE_SIGNATURE: &str = "ND2 FILE SIGNATURE CHUNK NAME01!";

/// Signature at the end of the file, and terminator of the chunk map.
pub const CHUNK_MAP_SIGNATURE: &str = "ND2 CHUNK MAP SIGNATURE 0000001!";

/// Name of the chunk holding the chunk map.
pub const CHUNK_MAP_NAME: &str = "ND2 FILEMAP SIGNATURE NAME 0001!";

/// Size of the trailer: signature plus chunk map offset.
pub const TRAILER_SIZE: usize = CHUNK_MAP_SIGNATURE.len() + 8;

/// Name of the chunk holding frame `sequence`.
pub fn frame_chunk_name(sequence: usize) -> String {
    format!("ImageDataSeq|{}!", sequence)
}

// =============================================================================
// Chunk Header
// =============================================================================

/// A parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Length of the name field in bytes
    pub name_len: u32,

    /// Length of the data field in bytes
    pub data_len: u64,
}

impl ChunkHeader {
    /// Parse the 16-byte header of the chunk at `offset`.
    pub fn parse(bytes: &[u8], offset: u64) -> Result<Self, Nd2Error> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(Nd2Error::MalformedMetadata {
                chunk: format!("chunk at {}", offset),
                message: format!("header has {} bytes", bytes.len()),
            });
        }

        let magic = read_u32_le(&bytes[0..4]);
        if magic != ND2_CHUNK_MAGIC {
            return Err(Nd2Error::InvalidChunkMagic { offset, magic });
        }

        Ok(Self {
            name_len: read_u32_le(&bytes[4..8]),
            data_len: read_u64_le(&bytes[8..16]),
        })
    }

    /// Read and parse the header of the chunk at `offset`.
    pub async fn read<R: RangeReader>(reader: &R, offset: u64) -> Result<Self, Nd2Error> {
        let bytes = reader.read_exact_at(offset, CHUNK_HEADER_SIZE).await?;
        Self::parse(&bytes, offset)
    }

    /// File offset of the data of the chunk at `offset`.
    #[inline]
    pub fn data_offset(&self, offset: u64) -> u64 {
        offset + CHUNK_HEADER_SIZE as u64 + self.name_len as u64
    }
}

/// Read the whole data field of the chunk at `offset`.
pub async fn read_chunk_data<R: RangeReader>(reader: &R, offset: u64) -> Result<Bytes, Nd2Error> {
    let header = ChunkHeader::read(reader, offset).await?;
    let data = reader
        .read_exact_at(header.data_offset(offset), header.data_len as usize)
        .await?;
    Ok(data)
}

/// Check the file signature chunk and return the version string (e.g. `Ver3.0`).
pub async fn read_signature<R: RangeReader>(reader: &R) -> Result<String, Nd2Error> {
    let header = ChunkHeader::read(reader, 0)
        .await
        .map_err(|_| Nd2Error::MissingSignature)?;

    let name = reader
        .read_exact_at(CHUNK_HEADER_SIZE as u64, header.name_len as usize)
        .await?;
    if !name.starts_with(FILE_SIGNATURE.as_bytes()) {
        return Err(Nd2Error::MissingSignature);
    }

    let data = reader
        .read_exact_at(header.data_offset(0), (header.data_len as usize).min(64))
        .await?;
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    Ok(String::from_utf8_lossy(&data[..end]).into_owned())
}

// =============================================================================
// Chunk Map
// =============================================================================

/// Location of a chunk as recorded in the chunk map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Offset of the chunk header
    pub offset: u64,

    /// Size recorded in the map
    pub size: u64,
}

/// Name -> location index of every chunk in the file.
#[derive(Debug, Clone, Default)]
pub struct ChunkMap {
    entries: HashMap<String, ChunkLocation>,
}

impl ChunkMap {
    /// Locate and parse the chunk map via the file trailer.
    pub async fn read<R: RangeReader>(reader: &R) -> Result<Self, Nd2Error> {
        let size = reader.size();
        if size < TRAILER_SIZE as u64 {
            return Err(Nd2Error::MissingChunkMap);
        }

        let trailer = reader
            .read_exact_at(size - TRAILER_SIZE as u64, TRAILER_SIZE)
            .await?;
        if !trailer.starts_with(CHUNK_MAP_SIGNATURE.as_bytes()) {
            return Err(Nd2Error::MissingChunkMap);
        }

        let map_offset = read_u64_le(&trailer[CHUNK_MAP_SIGNATURE.len()..]);
        if map_offset >= size {
            return Err(Nd2Error::MissingChunkMap);
        }

        let header = ChunkHeader::read(reader, map_offset).await?;
        let name = reader
            .read_exact_at(map_offset + CHUNK_HEADER_SIZE as u64, header.name_len as usize)
            .await?;
        if !name.starts_with(CHUNK_MAP_NAME.as_bytes()) {
            return Err(Nd2Error::MissingChunkMap);
        }

        let data = reader
            .read_exact_at(header.data_offset(map_offset), header.data_len as usize)
            .await?;
        let map = Self::parse(&data)?;

        debug!(chunks = map.len(), offset = map_offset, "Read ND2 chunk map");
        Ok(map)
    }

    /// Parse chunk map data.
    pub fn parse(data: &[u8]) -> Result<Self, Nd2Error> {
        let malformed = |message: String| Nd2Error::MalformedMetadata {
            chunk: CHUNK_MAP_NAME.to_string(),
            message,
        };

        let mut entries = HashMap::new();
        let mut pos = 0;

        while pos < data.len() {
            let name_end = data[pos..]
                .iter()
                .position(|&b| b == b'!')
                .map(|i| pos + i + 1)
                .ok_or_else(|| malformed(format!("unterminated entry name at {}", pos)))?;
            let name = String::from_utf8_lossy(&data[pos..name_end]).into_owned();

            if name == CHUNK_MAP_SIGNATURE {
                return Ok(Self { entries });
            }

            if name_end + 16 > data.len() {
                return Err(malformed(format!("truncated entry for {}", name)));
            }
            let offset = read_u64_le(&data[name_end..]);
            let size = read_u64_le(&data[name_end + 8..]);
            entries.insert(name, ChunkLocation { offset, size });
            pos = name_end + 16;
        }

        Err(malformed("missing terminator".to_string()))
    }

    /// Location of a chunk by name.
    pub fn get(&self, name: &str) -> Option<ChunkLocation> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of chunks in the map.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of consecutive frame chunks starting at sequence 0.
    pub fn frame_count(&self) -> usize {
        (0..)
            .take_while(|&n| self.contains(&frame_chunk_name(n)))
            .count()
    }
}

//! Byte-range I/O.
//!
//! Everything above this layer reads files through the [`RangeReader`]
//! trait: [`FileRangeReader`] for local files, wrapped in a [`BlockCache`]
//! while container metadata is parsed.

mod block_cache;
mod file_reader;
mod range_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY};
pub use file_reader::FileRangeReader;
pub use range_reader::{
    read_f64_le, read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    RangeReader,
};

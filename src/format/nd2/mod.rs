//! Nikon ND2 container support.
//!
//! - [`chunk`]: chunk headers, file signature and the trailing chunk map
//! - [`clx`]: the CLX lite-variant metadata encoding
//! - [`metadata`]: image attributes, acquisition loops, channels
//! - [`reader`]: [`Nd2Reader`], the lazy per-plane [`SourceReader`](crate::source::SourceReader)
//!
//! Only version 3 chunked files with uncompressed frames are supported.

pub mod chunk;
pub mod clx;
pub mod metadata;
mod reader;

pub use chunk::{frame_chunk_name, ChunkMap, ND2_CHUNK_MAGIC};
pub use clx::{ClxLevel, ClxValue};
pub use metadata::{ExperimentLoop, FrameLayout, ImageAttributes, LoopKind, PictureMetadata};
pub use reader::Nd2Reader;

//! TIFF / BigTIFF support for the OME-TIFF container.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. Files written here are always little-endian BigTIFF; the reader accepts
//!   either byte order and either TIFF flavor.
//!
//! - **IFD (Image File Directory)**: One per exported plane. The first IFD also carries the
//!   OME-XML document in its `ImageDescription` tag.
//!
//! - **Inline vs offset values**: Small values are stored inline in the IFD entry,
//!   larger values are stored at an offset pointed to by the entry.

mod ome;
mod parser;
mod reader;
mod tags;
mod values;
mod writer;

pub use ome::{
    OmeDocument, OmeImage, OmePlane, DESCRIPTION_PREFIX, OME_NAMESPACE, SOURCE_INDICES_NAMESPACE,
};
pub use parser::{
    read_ifd_chain, ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use reader::OmeTiffReader;
pub use tags::{Compression, FieldType, TiffTag};
pub use values::ValueReader;
pub use writer::{align8, bigtiff_header, IfdBuilder};

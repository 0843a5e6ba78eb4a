//! TIFF vocabulary for uncompressed, strip-organized OME-TIFF planes.
//!
//! Tags outside [`TiffTag`] are skipped by the reader; field types outside
//! [`FieldType`] are rejected.

// =============================================================================
// Field Types
// =============================================================================

/// Encoding of the values of an IFD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Undefined = 7,
    /// BigTIFF only
    Long8 = 16,
}

impl FieldType {
    const ALL: [FieldType; 6] = [
        FieldType::Byte,
        FieldType::Ascii,
        FieldType::Short,
        FieldType::Long,
        FieldType::Undefined,
        FieldType::Long8,
    ];

    /// Bytes per value.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Long8 => 8,
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u16 == value)
    }

    /// Whether `count` values fit in the entry itself (4 bytes in classic
    /// TIFF, 8 in BigTIFF) instead of behind an offset.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let field = if is_bigtiff { 8 } else { 4 };
        self.size_in_bytes() as u64 * count <= field
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tags written for every exported plane and read back by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// OME-XML in the first IFD
    ImageDescription = 270,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    PlanarConfiguration = 284,
    Software = 305,
    /// 1 = unsigned integer, 3 = IEEE float
    SampleFormat = 339,
}

/// Every known tag with its name, in ascending ID order.
const TAGS: [(TiffTag, &str); 14] = [
    (TiffTag::NewSubfileType, "NewSubfileType"),
    (TiffTag::ImageWidth, "ImageWidth"),
    (TiffTag::ImageLength, "ImageLength"),
    (TiffTag::BitsPerSample, "BitsPerSample"),
    (TiffTag::Compression, "Compression"),
    (TiffTag::PhotometricInterpretation, "PhotometricInterpretation"),
    (TiffTag::ImageDescription, "ImageDescription"),
    (TiffTag::StripOffsets, "StripOffsets"),
    (TiffTag::SamplesPerPixel, "SamplesPerPixel"),
    (TiffTag::RowsPerStrip, "RowsPerStrip"),
    (TiffTag::StripByteCounts, "StripByteCounts"),
    (TiffTag::PlanarConfiguration, "PlanarConfiguration"),
    (TiffTag::Software, "Software"),
    (TiffTag::SampleFormat, "SampleFormat"),
];

impl TiffTag {
    pub fn from_u16(value: u16) -> Option<Self> {
        TAGS.iter()
            .find(|(tag, _)| tag.as_u16() == value)
            .map(|(tag, _)| *tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Tag name for error messages.
    pub fn name(self) -> &'static str {
        TAGS.iter()
            .find(|(tag, _)| *tag == self)
            .map_or("Unknown", |(_, name)| *name)
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Compression schemes, named so rejected files get a readable error.
/// Only [`Compression::None`] is ever written or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    Jpeg = 7,
    Deflate = 8,
    PackBits = 32773,
    AdobeDeflate = 32946,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        [
            Compression::None,
            Compression::Lzw,
            Compression::Jpeg,
            Compression::Deflate,
            Compression::PackBits,
            Compression::AdobeDeflate,
        ]
        .into_iter()
        .find(|c| *c as u16 == value)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::Jpeg => "JPEG",
            Compression::Deflate => "Deflate",
            Compression::PackBits => "PackBits",
            Compression::AdobeDeflate => "Adobe Deflate",
        }
    }
}

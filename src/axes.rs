//! Axis metadata model.
//!
//! Describes the discovered axes of a source acquisition (which of
//! Position / Scene / Time / Channel / Z exist and their extents), the plane
//! geometry, spatial and temporal calibration, and per-channel descriptors.
//!
//! # Canonical Axis Order
//!
//! Axes are always kept in acquisition order, outer to inner:
//!
//! ```text
//! Position -> Scene -> Time -> Channel -> Z
//! ```
//!
//! This is the order of index tuples, of iteration plans, and of planes in
//! the exported container.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ExportError, SelectionParseError};

// =============================================================================
// AxisKind
// =============================================================================

/// A named dimension along which a multidimensional acquisition varies.
///
/// The derived ordering is the canonical axis order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AxisKind {
    /// Stage position (XY multipoint)
    Position,
    /// Scene (sub-region of a position)
    Scene,
    /// Time point
    Time,
    /// Channel (optical configuration)
    Channel,
    /// Focal plane
    Z,
}

impl AxisKind {
    /// All axis kinds in canonical order.
    pub const ALL: [AxisKind; 5] = [
        AxisKind::Position,
        AxisKind::Scene,
        AxisKind::Time,
        AxisKind::Channel,
        AxisKind::Z,
    ];

    /// Human-readable axis name.
    pub const fn name(self) -> &'static str {
        match self {
            AxisKind::Position => "Position",
            AxisKind::Scene => "Scene",
            AxisKind::Time => "Time",
            AxisKind::Channel => "Channel",
            AxisKind::Z => "Z",
        }
    }

    /// Single-letter code (P, S, T, C, Z).
    pub const fn code(self) -> char {
        match self {
            AxisKind::Position => 'P',
            AxisKind::Scene => 'S',
            AxisKind::Time => 'T',
            AxisKind::Channel => 'C',
            AxisKind::Z => 'Z',
        }
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AxisKind {
    type Err = SelectionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p" | "pos" | "position" => Ok(AxisKind::Position),
            "s" | "scene" => Ok(AxisKind::Scene),
            "t" | "time" => Ok(AxisKind::Time),
            "c" | "chan" | "channel" => Ok(AxisKind::Channel),
            "z" => Ok(AxisKind::Z),
            _ => Err(SelectionParseError::UnknownAxisName(s.to_string())),
        }
    }
}

/// A present axis and its extent (always >= 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Axis {
    pub kind: AxisKind,
    pub extent: usize,
}

// =============================================================================
// Pixel Type
// =============================================================================

/// Sample type of a pixel plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PixelType {
    U8,
    U16,
    F32,
}

impl PixelType {
    /// Size of one sample in bytes.
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
            PixelType::F32 => 4,
        }
    }

    /// Bits per sample, as written to TIFF BitsPerSample.
    #[inline]
    pub const fn bits(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }

    /// TIFF SampleFormat value (1 = unsigned integer, 3 = IEEE float).
    #[inline]
    pub const fn sample_format(self) -> u16 {
        match self {
            PixelType::U8 | PixelType::U16 => 1,
            PixelType::F32 => 3,
        }
    }

    /// OME `Pixels/@Type` name.
    pub const fn ome_name(self) -> &'static str {
        match self {
            PixelType::U8 => "uint8",
            PixelType::U16 => "uint16",
            PixelType::F32 => "float",
        }
    }

    /// Parse an OME `Pixels/@Type` name.
    pub fn from_ome_name(name: &str) -> Option<Self> {
        match name {
            "uint8" => Some(PixelType::U8),
            "uint16" => Some(PixelType::U16),
            "float" => Some(PixelType::F32),
            _ => None,
        }
    }

    /// Map TIFF BitsPerSample / SampleFormat to a pixel type.
    pub fn from_tiff(bits: u16, sample_format: u16) -> Option<Self> {
        match (bits, sample_format) {
            (8, 1) => Some(PixelType::U8),
            (16, 1) => Some(PixelType::U16),
            (32, 3) => Some(PixelType::F32),
            _ => None,
        }
    }
}

// =============================================================================
// Calibration and Channels
// =============================================================================

/// Physical calibration of an acquisition.
///
/// Spatial sizes are in micrometers per pixel (or per plane for Z); the
/// time increment is in seconds. Absent values are unknown, not zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Calibration {
    pub physical_size_x: Option<f64>,
    pub physical_size_y: Option<f64>,
    pub physical_size_z: Option<f64>,
    pub time_increment: Option<f64>,
}

/// Descriptor of one acquisition channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    /// Channel name (e.g. "DAPI")
    pub name: String,

    /// Emission wavelength in nanometers
    pub emission_wavelength: Option<f64>,

    /// Display color as packed 0xRRGGBB
    pub color: Option<u32>,
}

impl ChannelInfo {
    /// Create a channel descriptor with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            emission_wavelength: None,
            color: None,
        }
    }

    /// Placeholder names used when the source carries none.
    pub fn placeholder(index: usize) -> Self {
        Self::named(format!("Channel {}", index))
    }
}

// =============================================================================
// IndexTuple
// =============================================================================

/// One index per present axis, in canonical axis order.
///
/// An index tuple fully specifies one exportable unit (one 2-D plane).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct IndexTuple(Vec<(AxisKind, usize)>);

impl IndexTuple {
    /// Build a tuple from (axis, index) pairs; pairs are sorted into
    /// canonical order and later duplicates replace earlier ones.
    pub fn new(entries: impl IntoIterator<Item = (AxisKind, usize)>) -> Self {
        let mut tuple: Vec<(AxisKind, usize)> = Vec::new();
        for (kind, index) in entries {
            match tuple.iter_mut().find(|(k, _)| *k == kind) {
                Some(slot) => slot.1 = index,
                None => tuple.push((kind, index)),
            }
        }
        tuple.sort_by_key(|(kind, _)| *kind);
        Self(tuple)
    }

    /// Index along `kind`, if the tuple has that axis.
    #[inline]
    pub fn get(&self, kind: AxisKind) -> Option<usize> {
        self.0.iter().find(|(k, _)| *k == kind).map(|(_, i)| *i)
    }

    /// Index along `kind`, or 0 when the axis is absent.
    #[inline]
    pub fn index_or_zero(&self, kind: AxisKind) -> usize {
        self.get(kind).unwrap_or(0)
    }

    /// Iterate over (axis, index) pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (AxisKind, usize)> + '_ {
        self.0.iter().copied()
    }

    /// Number of axes in the tuple.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the tuple has no axes (single-plane source).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IndexTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (kind, index)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", kind, index)?;
        }
        f.write_str(")")
    }
}

// =============================================================================
// AxisMetadata
// =============================================================================

/// Axis, geometry and calibration metadata of a source acquisition.
///
/// Built once when a source is opened and read-only afterwards. An axis with
/// extent 0 is never recorded, so every axis returned by [`axes`] can be
/// offered for selection.
///
/// [`axes`]: AxisMetadata::axes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisMetadata {
    axes: Vec<Axis>,

    /// Plane width in pixels
    pub width: u32,

    /// Plane height in pixels
    pub height: u32,

    /// Sample type of every plane
    pub pixel_type: PixelType,

    /// Physical calibration
    pub calibration: Calibration,

    /// Channel descriptors, one per Channel index
    pub channels: Vec<ChannelInfo>,

    /// File name of the source (used in the exported description)
    pub source_name: String,
}

impl AxisMetadata {
    /// Create metadata for planes of the given geometry with no axes.
    pub fn new(width: u32, height: u32, pixel_type: PixelType) -> Self {
        Self {
            axes: Vec::new(),
            width,
            height,
            pixel_type,
            calibration: Calibration::default(),
            channels: Vec::new(),
            source_name: String::new(),
        }
    }

    /// Add (or replace) an axis. An extent of 0 removes the axis.
    pub fn with_axis(mut self, kind: AxisKind, extent: usize) -> Self {
        self.axes.retain(|axis| axis.kind != kind);
        if extent > 0 {
            self.axes.push(Axis { kind, extent });
            self.axes.sort_by_key(|axis| axis.kind);
        }
        self
    }

    /// Set calibration.
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Set channel descriptors.
    pub fn with_channels(mut self, channels: Vec<ChannelInfo>) -> Self {
        self.channels = channels;
        self
    }

    /// Set the source file name.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Present axes in canonical order.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Whether the source has this axis.
    pub fn has_axis(&self, kind: AxisKind) -> bool {
        self.axes.iter().any(|axis| axis.kind == kind)
    }

    /// Extent of an axis, or `None` if absent.
    pub fn extent(&self, kind: AxisKind) -> Option<usize> {
        self.axes
            .iter()
            .find(|axis| axis.kind == kind)
            .map(|axis| axis.extent)
    }

    /// Total number of planes in the source. Saturates at `usize::MAX`;
    /// readers reject sources whose planes cannot be counted.
    pub fn plane_count(&self) -> usize {
        self.axes
            .iter()
            .fold(1usize, |acc, axis| acc.saturating_mul(axis.extent))
    }

    /// Size of one plane in bytes. Saturates like [`plane_count`](Self::plane_count).
    pub fn plane_bytes(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.pixel_type.bytes_per_sample())
    }

    /// Channel descriptor for a channel index, if known.
    pub fn channel(&self, index: usize) -> Option<&ChannelInfo> {
        self.channels.get(index)
    }

    /// Check that an index tuple addresses exactly this source's axes and
    /// that every component lies inside its extent.
    pub fn check_index(&self, index: &IndexTuple) -> Result<(), ExportError> {
        if index.len() != self.axes.len() {
            return Err(ExportError::IndexOutOfRange {
                index: index.clone(),
                detail: format!(
                    "expected {} axes, got {}",
                    self.axes.len(),
                    index.len()
                ),
            });
        }

        for (axis, (kind, value)) in self.axes.iter().zip(index.iter()) {
            if axis.kind != kind {
                return Err(ExportError::IndexOutOfRange {
                    index: index.clone(),
                    detail: format!("source has no {} axis", kind),
                });
            }
            if value >= axis.extent {
                return Err(ExportError::IndexOutOfRange {
                    index: index.clone(),
                    detail: format!(
                        "{} index {} exceeds extent {}",
                        kind, value, axis.extent
                    ),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Interpretation of ND2 metadata chunks.
//!
//! - `ImageAttributesLV!` -> [`ImageAttributes`] (frame geometry)
//! - `ImageMetadataLV!` -> [`ExperimentLoop`]s (acquisition loops)
//! - `ImageMetadataSeqLV|0!` -> [`PictureMetadata`] (calibration, channels)

use tracing::debug;

use crate::axes::{AxisKind, ChannelInfo, IndexTuple, PixelType};
use crate::error::Nd2Error;

use super::clx::{ClxLevel, ClxValue};

pub const ATTRIBUTES_CHUNK: &str = "ImageAttributesLV!";
pub const EXPERIMENT_CHUNK: &str = "ImageMetadataLV!";
pub const PICTURE_METADATA_CHUNK: &str = "ImageMetadataSeqLV|0!";

/// `eCompression` value of uncompressed frames.
const COMPRESSION_NONE: u64 = 2;

/// Bytes of the `f64` timestamp in front of every frame's pixels.
pub const FRAME_TIMESTAMP_SIZE: usize = 8;

// =============================================================================
// Image Attributes
// =============================================================================

/// Geometry of every frame in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttributes {
    pub width: u32,
    pub height: u32,

    /// Bytes per row, including padding
    pub row_stride: usize,

    /// Channels interleaved per pixel
    pub components: usize,

    pub pixel_type: PixelType,

    /// Number of frames recorded
    pub sequence_count: usize,
}

impl ImageAttributes {
    /// Interpret the decoded `ImageAttributesLV!` chunk.
    pub fn from_root(root: &ClxLevel) -> Result<Self, Nd2Error> {
        let attrs = root
            .level("SLxImageAttributes")
            .ok_or(Nd2Error::MissingAttribute("SLxImageAttributes"))?;

        let required = |name: &'static str| attrs.u64(name).ok_or(Nd2Error::MissingAttribute(name));

        let width = required("uiWidth")?;
        let height = required("uiHeight")?;
        let components = required("uiComp")?.max(1) as usize;
        let bits = required("uiBpcInMemory")?;
        let sequence_count = attrs.u64("uiSequenceCount").unwrap_or(1) as usize;

        if width == 0 || height == 0 || width > u32::MAX as u64 || height > u32::MAX as u64 {
            return Err(Nd2Error::MalformedMetadata {
                chunk: ATTRIBUTES_CHUNK.to_string(),
                message: format!("invalid frame size {}x{}", width, height),
            });
        }

        let pixel_type = match bits {
            8 => PixelType::U8,
            16 => PixelType::U16,
            32 => PixelType::F32,
            other => {
                return Err(Nd2Error::Unsupported(format!(
                    "{} bits per component in memory",
                    other
                )))
            }
        };

        if let Some(compression) = attrs.u64("eCompression") {
            if compression != COMPRESSION_NONE {
                return Err(Nd2Error::Unsupported(format!(
                    "compressed image data (eCompression={})",
                    compression
                )));
            }
        }

        let packed_row = (width as usize)
            .checked_mul(components)
            .and_then(|n| n.checked_mul(pixel_type.bytes_per_sample()))
            .ok_or_else(|| Nd2Error::MalformedMetadata {
                chunk: ATTRIBUTES_CHUNK.to_string(),
                message: format!("{} components of width {} overflow a row", components, width),
            })?;
        let row_stride = attrs
            .u64("uiWidthBytes")
            .map(|v| v as usize)
            .filter(|&v| v > 0)
            .unwrap_or(packed_row);
        if row_stride < packed_row {
            return Err(Nd2Error::MalformedMetadata {
                chunk: ATTRIBUTES_CHUNK.to_string(),
                message: format!("row stride {} below packed row size {}", row_stride, packed_row),
            });
        }

        // frame_bytes() and the frame read size rely on this product fitting
        if row_stride
            .checked_mul(height as usize)
            .and_then(|n| n.checked_add(FRAME_TIMESTAMP_SIZE))
            .is_none()
        {
            return Err(Nd2Error::MalformedMetadata {
                chunk: ATTRIBUTES_CHUNK.to_string(),
                message: format!("frame of {} rows of {} bytes is too large", height, row_stride),
            });
        }

        Ok(Self {
            width: width as u32,
            height: height as u32,
            row_stride,
            components,
            pixel_type,
            sequence_count,
        })
    }

    /// Size of a frame's pixel payload (without the timestamp).
    pub fn frame_bytes(&self) -> usize {
        self.row_stride * self.height as usize
    }
}

// =============================================================================
// Experiment Loops
// =============================================================================

/// Kind of acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Time,
    Position,
    ZStack,
}

impl LoopKind {
    fn from_type(value: u64) -> Option<Self> {
        match value {
            1 | 8 => Some(LoopKind::Time),
            2 => Some(LoopKind::Position),
            4 => Some(LoopKind::ZStack),
            _ => None,
        }
    }

    /// Axis this loop contributes.
    pub fn axis(self) -> AxisKind {
        match self {
            LoopKind::Time => AxisKind::Time,
            LoopKind::Position => AxisKind::Position,
            LoopKind::ZStack => AxisKind::Z,
        }
    }
}

/// One level of the acquisition loop nest.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentLoop {
    pub kind: LoopKind,
    pub count: usize,

    /// Time loop period in milliseconds
    pub period_ms: Option<f64>,

    /// Z step in micrometers
    pub z_step_um: Option<f64>,
}

/// Interpret the decoded `ImageMetadataLV!` chunk, outermost loop first.
pub fn parse_experiment(root: &ClxLevel) -> Vec<ExperimentLoop> {
    let mut loops = Vec::new();
    let mut level = root.level("SLxExperiment");

    while let Some(exp) = level {
        let Some(kind) = exp.u64("eType").and_then(LoopKind::from_type) else {
            debug!(etype = ?exp.u64("eType"), "Skipping unknown ND2 loop type");
            level = next_level(exp);
            continue;
        };

        let pars = exp.level("uLoopPars");
        let count = pars
            .and_then(|p| p.u64("uiCount"))
            .or_else(|| pars.map(period_count))
            .unwrap_or(0) as usize;

        if count > 0 {
            loops.push(ExperimentLoop {
                kind,
                count,
                period_ms: pars.and_then(|p| p.f64("dPeriod")).filter(|&v| v > 0.0),
                z_step_um: pars.and_then(|p| p.f64("dZStep")).map(f64::abs),
            });
        }

        level = next_level(exp);
    }

    loops
}

/// Next nested loop, stored as the first child of `ppNextLevelEx`.
fn next_level(exp: &ClxLevel) -> Option<&ClxLevel> {
    exp.level("ppNextLevelEx")?
        .iter()
        .find_map(|(_, value)| value.as_level())
}

/// Frame count of a loop described by a list of periods (`pPeriod`).
fn period_count(pars: &ClxLevel) -> u64 {
    pars.level("pPeriod")
        .map(|periods| {
            periods
                .iter()
                .filter_map(|(_, p)| p.as_level()?.u64("uiCount"))
                .sum()
        })
        .unwrap_or(0)
}

// =============================================================================
// Picture Metadata
// =============================================================================

/// Calibration and channel descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PictureMetadata {
    /// Micrometers per pixel
    pub calibration_um: Option<f64>,

    pub channels: Vec<ChannelInfo>,
}

impl PictureMetadata {
    /// Interpret the decoded `ImageMetadataSeqLV|0!` chunk.
    pub fn from_root(root: &ClxLevel) -> Self {
        let Some(picture) = root.level("SLxPictureMetadata") else {
            return Self::default();
        };

        let calibration_um = picture.f64("dCalibration").filter(|&v| v > 0.0);

        let mut channels = Vec::new();
        if let Some(planes) = picture
            .path("sPicturePlanes.sPlaneNew")
            .and_then(ClxValue::as_level)
        {
            while let Some(plane) = planes.level(&format!("a{}", channels.len())) {
                let mut channel = ChannelInfo::placeholder(channels.len());
                if let Some(name) = plane.str("sDescription").filter(|s| !s.is_empty()) {
                    channel.name = name.to_string();
                }
                channel.emission_wavelength = plane.f64("dEmissionWL").filter(|&v| v > 0.0);
                channel.color = plane.u64("uiColor").map(|c| bgr_to_rgb(c as u32));
                channels.push(channel);
            }
        }

        Self {
            calibration_um,
            channels,
        }
    }
}

/// ND2 stores colors as 0x00BBGGRR.
fn bgr_to_rgb(color: u32) -> u32 {
    let r = color & 0xFF;
    let g = (color >> 8) & 0xFF;
    let b = (color >> 16) & 0xFF;
    (r << 16) | (g << 8) | b
}

// =============================================================================
// Frame Layout
// =============================================================================

/// Maps loop indices to frame sequence numbers.
///
/// Loops are stored outermost first; the innermost loop varies fastest in
/// the frame sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    loops: Vec<(AxisKind, usize)>,
}

impl FrameLayout {
    /// Build the layout, rejecting two loops over the same axis.
    pub fn new(loops: &[ExperimentLoop]) -> Result<Self, Nd2Error> {
        let mut axes: Vec<(AxisKind, usize)> = Vec::with_capacity(loops.len());
        for exp in loops {
            let axis = exp.kind.axis();
            if axes.iter().any(|&(kind, _)| kind == axis) {
                return Err(Nd2Error::Unsupported(format!(
                    "more than one {} loop",
                    axis
                )));
            }
            axes.push((axis, exp.count));
        }

        // sequence_index() and frame_count() rely on this product fitting
        let frames = axes
            .iter()
            .try_fold(1usize, |acc, &(_, count)| acc.checked_mul(count));
        if frames.is_none() {
            return Err(Nd2Error::MalformedMetadata {
                chunk: EXPERIMENT_CHUNK.to_string(),
                message: "loop counts overflow the frame count".to_string(),
            });
        }

        Ok(Self { loops: axes })
    }

    /// Loop axes, outermost first.
    pub fn axes(&self) -> impl Iterator<Item = (AxisKind, usize)> + '_ {
        self.loops.iter().copied()
    }

    /// Number of frames the loops describe.
    pub fn frame_count(&self) -> usize {
        self.loops.iter().map(|&(_, count)| count).product()
    }

    /// Sequence number of the frame holding `index`. Axes not covered by a
    /// loop are ignored.
    pub fn sequence_index(&self, index: &IndexTuple) -> usize {
        self.loops.iter().fold(0, |seq, &(axis, count)| {
            seq * count + index.index_or_zero(axis)
        })
    }
}

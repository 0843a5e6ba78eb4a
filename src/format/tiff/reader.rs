//! OME-TIFF source reader.
//!
//! Reads back the containers written by [`OmeTiffSink`](crate::sink::OmeTiffSink)
//! and OME-TIFFs of the same shape: uncompressed single-sample planes in
//! strips, one IFD per plane, `XYZCT` order, OME-XML in the first IFD.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::axes::{AxisKind, AxisMetadata, IndexTuple, PixelType};
use crate::error::{ExportError, TiffError};
use crate::io::{BlockCache, FileRangeReader, RangeReader};
use crate::source::{PixelBuffer, SourceReader};

use super::ome::{OmeDocument, OmeImage, DESCRIPTION_PREFIX};
use super::parser::{read_ifd_chain, ByteOrder, Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

/// Strip layout of one plane.
#[derive(Debug, Clone)]
struct PlaneStrips {
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

/// Lazy reader over an OME-TIFF file.
pub struct OmeTiffReader<R: RangeReader + 'static> {
    reader: Arc<R>,
    byte_order: ByteOrder,
    document: OmeDocument,
    planes: Vec<PlaneStrips>,
    metadata: AxisMetadata,
    scene_extent: usize,
}

impl OmeTiffReader<FileRangeReader> {
    /// Open an OME-TIFF file by path.
    ///
    /// # Errors
    ///
    /// [`ExportError::SourceUnreadable`] if the file is missing, is not a
    /// TIFF, has not been finalized, or carries no usable OME-XML.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref();
        let file = FileRangeReader::open(path)
            .await
            .map_err(|e| ExportError::source_unreadable(path.display(), e))?;
        Self::from_reader(file)
            .await
            .map_err(|e| ExportError::source_unreadable(path.display(), e))
    }
}

impl<R: RangeReader + 'static> OmeTiffReader<R> {
    /// Parse header, IFD chain and OME-XML from any range reader.
    pub async fn from_reader(reader: R) -> Result<Self, TiffError> {
        let reader = Arc::new(reader);
        let cache = BlockCache::new(reader.clone());

        let header_len = (cache.size() as usize).min(BIGTIFF_HEADER_SIZE);
        let header_bytes = cache.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, cache.size())?;

        let ifds = read_ifd_chain(&cache, &header).await?;
        let values = ValueReader::new(&cache, &header);

        let first = ifds
            .first()
            .ok_or(TiffError::InvalidIfdOffset(header.first_ifd_offset))?;
        let description = first.require(TiffTag::ImageDescription)?;
        let xml = values
            .read_string(TiffTag::ImageDescription, description)
            .await?;
        let document = OmeDocument::parse(&xml)?;

        let mut planes = Vec::with_capacity(ifds.len());
        for ifd in &ifds {
            planes.push(read_plane_strips(&values, ifd).await?);
        }

        let (metadata, scene_extent) = build_metadata(&document, reader.identifier())?;

        let expected_ifds = document
            .images
            .iter()
            .map(|image| image.first_ifd + image.plane_count())
            .max()
            .unwrap_or(0);
        if expected_ifds > planes.len() {
            return Err(TiffError::UnsupportedLayout(format!(
                "OME-XML describes {} planes but the file has {} IFDs",
                expected_ifds,
                planes.len()
            )));
        }

        debug!(
            source = reader.identifier(),
            images = document.images.len(),
            ifds = planes.len(),
            "Opened OME-TIFF"
        );

        Ok(Self {
            reader,
            byte_order: header.byte_order,
            document,
            planes,
            metadata,
            scene_extent,
        })
    }

    /// Selected source indices recorded by the exporter, per axis.
    ///
    /// Lets a partial export be mapped back to the coordinates of the
    /// acquisition it came from. Empty for files without the annotation.
    pub fn source_indices(&self) -> &[(AxisKind, Vec<usize>)] {
        &self.document.source_indices
    }

    /// Parsed OME-XML document.
    pub fn document(&self) -> &OmeDocument {
        &self.document
    }

    fn image_for(&self, index: &IndexTuple) -> &OmeImage {
        let position = index.index_or_zero(AxisKind::Position);
        let scene = index.index_or_zero(AxisKind::Scene);
        &self.document.images[position * self.scene_extent + scene]
    }
}

async fn read_plane_strips<R: RangeReader>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
) -> Result<PlaneStrips, TiffError> {
    if let Some(entry) = ifd.get(TiffTag::Compression) {
        let raw = values.read_u64(TiffTag::Compression, entry).await? as u16;
        if raw != Compression::None as u16 {
            let name = Compression::from_u16(raw)
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| raw.to_string());
            return Err(TiffError::UnsupportedCompression(name));
        }
    }

    if let Some(entry) = ifd.get(TiffTag::SamplesPerPixel) {
        let samples = values.read_u64(TiffTag::SamplesPerPixel, entry).await?;
        if samples != 1 {
            return Err(TiffError::UnsupportedLayout(format!(
                "{} samples per pixel",
                samples
            )));
        }
    }

    let offsets = values
        .read_u64_array(
            TiffTag::StripOffsets,
            ifd.require(TiffTag::StripOffsets)?,
        )
        .await?;
    let byte_counts = values
        .read_u64_array(
            TiffTag::StripByteCounts,
            ifd.require(TiffTag::StripByteCounts)?,
        )
        .await?;

    if offsets.len() != byte_counts.len() {
        return Err(TiffError::InvalidTagValue {
            tag: TiffTag::StripByteCounts.name(),
            message: format!(
                "{} strip offsets but {} byte counts",
                offsets.len(),
                byte_counts.len()
            ),
        });
    }

    Ok(PlaneStrips {
        offsets,
        byte_counts,
    })
}

/// Derive axis metadata from the OME document.
///
/// With a source-indices annotation the axes are exactly those the exporter
/// recorded. Without one, Channel is always present and the other axes are
/// present only when their size exceeds 1. Returns the metadata and the
/// Scene extent used to map (Position, Scene) to an image.
fn build_metadata(
    document: &OmeDocument,
    identifier: &str,
) -> Result<(AxisMetadata, usize), TiffError> {
    let first = &document.images[0];
    for image in &document.images[1..] {
        if (image.size_x, image.size_y, image.pixel_type)
            != (first.size_x, first.size_y, first.pixel_type)
            || (image.size_z, image.size_c, image.size_t)
                != (first.size_z, first.size_c, first.size_t)
        {
            return Err(TiffError::UnsupportedLayout(
                "images with differing dimensions".to_string(),
            ));
        }
    }

    let image_count = document.images.len();
    let mut metadata = AxisMetadata::new(first.size_x, first.size_y, first.pixel_type);

    let scene_extent = if document.source_indices.is_empty() {
        metadata = metadata
            .with_axis(AxisKind::Position, if image_count > 1 { image_count } else { 0 })
            .with_axis(AxisKind::Time, if first.size_t > 1 { first.size_t } else { 0 })
            .with_axis(AxisKind::Channel, first.size_c)
            .with_axis(AxisKind::Z, if first.size_z > 1 { first.size_z } else { 0 });
        1
    } else {
        let count = |kind: AxisKind| {
            document
                .source_indices
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, indices)| indices.len())
        };

        let positions = count(AxisKind::Position);
        let scenes = count(AxisKind::Scene);
        if positions.unwrap_or(1) * scenes.unwrap_or(1) != image_count {
            return Err(TiffError::UnsupportedLayout(format!(
                "{} images do not match recorded positions and scenes",
                image_count
            )));
        }

        for (kind, size) in [
            (AxisKind::Time, first.size_t),
            (AxisKind::Channel, first.size_c),
            (AxisKind::Z, first.size_z),
        ] {
            if let Some(recorded) = count(kind) {
                if recorded != size {
                    warn!(axis = %kind, recorded, size, "Recorded source indices disagree with image size");
                }
            } else if size > 1 {
                return Err(TiffError::UnsupportedLayout(format!(
                    "{} has size {} but no recorded source indices",
                    kind, size
                )));
            }
        }

        for (kind, _) in &document.source_indices {
            let extent = match kind {
                AxisKind::Position => image_count / scenes.unwrap_or(1),
                AxisKind::Scene => scenes.unwrap_or(1),
                AxisKind::Time => first.size_t,
                AxisKind::Channel => first.size_c,
                AxisKind::Z => first.size_z,
            };
            metadata = metadata.with_axis(*kind, extent);
        }
        scenes.unwrap_or(1)
    };

    let source_name = document
        .description
        .as_deref()
        .and_then(|d| d.strip_prefix(DESCRIPTION_PREFIX))
        .map(str::to_string)
        .unwrap_or_else(|| file_name(identifier));

    let metadata = metadata
        .with_calibration(first.calibration)
        .with_channels(first.channels.clone())
        .with_source_name(source_name);

    Ok((metadata, scene_extent))
}

fn file_name(identifier: &str) -> String {
    Path::new(identifier)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| identifier.to_string())
}

/// Swap each sample of a big-endian plane to little-endian.
fn to_little_endian(data: Bytes, pixel_type: PixelType) -> Bytes {
    let width = pixel_type.bytes_per_sample();
    if width == 1 {
        return data;
    }
    let mut out = BytesMut::from(&data[..]);
    for sample in out.chunks_exact_mut(width) {
        sample.reverse();
    }
    out.freeze()
}

#[async_trait]
impl<R: RangeReader + 'static> SourceReader for OmeTiffReader<R> {
    fn metadata(&self) -> &AxisMetadata {
        &self.metadata
    }

    async fn read_slice(&self, index: &IndexTuple) -> Result<PixelBuffer, ExportError> {
        self.metadata.check_index(index)?;

        let image = self.image_for(index);
        let z = index.index_or_zero(AxisKind::Z);
        let c = index.index_or_zero(AxisKind::Channel);
        let t = index.index_or_zero(AxisKind::Time);
        let ifd = image.ifd_index(z, c, t);

        let strips = self.planes.get(ifd).ok_or_else(|| {
            ExportError::IoFailure(format!("{}: no IFD {} for {}", self.identifier(), ifd, index))
        })?;

        let expected = self.metadata.plane_bytes();
        let total: u64 = strips.byte_counts.iter().sum();
        if total as usize != expected {
            return Err(ExportError::IoFailure(format!(
                "{}: plane {} holds {} bytes, expected {}",
                self.identifier(),
                index,
                total,
                expected
            )));
        }

        let data = if strips.offsets.len() == 1 {
            self.reader.read_exact_at(strips.offsets[0], expected).await?
        } else {
            let mut buf = BytesMut::with_capacity(expected);
            for (&offset, &count) in strips.offsets.iter().zip(&strips.byte_counts) {
                buf.extend_from_slice(&self.reader.read_exact_at(offset, count as usize).await?);
            }
            buf.freeze()
        };

        let data = match self.byte_order {
            ByteOrder::LittleEndian => data,
            ByteOrder::BigEndian => to_little_endian(data, self.metadata.pixel_type),
        };

        let timestamp_ms = image
            .planes
            .iter()
            .find(|p| (p.the_z, p.the_c, p.the_t) == (z, c, t))
            .and_then(|p| p.delta_t_ms);

        debug!(index = %index, ifd, "Read OME-TIFF plane");

        Ok(PixelBuffer {
            width: self.metadata.width,
            height: self.metadata.height,
            pixel_type: self.metadata.pixel_type,
            data,
            timestamp_ms,
        })
    }

    async fn close(&self) {
        self.reader.close().await;
    }

    fn identifier(&self) -> &str {
        self.reader.identifier()
    }
}

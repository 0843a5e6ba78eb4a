//! ND2 source reader.
//!
//! Opening parses the signature, chunk map and the three metadata chunks
//! through a [`BlockCache`]. Frames are read on demand, one chunk per
//! `read_slice`, straight from the file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::axes::{AxisKind, AxisMetadata, Calibration, ChannelInfo, IndexTuple};
use crate::error::{ExportError, Nd2Error};
use crate::io::{read_f64_le, BlockCache, FileRangeReader, RangeReader};
use crate::source::{PixelBuffer, SourceReader};

use super::chunk::{frame_chunk_name, read_chunk_data, read_signature, ChunkHeader, ChunkMap};
use super::clx::ClxLevel;
use super::metadata::{
    parse_experiment, ExperimentLoop, FrameLayout, ImageAttributes, LoopKind, PictureMetadata,
    ATTRIBUTES_CHUNK, EXPERIMENT_CHUNK, FRAME_TIMESTAMP_SIZE as TIMESTAMP_SIZE,
    PICTURE_METADATA_CHUNK,
};

/// Lazy reader over an ND2 file.
pub struct Nd2Reader<R: RangeReader + 'static> {
    reader: Arc<R>,
    chunks: ChunkMap,
    attributes: ImageAttributes,
    layout: FrameLayout,
    metadata: AxisMetadata,
    version: String,
}

impl Nd2Reader<FileRangeReader> {
    /// Open an ND2 file by path.
    ///
    /// # Errors
    ///
    /// [`ExportError::SourceUnreadable`] if the file is missing, is not an
    /// ND2 file, or its metadata cannot be decoded.
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

impl<R: RangeReader + 'static> Nd2Reader<R> {
    /// Parse the container and its metadata from any range reader.
    pub async fn from_reader(reader: R) -> Result<Self, Nd2Error> {
        let reader = Arc::new(reader);
        let cache = BlockCache::new(reader.clone());

        let version = read_signature(&cache).await?;
        let chunks = ChunkMap::read(&cache).await?;

        let attributes = {
            let root = decode_chunk(&cache, &chunks, ATTRIBUTES_CHUNK)
                .await?
                .ok_or_else(|| Nd2Error::MissingChunk(ATTRIBUTES_CHUNK.to_string()))?;
            ImageAttributes::from_root(&root)?
        };

        let mut loops = match decode_chunk(&cache, &chunks, EXPERIMENT_CHUNK).await? {
            Some(root) => parse_experiment(&root),
            None => Vec::new(),
        };
        if loops.is_empty() && attributes.sequence_count > 1 {
            debug!(
                frames = attributes.sequence_count,
                "No acquisition loops recorded, treating frames as time points"
            );
            loops.push(ExperimentLoop {
                kind: LoopKind::Time,
                count: attributes.sequence_count,
                period_ms: None,
                z_step_um: None,
            });
        }

        let picture = match decode_chunk(&cache, &chunks, PICTURE_METADATA_CHUNK).await? {
            Some(root) => PictureMetadata::from_root(&root),
            None => PictureMetadata::default(),
        };

        let layout = FrameLayout::new(&loops)?;
        validate_geometry(&attributes, &layout, reader.size())?;
        if attributes.sequence_count < layout.frame_count() {
            warn!(
                source = reader.identifier(),
                recorded = attributes.sequence_count,
                expected = layout.frame_count(),
                "ND2 file holds fewer frames than its loops describe"
            );
        }

        let metadata = build_metadata(&attributes, &layout, &loops, picture, reader.identifier());

        debug!(
            source = reader.identifier(),
            version = %version,
            chunks = chunks.len(),
            width = attributes.width,
            height = attributes.height,
            planes = metadata.plane_count(),
            "Opened ND2"
        );

        Ok(Self {
            reader,
            chunks,
            attributes,
            layout,
            metadata,
            version,
        })
    }

    /// Container version from the file signature (e.g. `Ver3.0`).
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Frame geometry from the image attributes.
    pub fn attributes(&self) -> &ImageAttributes {
        &self.attributes
    }

    /// Read frame `sequence` and return its timestamp and pixel payload.
    async fn read_frame(&self, sequence: usize) -> Result<(f64, Bytes), ExportError> {
        let name = frame_chunk_name(sequence);
        let location = self.chunks.get(&name).ok_or_else(|| {
            ExportError::IoFailure(format!(
                "{}: frame {} is missing from the file",
                self.identifier(),
                sequence
            ))
        })?;

        let header = ChunkHeader::read(self.reader.as_ref(), location.offset).await?;
        let needed = TIMESTAMP_SIZE + self.attributes.frame_bytes();
        if (header.data_len as usize) < needed {
            return Err(ExportError::IoFailure(format!(
                "{}: frame {} is truncated ({} of {} bytes)",
                self.identifier(),
                sequence,
                header.data_len,
                needed
            )));
        }

        let data = self
            .reader
            .read_exact_at(header.data_offset(location.offset), needed)
            .await?;
        let timestamp = read_f64_le(&data[..TIMESTAMP_SIZE]);
        Ok((timestamp, data.slice(TIMESTAMP_SIZE..)))
    }

    /// Extract one channel from an interleaved frame.
    fn extract_channel(&self, frame: Bytes, channel: usize) -> Bytes {
        let attrs = &self.attributes;
        let sample = attrs.pixel_type.bytes_per_sample();
        let row_len = attrs.width as usize * sample;

        if attrs.components == 1 && attrs.row_stride == row_len {
            return frame;
        }

        let pixel = attrs.components * sample;
        let mut out = BytesMut::with_capacity(row_len * attrs.height as usize);
        for row in frame.chunks(attrs.row_stride).take(attrs.height as usize) {
            for x in 0..attrs.width as usize {
                let start = x * pixel + channel * sample;
                out.extend_from_slice(&row[start..start + sample]);
            }
        }
        out.freeze()
    }
}

/// Reject attribute and loop combinations no file of `file_size` bytes can
/// hold, before any per-channel or per-plane bookkeeping is sized from them.
fn validate_geometry(
    attributes: &ImageAttributes,
    layout: &FrameLayout,
    file_size: u64,
) -> Result<(), Nd2Error> {
    let frame = (TIMESTAMP_SIZE + attributes.frame_bytes()) as u64;
    if frame > file_size {
        return Err(Nd2Error::MalformedMetadata {
            chunk: ATTRIBUTES_CHUNK.to_string(),
            message: format!("frame of {} bytes exceeds file size {}", frame, file_size),
        });
    }

    if layout.frame_count().checked_mul(attributes.components).is_none() {
        return Err(Nd2Error::MalformedMetadata {
            chunk: EXPERIMENT_CHUNK.to_string(),
            message: format!(
                "{} frames of {} components overflow the plane count",
                layout.frame_count(),
                attributes.components
            ),
        });
    }
    Ok(())
}

/// Whether the components of each pixel are the samples of one RGB picture
/// plane rather than separate fluorescence channels.
fn is_rgb(attributes: &ImageAttributes, picture: &PictureMetadata) -> bool {
    attributes.components == 3 && picture.channels.len() == 1
}

/// One channel per color sample of an RGB plane. Samples are stored in BGR
/// order.
fn rgb_channels(plane: &ChannelInfo) -> Vec<ChannelInfo> {
    [("blue", 0x0000FF), ("green", 0x00FF00), ("red", 0xFF0000)]
        .into_iter()
        .map(|(sample, color)| ChannelInfo {
            color: Some(color),
            ..ChannelInfo::named(format!("{} ({})", plane.name, sample))
        })
        .collect()
}

/// Decode a metadata chunk if the map lists it.
async fn decode_chunk<R: RangeReader>(
    reader: &R,
    chunks: &ChunkMap,
    name: &str,
) -> Result<Option<ClxLevel>, Nd2Error> {
    let Some(location) = chunks.get(name) else {
        return Ok(None);
    };
    let data = read_chunk_data(reader, location.offset).await?;
    debug!(chunk = name, bytes = data.len(), "Decoding ND2 metadata chunk");
    ClxLevel::decode(name, &data).map(Some)
}

fn build_metadata(
    attributes: &ImageAttributes,
    layout: &FrameLayout,
    loops: &[ExperimentLoop],
    picture: PictureMetadata,
    identifier: &str,
) -> AxisMetadata {
    let mut metadata = AxisMetadata::new(attributes.width, attributes.height, attributes.pixel_type)
        .with_axis(AxisKind::Channel, attributes.components);
    for (kind, count) in layout.axes() {
        metadata = metadata.with_axis(kind, count);
    }

    let z_step = loops
        .iter()
        .find(|l| l.kind == LoopKind::ZStack)
        .and_then(|l| l.z_step_um)
        .filter(|&v| v > 0.0);
    let period = loops
        .iter()
        .find(|l| l.kind == LoopKind::Time)
        .and_then(|l| l.period_ms);

    let calibration = Calibration {
        physical_size_x: picture.calibration_um,
        physical_size_y: picture.calibration_um,
        physical_size_z: z_step,
        time_increment: period.map(|ms| ms / 1000.0),
    };

    let mut channels = if is_rgb(attributes, &picture) {
        rgb_channels(&picture.channels[0])
    } else {
        picture.channels
    };
    channels.truncate(attributes.components);
    while channels.len() < attributes.components {
        channels.push(ChannelInfo::placeholder(channels.len()));
    }

    let source_name = Path::new(identifier)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| identifier.to_string());

    metadata
        .with_calibration(calibration)
        .with_channels(channels)
        .with_source_name(source_name)
}

#[async_trait]
impl<R: RangeReader + 'static> SourceReader for Nd2Reader<R> {
    fn metadata(&self) -> &AxisMetadata {
        &self.metadata
    }

    async fn read_slice(&self, index: &IndexTuple) -> Result<PixelBuffer, ExportError> {
        self.metadata.check_index(index)?;

        let sequence = self.layout.sequence_index(index);
        let (timestamp, frame) = self.read_frame(sequence).await?;
        let data = self.extract_channel(frame, index.index_or_zero(AxisKind::Channel));

        debug!(index = %index, sequence, "Read ND2 plane");

        Ok(PixelBuffer {
            width: self.attributes.width,
            height: self.attributes.height,
            pixel_type: self.attributes.pixel_type,
            data,
            timestamp_ms: Some(timestamp),
        })
    }

    async fn close(&self) {
        self.reader.close().await;
    }

    fn identifier(&self) -> &str {
        self.reader.identifier()
    }
}

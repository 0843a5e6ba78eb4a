use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::axes::{AxisKind, AxisMetadata, ChannelInfo, IndexTuple};
use crate::error::ExportError;
use crate::format::tiff::{
    align8, bigtiff_header, IfdBuilder, OmeDocument, OmeImage, OmePlane, TiffTag,
    BIGTIFF_HEADER_SIZE, DESCRIPTION_PREFIX,
};
use crate::selection::IterationPlan;
use crate::source::PixelBuffer;

use super::{partial_path, SinkWriter};

/// Offset of the first-IFD field in a BigTIFF header.
const FIRST_IFD_FIELD: u64 = 8;

/// Where one written plane landed.
#[derive(Debug, Clone, Copy)]
struct PlaneRecord {
    offset: u64,
    timestamp_ms: Option<f64>,
}

/// State of one OME-TIFF export in progress.
pub struct OmeTiffHandle {
    writer: BufWriter<File>,
    partial: PathBuf,
    destination: PathBuf,
    metadata: AxisMetadata,
    plan: IterationPlan,
    planes: Vec<PlaneRecord>,
    position: u64,
}

impl OmeTiffHandle {
    /// Path of the in-progress file.
    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    /// Number of planes written so far.
    pub fn planes_written(&self) -> usize {
        self.planes.len()
    }
}

/// Writes BigTIFF files with OME-XML metadata.
///
/// Planes are appended uncompressed, one strip each, right after the
/// header. The IFDs and the OME-XML are written at the end by
/// [`finalize`](SinkWriter::finalize), which is also when the header's
/// first-IFD offset is patched; until then the file is not a readable TIFF.
#[derive(Debug, Clone, Copy, Default)]
pub struct OmeTiffSink;

impl OmeTiffSink {
    pub fn new() -> Self {
        Self
    }
}

fn write_failure(path: &Path, action: &str, err: std::io::Error) -> ExportError {
    ExportError::WriteFailure(format!("{}: {}: {}", path.display(), action, err))
}

#[async_trait]
impl SinkWriter for OmeTiffSink {
    type Handle = OmeTiffHandle;

    async fn begin(
        &self,
        destination: &Path,
        metadata: &AxisMetadata,
        plan: &IterationPlan,
    ) -> Result<OmeTiffHandle, ExportError> {
        // A cancelled or failed run must not leave an earlier export at `destination`
        match fs::remove_file(destination).await {
            Ok(()) => debug!(path = %destination.display(), "Removed existing destination"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ExportError::destination_unwritable(destination.display(), e)),
        }

        let partial = partial_path(destination);
        let file = File::create(&partial)
            .await
            .map_err(|e| ExportError::destination_unwritable(partial.display(), e))?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(&bigtiff_header(0))
            .await
            .map_err(|e| ExportError::destination_unwritable(partial.display(), e))?;

        debug!(
            path = %partial.display(),
            planes = plan.len(),
            "Started OME-TIFF export"
        );

        Ok(OmeTiffHandle {
            writer,
            partial,
            destination: destination.to_path_buf(),
            metadata: metadata.clone(),
            plan: plan.clone(),
            planes: Vec::with_capacity(plan.len()),
            position: BIGTIFF_HEADER_SIZE as u64,
        })
    }

    async fn write_unit(
        &self,
        handle: &mut OmeTiffHandle,
        index: &IndexTuple,
        buffer: &PixelBuffer,
    ) -> Result<(), ExportError> {
        let expected = handle.plan.unit(handle.planes.len());
        if expected.as_ref() != Some(index) {
            return Err(ExportError::WriteFailure(format!(
                "unit {} written out of plan order (expected {})",
                index,
                expected.map_or_else(|| "none".to_string(), |e| e.to_string())
            )));
        }

        let meta = &handle.metadata;
        if (buffer.width, buffer.height, buffer.pixel_type) != (meta.width, meta.height, meta.pixel_type)
            || buffer.data.len() != meta.plane_bytes()
        {
            return Err(ExportError::WriteFailure(format!(
                "unit {} has geometry {}x{} {:?} ({} bytes), expected {}x{} {:?} ({} bytes)",
                index,
                buffer.width,
                buffer.height,
                buffer.pixel_type,
                buffer.data.len(),
                meta.width,
                meta.height,
                meta.pixel_type,
                meta.plane_bytes()
            )));
        }

        handle
            .writer
            .write_all(&buffer.data)
            .await
            .map_err(|e| write_failure(&handle.partial, "write plane", e))?;

        handle.planes.push(PlaneRecord {
            offset: handle.position,
            timestamp_ms: buffer.timestamp_ms,
        });
        handle.position += buffer.data.len() as u64;

        Ok(())
    }

    async fn finalize(&self, mut handle: OmeTiffHandle) -> Result<PathBuf, ExportError> {
        if handle.planes.len() != handle.plan.len() {
            return Err(ExportError::WriteFailure(format!(
                "{} of {} planes written",
                handle.planes.len(),
                handle.plan.len()
            )));
        }

        let xml = build_document(&handle).to_xml();
        let ifds = build_ifds(&handle, &xml);

        // IFD chain
        let first_ifd = align8(handle.position);
        let mut at = first_ifd;
        let padding = vec![0u8; (first_ifd - handle.position) as usize];
        handle
            .writer
            .write_all(&padding)
            .await
            .map_err(|e| write_failure(&handle.partial, "write IFDs", e))?;

        for (i, ifd) in ifds.iter().enumerate() {
            let len = ifd.encoded_len();
            let next = if i + 1 == ifds.len() { 0 } else { align8(at + len) };
            let mut bytes = ifd.encode(at, next);
            bytes.resize((align8(at + len) - at) as usize, 0);
            handle
                .writer
                .write_all(&bytes)
                .await
                .map_err(|e| write_failure(&handle.partial, "write IFDs", e))?;
            at = align8(at + len);
        }

        handle
            .writer
            .flush()
            .await
            .map_err(|e| write_failure(&handle.partial, "flush", e))?;

        // Patch header
        let mut file = handle.writer.into_inner();
        file.seek(SeekFrom::Start(FIRST_IFD_FIELD))
            .await
            .map_err(|e| write_failure(&handle.partial, "patch header", e))?;
        file.write_all(&first_ifd.to_le_bytes())
            .await
            .map_err(|e| write_failure(&handle.partial, "patch header", e))?;
        file.flush()
            .await
            .map_err(|e| write_failure(&handle.partial, "flush", e))?;
        file.sync_all()
            .await
            .map_err(|e| write_failure(&handle.partial, "sync", e))?;
        drop(file);

        fs::rename(&handle.partial, &handle.destination)
            .await
            .map_err(|e| write_failure(&handle.destination, "rename", e))?;

        info!(
            path = %handle.destination.display(),
            planes = handle.planes.len(),
            bytes = at,
            "Wrote OME-TIFF"
        );

        Ok(handle.destination)
    }

    async fn abort(&self, mut handle: OmeTiffHandle) {
        if let Err(e) = handle.writer.flush().await {
            warn!(path = %handle.partial.display(), error = %e, "Flush failed while aborting");
        }
        debug!(
            path = %handle.partial.display(),
            planes = handle.planes.len(),
            "Aborted OME-TIFF export"
        );
    }
}

/// Selected source indices of an axis; a lone index 0 when the axis is absent.
fn selected_or_zero(plan: &IterationPlan, kind: AxisKind) -> Vec<usize> {
    plan.selected(kind)
        .map(<[usize]>::to_vec)
        .unwrap_or_else(|| vec![0])
}

fn build_document(handle: &OmeTiffHandle) -> OmeDocument {
    let plan = &handle.plan;
    let meta = &handle.metadata;

    let positions = selected_or_zero(plan, AxisKind::Position);
    let scenes = selected_or_zero(plan, AxisKind::Scene);
    let size_t = plan.selected_count(AxisKind::Time);
    let size_c = plan.selected_count(AxisKind::Channel);
    let size_z = plan.selected_count(AxisKind::Z);
    let per_image = size_z * size_c * size_t;

    let channels: Vec<ChannelInfo> = selected_or_zero(plan, AxisKind::Channel)
        .into_iter()
        .map(|c| {
            meta.channel(c)
                .cloned()
                .unwrap_or_else(|| ChannelInfo::placeholder(c))
        })
        .collect();

    let mut images = Vec::with_capacity(positions.len() * scenes.len());
    for &position in &positions {
        for &scene in &scenes {
            let image_index = images.len();
            let first_ifd = image_index * per_image;

            let planes = (0..per_image)
                .map(|k| OmePlane {
                    the_z: k % size_z,
                    the_c: (k / size_z) % size_c,
                    the_t: k / (size_z * size_c),
                    delta_t_ms: handle.planes[first_ifd + k].timestamp_ms,
                })
                .collect();

            images.push(OmeImage {
                name: image_name(meta, position, scene),
                size_x: meta.width,
                size_y: meta.height,
                size_z,
                size_c,
                size_t,
                pixel_type: meta.pixel_type,
                calibration: meta.calibration,
                channels: channels.clone(),
                planes,
                first_ifd,
            });
        }
    }

    OmeDocument {
        description: Some(format!("{}{}", DESCRIPTION_PREFIX, meta.source_name)),
        images,
        source_indices: plan
            .axes()
            .map(|(kind, indices)| (kind, indices.to_vec()))
            .collect(),
    }
}

fn image_name(meta: &AxisMetadata, position: usize, scene: usize) -> String {
    match (
        meta.has_axis(AxisKind::Position),
        meta.has_axis(AxisKind::Scene),
    ) {
        (true, true) => format!("Position {}, Scene {}", position, scene),
        (true, false) => format!("Position {}", position),
        (false, true) => format!("Scene {}", scene),
        (false, false) => meta.source_name.clone(),
    }
}

fn build_ifds(handle: &OmeTiffHandle, xml: &str) -> Vec<IfdBuilder> {
    let meta = &handle.metadata;
    let plane_bytes = meta.plane_bytes() as u64;

    handle
        .planes
        .iter()
        .enumerate()
        .map(|(i, plane)| {
            let mut ifd = IfdBuilder::new()
                .long(TiffTag::NewSubfileType, 0)
                .long(TiffTag::ImageWidth, meta.width)
                .long(TiffTag::ImageLength, meta.height)
                .short(TiffTag::BitsPerSample, meta.pixel_type.bits())
                .short(TiffTag::Compression, 1)
                .short(TiffTag::PhotometricInterpretation, 1)
                .long8_array(TiffTag::StripOffsets, &[plane.offset])
                .short(TiffTag::SamplesPerPixel, 1)
                .long(TiffTag::RowsPerStrip, meta.height)
                .long8_array(TiffTag::StripByteCounts, &[plane_bytes])
                .short(TiffTag::PlanarConfiguration, 1)
                .short(TiffTag::SampleFormat, meta.pixel_type.sample_format());
            if i == 0 {
                ifd = ifd.ascii(TiffTag::ImageDescription, xml).ascii(
                    TiffTag::Software,
                    concat!("nd2-export ", env!("CARGO_PKG_VERSION")),
                );
            }
            ifd
        })
        .collect()
}

//! Test utilities for integration tests.
//!
//! This module provides a tracking in-memory range reader, a recording
//! progress reporter, and a builder for synthetic ND2 files with
//! deterministic pixel patterns.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nd2_export::error::IoError;
use nd2_export::export::{JobId, ProgressEvent, ProgressReporter};
use nd2_export::io::RangeReader;

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// An in-memory range reader that tracks all read requests.
pub struct TrackingMockReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl TrackingMockReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
    }
}

impl Clone for TrackingMockReader {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            identifier: self.identifier.clone(),
            request_count: Arc::clone(&self.request_count),
            requests: Arc::clone(&self.requests),
        }
    }
}

#[async_trait]
impl RangeReader for TrackingMockReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((offset, len));

        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Recording Reporter
// =============================================================================

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<(JobId, ProgressEvent)>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events, in arrival order.
    pub fn events(&self) -> Vec<(JobId, ProgressEvent)> {
        self.events.lock().unwrap().clone()
    }

    /// Events of one job, without the id.
    pub fn events_for(&self, job: JobId) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|(id, _)| *id == job)
            .map(|(_, event)| event)
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, job: JobId, event: ProgressEvent) {
        self.events.lock().unwrap().push((job, event));
    }
}

/// Check the event stream contract: increasing progress without gaps, then
/// exactly one terminal event at the end.
pub fn assert_event_stream(events: &[ProgressEvent]) {
    let (terminal, progress) = events.split_last().expect("no events");
    assert!(terminal.is_terminal(), "last event {:?} is not terminal", terminal);

    for (i, event) in progress.iter().enumerate() {
        match event {
            ProgressEvent::Progress { completed, .. } => assert_eq!(*completed, i + 1),
            other => panic!("unexpected event {:?} before the terminal event", other),
        }
    }
}

// =============================================================================
// CLX Lite-Variant Encoder
// =============================================================================

const CLX_U32: u8 = 3;
const CLX_F64: u8 = 6;
const CLX_STRING: u8 = 8;
const CLX_LEVEL: u8 = 11;

fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|u| u.to_le_bytes())
        .collect()
}

fn clx_item(kind: u8, name: &str, value: &[u8]) -> Vec<u8> {
    let mut out = vec![kind, (name.encode_utf16().count() + 1) as u8];
    out.extend(utf16z(name));
    out.extend_from_slice(value);
    out
}

pub fn clx_u32(name: &str, value: u32) -> Vec<u8> {
    clx_item(CLX_U32, name, &value.to_le_bytes())
}

pub fn clx_f64(name: &str, value: f64) -> Vec<u8> {
    clx_item(CLX_F64, name, &value.to_le_bytes())
}

pub fn clx_string(name: &str, value: &str) -> Vec<u8> {
    clx_item(CLX_STRING, name, &utf16z(value))
}

pub fn clx_level(name: &str, children: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = children.concat();
    let head_len = 2 + (name.encode_utf16().count() + 1) * 2 + 12;

    let mut value = (children.len() as u32).to_le_bytes().to_vec();
    value.extend(((head_len + body.len()) as u64).to_le_bytes());
    value.extend(&body);

    // Child offset table
    let mut offset = head_len as u64;
    for child in children {
        value.extend(offset.to_le_bytes());
        offset += child.len() as u64;
    }

    clx_item(CLX_LEVEL, name, &value)
}

// =============================================================================
// Synthetic ND2 Builder
// =============================================================================

const CHUNK_MAGIC: u32 = 0x0ABE_CEDA;
const FILE_SIGNATURE: &str = "ND2 FILE SIGNATURE CHUNK NAME01!";
const CHUNK_MAP_SIGNATURE: &str = "ND2 CHUNK MAP SIGNATURE 0000001!";
const CHUNK_MAP_NAME: &str = "ND2 FILEMAP SIGNATURE NAME 0001!";

/// Loop types as stored in `eType`.
#[derive(Debug, Clone, Copy)]
pub enum Nd2Loop {
    Time { count: u32, period_ms: f64 },
    Position { count: u32 },
    Z { count: u32, step_um: f64 },
}

/// Builder for small ND2 files.
///
/// Pixel values follow [`Nd2Builder::sample`], so any plane can be
/// recomputed with [`Nd2Builder::expected_plane`].
#[derive(Debug, Clone)]
pub struct Nd2Builder {
    pub width: u32,
    pub height: u32,
    pub channels: Vec<(String, u32, f64)>,
    pub bits: u32,
    pub row_padding: usize,
    pub loops: Vec<Nd2Loop>,
    pub calibration_um: f64,
    pub frames_written: Option<usize>,
    pub truncated_frame: Option<usize>,
    pub rgb: bool,
    pub attribute_overrides: Vec<(&'static str, u32)>,
}

impl Default for Nd2Builder {
    fn default() -> Self {
        Self {
            width: 8,
            height: 6,
            channels: vec![("DAPI".to_string(), 0x0000_00FF, 461.0)],
            bits: 16,
            row_padding: 0,
            loops: Vec::new(),
            calibration_um: 0.325,
            frames_written: None,
            truncated_frame: None,
            rgb: false,
            attribute_overrides: Vec::new(),
        }
    }
}

impl Nd2Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn channels(mut self, names: &[&str]) -> Self {
        self.channels = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), 0x0000_00FF << (8 * (i % 3)), 450.0 + 50.0 * i as f64))
            .collect();
        self
    }

    pub fn bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn row_padding(mut self, bytes: usize) -> Self {
        self.row_padding = bytes;
        self
    }

    pub fn with_loop(mut self, nd2_loop: Nd2Loop) -> Self {
        self.loops.push(nd2_loop);
        self
    }

    /// Write only the first `frames` frames (an aborted acquisition).
    pub fn frames_written(mut self, frames: usize) -> Self {
        self.frames_written = Some(frames);
        self
    }

    /// Declare frame `sequence` shorter than a full frame.
    pub fn truncate_frame(mut self, sequence: usize) -> Self {
        self.truncated_frame = Some(sequence);
        self
    }

    /// Three interleaved color samples described by a single picture plane.
    pub fn rgb(mut self, name: &str) -> Self {
        self.channels = vec![(name.to_string(), 0x00FF_FFFF, 0.0); 3];
        self.rgb = true;
        self
    }

    /// Replace the stored value of an `SLxImageAttributes` field.
    pub fn override_attribute(mut self, name: &'static str, value: u32) -> Self {
        self.attribute_overrides.push((name, value));
        self
    }

    fn components(&self) -> usize {
        self.channels.len()
    }

    fn bytes_per_sample(&self) -> usize {
        (self.bits / 8) as usize
    }

    fn row_stride(&self) -> usize {
        self.width as usize * self.components() * self.bytes_per_sample() + self.row_padding
    }

    /// Frames described by the loops.
    pub fn frame_count(&self) -> usize {
        self.loops
            .iter()
            .map(|l| match *l {
                Nd2Loop::Time { count, .. } | Nd2Loop::Position { count } | Nd2Loop::Z { count, .. } => {
                    count as usize
                }
            })
            .product()
    }

    /// Sample value of pixel (x, y) of `channel` in frame `sequence`.
    pub fn sample(sequence: usize, channel: usize, x: usize, y: usize) -> u16 {
        ((sequence * 37 + channel * 101 + y * 11 + x * 3) % 251) as u16
    }

    /// Timestamp of frame `sequence` in milliseconds.
    pub fn timestamp(sequence: usize) -> f64 {
        sequence as f64 * 125.0
    }

    /// Little-endian bytes of one channel of one frame.
    pub fn expected_plane(&self, sequence: usize, channel: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                self.push_sample(&mut out, Self::sample(sequence, channel, x, y));
            }
        }
        out
    }

    fn push_sample(&self, out: &mut Vec<u8>, value: u16) {
        match self.bits {
            8 => out.push(value as u8),
            _ => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    fn frame_data(&self, sequence: usize) -> Vec<u8> {
        let mut data = Self::timestamp(sequence).to_le_bytes().to_vec();
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                for c in 0..self.components() {
                    self.push_sample(&mut data, Self::sample(sequence, c, x, y));
                }
            }
            data.extend(std::iter::repeat(0xEE).take(self.row_padding));
        }
        if self.truncated_frame == Some(sequence) {
            data.truncate(data.len() / 2);
        }
        data
    }

    fn attributes(&self) -> Vec<u8> {
        let fields = [
            ("uiWidth", self.width),
            ("uiWidthBytes", self.row_stride() as u32),
            ("uiHeight", self.height),
            ("uiComp", self.components() as u32),
            ("uiBpcInMemory", self.bits),
            ("uiBpcSignificant", self.bits),
            ("uiSequenceCount", self.frames_to_write() as u32),
            ("eCompression", 2),
        ];
        let items: Vec<Vec<u8>> = fields
            .iter()
            .map(|&(name, value)| {
                let value = self
                    .attribute_overrides
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map_or(value, |&(_, v)| v);
                clx_u32(name, value)
            })
            .collect();
        clx_level("SLxImageAttributes", &items)
    }

    fn experiment(&self) -> Vec<u8> {
        // Built from the innermost loop outwards
        let mut next: Option<Vec<u8>> = None;
        for (i, l) in self.loops.iter().enumerate().rev() {
            let (etype, pars) = match *l {
                Nd2Loop::Time { count, period_ms } => (
                    1,
                    vec![clx_u32("uiCount", count), clx_f64("dPeriod", period_ms)],
                ),
                Nd2Loop::Position { count } => (2, vec![clx_u32("uiCount", count)]),
                Nd2Loop::Z { count, step_um } => (
                    4,
                    vec![clx_u32("uiCount", count), clx_f64("dZStep", step_um)],
                ),
            };

            let mut children = vec![clx_u32("eType", etype), clx_level("uLoopPars", &pars)];
            if let Some(inner) = next.take() {
                children.push(clx_level("ppNextLevelEx", &[inner]));
            }
            let name = if i == 0 { "SLxExperiment" } else { "i0000000000" };
            next = Some(clx_level(name, &children));
        }
        next.unwrap_or_default()
    }

    fn picture_metadata(&self) -> Vec<u8> {
        let described = if self.rgb { 1 } else { self.channels.len() };
        let planes: Vec<Vec<u8>> = self
            .channels
            .iter()
            .take(described)
            .enumerate()
            .map(|(i, (name, color, emission))| {
                clx_level(
                    &format!("a{}", i),
                    &[
                        clx_string("sDescription", name),
                        clx_u32("uiColor", *color),
                        clx_f64("dEmissionWL", *emission),
                    ],
                )
            })
            .collect();

        clx_level(
            "SLxPictureMetadata",
            &[
                clx_f64("dCalibration", self.calibration_um),
                clx_level(
                    "sPicturePlanes",
                    &[
                        clx_u32("uiCount", described as u32),
                        clx_level("sPlaneNew", &planes),
                    ],
                ),
            ],
        )
    }

    fn frames_to_write(&self) -> usize {
        self.frames_written.unwrap_or_else(|| self.frame_count())
    }

    /// Serialize the file.
    pub fn build(&self) -> Vec<u8> {
        let mut file = Vec::new();
        let mut map: Vec<(String, u64, u64)> = Vec::new();

        push_chunk(&mut file, FILE_SIGNATURE, b"Ver3.0");

        let mut named = vec![
            ("ImageAttributesLV!".to_string(), self.attributes()),
            ("ImageMetadataSeqLV|0!".to_string(), self.picture_metadata()),
        ];
        if !self.loops.is_empty() {
            named.push(("ImageMetadataLV!".to_string(), self.experiment()));
        }
        for sequence in 0..self.frames_to_write() {
            named.push((format!("ImageDataSeq|{}!", sequence), self.frame_data(sequence)));
        }

        for (name, data) in named {
            let offset = push_chunk(&mut file, &name, &data);
            map.push((name, offset, data.len() as u64));
        }

        let mut map_data = Vec::new();
        for (name, offset, size) in &map {
            map_data.extend_from_slice(name.as_bytes());
            map_data.extend(offset.to_le_bytes());
            map_data.extend(size.to_le_bytes());
        }
        map_data.extend_from_slice(CHUNK_MAP_SIGNATURE.as_bytes());
        map_data.extend([0u8; 16]);
        let map_offset = push_chunk(&mut file, CHUNK_MAP_NAME, &map_data);

        file.extend_from_slice(CHUNK_MAP_SIGNATURE.as_bytes());
        file.extend(map_offset.to_le_bytes());
        file
    }

    /// Serialize the file to `path`.
    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }
}

/// Append a chunk and return its offset.
fn push_chunk(file: &mut Vec<u8>, name: &str, data: &[u8]) -> u64 {
    let offset = file.len() as u64;
    file.extend(CHUNK_MAGIC.to_le_bytes());
    file.extend((name.len() as u32).to_le_bytes());
    file.extend((data.len() as u64).to_le_bytes());
    file.extend_from_slice(name.as_bytes());
    file.extend_from_slice(data);
    offset
}

/// The reference acquisition used across tests: 3 positions, 3 channels,
/// 10 Z planes of 8x6 16-bit pixels.
pub fn multipoint_zstack() -> Nd2Builder {
    Nd2Builder::new()
        .channels(&["DAPI", "GFP", "mCherry"])
        .with_loop(Nd2Loop::Position { count: 3 })
        .with_loop(Nd2Loop::Z {
            count: 10,
            step_um: 0.5,
        })
}

/// A time-lapse: 4 time points, 2 positions, 3 Z planes, 2 channels.
pub fn timelapse() -> Nd2Builder {
    Nd2Builder::new()
        .size(5, 4)
        .channels(&["Brightfield", "GFP"])
        .row_padding(2)
        .with_loop(Nd2Loop::Time {
            count: 4,
            period_ms: 1500.0,
        })
        .with_loop(Nd2Loop::Position { count: 2 })
        .with_loop(Nd2Loop::Z {
            count: 3,
            step_um: 1.25,
        })
}

//! ND2 reader tests against synthetic files.

use nd2_export::{
    open_source, AxisKind, ErrorKind, IndexTuple, Nd2Reader, PixelType, SourceReader,
};

use super::test_utils::{multipoint_zstack, timelapse, Nd2Builder, Nd2Loop, TrackingMockReader};

fn index(entries: &[(AxisKind, usize)]) -> IndexTuple {
    IndexTuple::new(entries.iter().copied())
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_multipoint_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let meta = reader.metadata();

    let axes: Vec<(AxisKind, usize)> = meta.axes().iter().map(|a| (a.kind, a.extent)).collect();
    assert_eq!(
        axes,
        vec![
            (AxisKind::Position, 3),
            (AxisKind::Channel, 3),
            (AxisKind::Z, 10)
        ]
    );
    assert!(!meta.has_axis(AxisKind::Time));
    assert!(!meta.has_axis(AxisKind::Scene));

    assert_eq!((meta.width, meta.height), (8, 6));
    assert_eq!(meta.pixel_type, PixelType::U16);
    assert_eq!(meta.plane_count(), 90);
    assert_eq!(meta.source_name, "multipoint.nd2");
    assert_eq!(reader.version(), "Ver3.0");

    assert_eq!(meta.calibration.physical_size_x, Some(0.325));
    assert_eq!(meta.calibration.physical_size_y, Some(0.325));
    assert_eq!(meta.calibration.physical_size_z, Some(0.5));
    assert_eq!(meta.calibration.time_increment, None);

    let names: Vec<&str> = meta.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["DAPI", "GFP", "mCherry"]);
    assert_eq!(meta.channels[0].color, Some(0xFF0000));
    assert_eq!(meta.channels[1].color, Some(0x00FF00));
    assert_eq!(meta.channels[2].color, Some(0x0000FF));
    assert_eq!(meta.channels[1].emission_wavelength, Some(500.0));
}

#[tokio::test]
async fn test_timelapse_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timelapse.nd2");
    timelapse().write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let meta = reader.metadata();

    assert_eq!(meta.extent(AxisKind::Time), Some(4));
    assert_eq!(meta.extent(AxisKind::Position), Some(2));
    assert_eq!(meta.extent(AxisKind::Channel), Some(2));
    assert_eq!(meta.extent(AxisKind::Z), Some(3));
    assert_eq!(meta.calibration.time_increment, Some(1.5));
    assert_eq!(meta.calibration.physical_size_z, Some(1.25));
    assert_eq!(reader.attributes().row_stride, 22);
}

#[tokio::test]
async fn test_single_frame_has_only_channel_axis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single.nd2");
    Nd2Builder::new().bits(8).write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let meta = reader.metadata();
    assert_eq!(meta.axes().len(), 1);
    assert_eq!(meta.extent(AxisKind::Channel), Some(1));
    assert_eq!(meta.pixel_type, PixelType::U8);
}

#[tokio::test]
async fn test_rgb_samples_become_color_channels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brightfield.nd2");
    let builder = Nd2Builder::new().bits(8).rgb("Brightfield");
    builder.write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let meta = reader.metadata();
    assert_eq!(meta.extent(AxisKind::Channel), Some(3));

    let channels: Vec<(&str, Option<u32>)> = meta
        .channels
        .iter()
        .map(|c| (c.name.as_str(), c.color))
        .collect();
    assert_eq!(
        channels,
        vec![
            ("Brightfield (blue)", Some(0x0000FF)),
            ("Brightfield (green)", Some(0x00FF00)),
            ("Brightfield (red)", Some(0xFF0000)),
        ]
    );

    let red = reader
        .read_slice(&index(&[(AxisKind::Channel, 2)]))
        .await
        .unwrap();
    assert_eq!(&red.data[..], &builder.expected_plane(0, 2)[..]);
}

#[tokio::test]
async fn test_corrupt_attributes_are_source_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let corrupt = [
        (
            "overflowing-row.nd2",
            Nd2Builder::new()
                .override_attribute("uiWidth", u32::MAX)
                .override_attribute("uiComp", u32::MAX),
        ),
        (
            "oversized-frame.nd2",
            Nd2Builder::new().override_attribute("uiHeight", 1_000_000),
        ),
        (
            "overflowing-loops.nd2",
            Nd2Builder::new()
                .with_loop(Nd2Loop::Time {
                    count: u32::MAX,
                    period_ms: 100.0,
                })
                .with_loop(Nd2Loop::Position { count: u32::MAX })
                .with_loop(Nd2Loop::Z {
                    count: u32::MAX,
                    step_um: 1.0,
                })
                .frames_written(1),
        ),
    ];

    for (name, builder) in corrupt {
        let path = dir.path().join(name);
        builder.write_to(&path);

        let err = Nd2Reader::open(&path).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SourceUnreadable, "{}: {}", name, err);
    }
}

// =============================================================================
// Plane Reads
// =============================================================================

#[tokio::test]
async fn test_read_slice_deinterleaves_channels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multipoint.nd2");
    let builder = multipoint_zstack();
    builder.write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();

    for (p, c, z) in [(0, 0, 0), (1, 2, 5), (2, 1, 9)] {
        let buffer = reader
            .read_slice(&index(&[
                (AxisKind::Position, p),
                (AxisKind::Channel, c),
                (AxisKind::Z, z),
            ]))
            .await
            .unwrap();

        let sequence = p * 10 + z;
        assert_eq!((buffer.width, buffer.height), (8, 6));
        assert_eq!(&buffer.data[..], &builder.expected_plane(sequence, c)[..]);
        assert_eq!(buffer.timestamp_ms, Some(Nd2Builder::timestamp(sequence)));
    }
}

#[tokio::test]
async fn test_read_slice_with_row_padding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timelapse.nd2");
    let builder = timelapse();
    builder.write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let buffer = reader
        .read_slice(&index(&[
            (AxisKind::Position, 1),
            (AxisKind::Time, 3),
            (AxisKind::Channel, 1),
            (AxisKind::Z, 2),
        ]))
        .await
        .unwrap();

    let sequence = (3 * 2 + 1) * 3 + 2;
    assert_eq!(buffer.data.len(), 5 * 4 * 2);
    assert_eq!(&buffer.data[..], &builder.expected_plane(sequence, 1)[..]);
}

#[tokio::test]
async fn test_read_slice_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();

    let err = reader
        .read_slice(&index(&[
            (AxisKind::Position, 0),
            (AxisKind::Channel, 0),
            (AxisKind::Z, 10),
        ]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);

    // Wrong arity
    let err = reader
        .read_slice(&index(&[(AxisKind::Z, 0)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
}

#[tokio::test]
async fn test_plane_reads_bypass_the_metadata_cache() {
    let data = multipoint_zstack().build();
    let reader = TrackingMockReader::new(data, "memory.nd2");
    let nd2 = Nd2Reader::from_reader(reader.clone()).await.unwrap();

    reader.reset_tracking();
    nd2.read_slice(&index(&[
        (AxisKind::Position, 2),
        (AxisKind::Channel, 1),
        (AxisKind::Z, 4),
    ]))
    .await
    .unwrap();

    // Chunk header, then timestamp + pixels
    let requests = reader.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].1, 16);
    assert_eq!(requests[1].1, 8 + 8 * 6 * 3 * 2);
}

// =============================================================================
// Damaged Files
// =============================================================================

#[tokio::test]
async fn test_truncated_frame_is_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.nd2");
    multipoint_zstack().truncate_frame(3).write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let err = reader
        .read_slice(&index(&[
            (AxisKind::Position, 0),
            (AxisKind::Channel, 0),
            (AxisKind::Z, 3),
        ]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);

    // The reader stays usable
    reader
        .read_slice(&index(&[
            (AxisKind::Position, 0),
            (AxisKind::Channel, 0),
            (AxisKind::Z, 4),
        ]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_aborted_acquisition_missing_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aborted.nd2");
    Nd2Builder::new()
        .with_loop(Nd2Loop::Time {
            count: 5,
            period_ms: 100.0,
        })
        .frames_written(3)
        .write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    assert_eq!(reader.metadata().extent(AxisKind::Time), Some(5));

    let ok = index(&[(AxisKind::Time, 2), (AxisKind::Channel, 0)]);
    assert!(reader.read_slice(&ok).await.is_ok());

    let missing = index(&[(AxisKind::Time, 4), (AxisKind::Channel, 0)]);
    let err = reader.read_slice(&missing).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
}

#[tokio::test]
async fn test_missing_file_is_source_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.nd2");

    let err = Nd2Reader::open(&path).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);

    let err = open_source(&path).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
}

#[tokio::test]
async fn test_unrecognized_file_is_source_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.nd2");
    std::fs::write(&path, b"these are not microscopy images").unwrap();

    let err = open_source(&path).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
}

#[tokio::test]
async fn test_damaged_chunk_map_is_source_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("damaged.nd2");
    let mut data = multipoint_zstack().build();
    let len = data.len();
    data[len - 40] = b'X';
    std::fs::write(&path, data).unwrap();

    let err = Nd2Reader::open(&path).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
}

#[tokio::test]
async fn test_open_source_detects_nd2() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&path);

    let source = open_source(&path).await.unwrap();
    assert_eq!(source.metadata().plane_count(), 90);
    assert!(source.identifier().ends_with("multipoint.nd2"));
}

#[tokio::test]
async fn test_reads_after_close_fail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single.nd2");
    Nd2Builder::new().write_to(&path);

    let reader = Nd2Reader::open(&path).await.unwrap();
    let unit = index(&[(AxisKind::Channel, 0)]);
    assert!(reader.read_slice(&unit).await.is_ok());

    reader.close().await;
    reader.close().await;

    let err = reader.read_slice(&unit).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
}

//! Export to OME-TIFF and read the result back.

use std::path::{Path, PathBuf};

use nd2_export::{
    open_source, partial_path, resolve, AxisKind, ErrorKind, ExportJob, ExportRequest,
    ExportService, IndexTuple, JobOutcome, Nd2Reader, OmeTiffReader, SelectionSpec, SourceReader,
    TracingReporter,
};

use super::test_utils::{multipoint_zstack, timelapse, Nd2Builder, RecordingReporter};

async fn export(source: &Path, destination: &Path, selection: SelectionSpec) -> JobOutcome {
    let request = ExportRequest::new(source, destination).with_selection(selection);
    ExportService::new()
        .run_export(request, &TracingReporter)
        .await
        .unwrap()
}

fn all_units(reader: &dyn SourceReader) -> Vec<IndexTuple> {
    resolve(reader.metadata(), &SelectionSpec::all())
        .unwrap()
        .units()
        .collect()
}

/// Export everything, then check the copy against the source plane by plane.
async fn assert_full_roundtrip(builder: Nd2Builder, name: &str) {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join(name);
    builder.write_to(&source_path);
    let destination = dir.path().join("copy.ome.tif");

    let outcome = export(&source_path, &destination, SelectionSpec::all()).await;
    assert!(outcome.is_success(), "{:?}", outcome);

    let source = Nd2Reader::open(&source_path).await.unwrap();
    let copy = OmeTiffReader::open(&destination).await.unwrap();

    let (a, b) = (source.metadata(), copy.metadata());
    assert_eq!(a.axes(), b.axes());
    assert_eq!((a.width, a.height, a.pixel_type), (b.width, b.height, b.pixel_type));
    assert_eq!(a.calibration, b.calibration);
    assert_eq!(a.channels, b.channels);
    assert_eq!(b.source_name, name);

    for index in all_units(&source) {
        let original = source.read_slice(&index).await.unwrap();
        let exported = copy.read_slice(&index).await.unwrap();
        assert_eq!(original.data, exported.data, "pixels differ at {}", index);
        assert_eq!(
            original.timestamp_ms, exported.timestamp_ms,
            "timestamps differ at {}",
            index
        );
    }
}

// =============================================================================
// Full Exports
// =============================================================================

#[tokio::test]
async fn test_full_export_multipoint() {
    assert_full_roundtrip(multipoint_zstack(), "multipoint.nd2").await;
}

#[tokio::test]
async fn test_full_export_timelapse() {
    assert_full_roundtrip(timelapse(), "timelapse.nd2").await;
}

#[tokio::test]
async fn test_full_export_single_8bit_plane() {
    assert_full_roundtrip(Nd2Builder::new().bits(8).size(13, 7), "single.nd2").await;
}

// =============================================================================
// Subset Exports
// =============================================================================

#[tokio::test]
async fn test_subset_export_records_source_indices() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("multipoint.nd2");
    let builder = multipoint_zstack();
    builder.write_to(&source_path);
    let destination = dir.path().join("subset.ome.tif");

    let selection = SelectionSpec::all()
        .with_indices(AxisKind::Position, [1])
        .with_indices(AxisKind::Z, [9, 0, 5, 5]);
    let outcome = export(&source_path, &destination, selection).await;
    assert!(matches!(outcome, JobOutcome::Succeeded { units: 9, .. }));

    let copy = OmeTiffReader::open(&destination).await.unwrap();
    let meta = copy.metadata();
    assert_eq!(meta.extent(AxisKind::Position), Some(1));
    assert_eq!(meta.extent(AxisKind::Channel), Some(3));
    assert_eq!(meta.extent(AxisKind::Z), Some(3));
    assert_eq!(meta.plane_count(), 9);
    assert_eq!(meta.calibration.physical_size_z, Some(0.5));

    assert_eq!(
        copy.source_indices(),
        &[
            (AxisKind::Position, vec![1]),
            (AxisKind::Channel, vec![0, 1, 2]),
            (AxisKind::Z, vec![0, 5, 9]),
        ]
    );

    let z_source = [0, 5, 9];
    for c in 0..3 {
        for (z, &source_z) in z_source.iter().enumerate() {
            let index = IndexTuple::new([
                (AxisKind::Position, 0),
                (AxisKind::Channel, c),
                (AxisKind::Z, z),
            ]);
            let plane = copy.read_slice(&index).await.unwrap();
            let sequence = 10 + source_z;
            assert_eq!(&plane.data[..], &builder.expected_plane(sequence, c)[..]);
            assert_eq!(plane.timestamp_ms, Some(Nd2Builder::timestamp(sequence)));
        }
    }
}

#[tokio::test]
async fn test_channel_subset_keeps_channel_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&source_path);
    let destination = dir.path().join("gfp.ome.tif");

    let selection = SelectionSpec::all().with_indices(AxisKind::Channel, [1]);
    assert!(export(&source_path, &destination, selection).await.is_success());

    let copy = OmeTiffReader::open(&destination).await.unwrap();
    let meta = copy.metadata();
    assert_eq!(meta.extent(AxisKind::Channel), Some(1));
    assert_eq!(meta.extent(AxisKind::Position), Some(3));
    assert_eq!(meta.channels.len(), 1);
    assert_eq!(meta.channels[0].name, "GFP");
    assert_eq!(meta.channels[0].color, Some(0x00FF00));
}

#[tokio::test]
async fn test_reexport_of_an_export() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("timelapse.nd2");
    let builder = timelapse();
    builder.write_to(&source_path);

    let first = dir.path().join("first.ome.tif");
    let second = dir.path().join("second.ome.tif");

    let selection = SelectionSpec::all().with_indices(AxisKind::Time, [1, 3]);
    assert!(export(&source_path, &first, selection).await.is_success());

    // The export is itself a valid source
    let reopened = open_source(&first).await.unwrap();
    assert_eq!(reopened.metadata().extent(AxisKind::Time), Some(2));
    reopened.close().await;

    let selection = SelectionSpec::all().with_indices(AxisKind::Time, [1]);
    assert!(export(&first, &second, selection).await.is_success());

    let copy = OmeTiffReader::open(&second).await.unwrap();
    assert_eq!(copy.metadata().extent(AxisKind::Time), Some(1));

    // Time 1 of the first export is time 3 of the acquisition
    let plane = copy
        .read_slice(&IndexTuple::new([
            (AxisKind::Position, 1),
            (AxisKind::Time, 0),
            (AxisKind::Channel, 0),
            (AxisKind::Z, 2),
        ]))
        .await
        .unwrap();
    let sequence = (3 * 2 + 1) * 3 + 2;
    assert_eq!(&plane.data[..], &builder.expected_plane(sequence, 0)[..]);
}

// =============================================================================
// Container Properties
// =============================================================================

#[tokio::test]
async fn test_exports_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&source_path);

    let selection = || {
        SelectionSpec::all()
            .with_indices(AxisKind::Position, [0, 2])
            .with_indices(AxisKind::Z, [3])
    };
    let a: PathBuf = dir.path().join("a.ome.tif");
    let b: PathBuf = dir.path().join("b.ome.tif");
    assert!(export(&source_path, &a, selection()).await.is_success());
    assert!(export(&source_path, &b, selection()).await.is_success());

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

#[tokio::test]
async fn test_open_source_detects_ome_tiff() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&source_path);
    let destination = dir.path().join("out.ome.tif");

    let selection = SelectionSpec::all().with_indices(AxisKind::Z, [4]);
    assert!(export(&source_path, &destination, selection).await.is_success());

    let bytes = std::fs::read(&destination).unwrap();
    assert_eq!(&bytes[..4], &[b'I', b'I', 43, 0]);

    let source = open_source(&destination).await.unwrap();
    assert_eq!(source.metadata().plane_count(), 9);
    assert_eq!(source.metadata().source_name, "multipoint.nd2");
}

#[tokio::test]
async fn test_cancelled_partial_is_not_a_source() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("multipoint.nd2");
    multipoint_zstack().write_to(&source_path);
    let destination = dir.path().join("cancelled.ome.tif");

    let source = open_source(&source_path).await.unwrap();
    let plan = resolve(source.metadata(), &SelectionSpec::all()).unwrap();
    let job = ExportJob::new(source, plan, &destination);
    job.cancel_handle().cancel();

    let outcome = ExportService::new()
        .spawn(job, RecordingReporter::new())
        .wait()
        .await
        .unwrap();
    assert!(matches!(outcome, JobOutcome::Cancelled { .. }));

    let partial = partial_path(&destination);
    assert!(partial.exists());
    let err = open_source(&partial).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
}

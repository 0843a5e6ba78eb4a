//! Export service tests: plans, jobs, progress events and cancellation.

use std::path::Path;
use std::sync::Arc;

use nd2_export::{
    open_source, partial_path, resolve, AxisKind, CancelHandle, ErrorKind, ExportJob,
    ExportRequest, ExportService, IndexTuple, JobId, JobOutcome, ProgressEvent, ProgressReporter,
    SelectionSpec,
};

use super::test_utils::{assert_event_stream, multipoint_zstack, RecordingReporter};

fn write_multipoint(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("multipoint.nd2");
    multipoint_zstack().write_to(&path);
    path
}

fn position_one_three_planes() -> SelectionSpec {
    SelectionSpec::all()
        .with_indices(AxisKind::Position, [1])
        .with_indices(AxisKind::Z, [0, 5, 9])
}

/// Records events and cancels the job once `after` units are done.
struct CancellingReporter {
    inner: Arc<RecordingReporter>,
    cancel: CancelHandle,
    after: usize,
}

impl ProgressReporter for CancellingReporter {
    fn report(&self, job: JobId, event: ProgressEvent) {
        if let ProgressEvent::Progress { completed, .. } = event {
            if completed == self.after {
                self.cancel.cancel();
            }
        }
        self.inner.report(job, event);
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_subset_plan_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());

    let source = open_source(&path).await.unwrap();
    let plan = resolve(source.metadata(), &position_one_three_planes()).unwrap();
    source.close().await;

    assert_eq!(plan.len(), 9);
    let units: Vec<IndexTuple> = plan.units().collect();
    let expected: Vec<IndexTuple> = (0..3)
        .flat_map(|c| {
            [0, 5, 9].into_iter().map(move |z| {
                IndexTuple::new([
                    (AxisKind::Position, 1),
                    (AxisKind::Channel, c),
                    (AxisKind::Z, z),
                ])
            })
        })
        .collect();
    assert_eq!(units, expected);
}

#[tokio::test]
async fn test_selection_errors_are_returned_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let service = ExportService::new();
    let reporter = RecordingReporter::new();

    let request = ExportRequest::new(&path, dir.path().join("out.ome.tif"))
        .with_selection(SelectionSpec::all().with_indices(AxisKind::Scene, [0]));
    let err = service
        .start_export(request, reporter.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownAxis);

    let request = ExportRequest::new(&path, dir.path().join("out.ome.tif"))
        .with_selection(SelectionSpec::all().with_indices(AxisKind::Z, [2, 10]));
    let err = service
        .start_export(request, reporter.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSelection);

    let request = ExportRequest::new(&path, dir.path().join("out.ome.tif"))
        .with_selection(SelectionSpec::all().with_indices(AxisKind::Channel, Vec::new()));
    let err = service
        .start_export(request, reporter.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptySelection);

    assert!(reporter.events().is_empty());
    assert!(!dir.path().join("out.ome.tif").exists());
}

// =============================================================================
// Successful Runs
// =============================================================================

#[tokio::test]
async fn test_start_export_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("subset.ome.tif");

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let request =
        ExportRequest::new(&path, &destination).with_selection(position_one_three_planes());

    let handle = service.start_export(request, reporter.clone()).await.unwrap();
    let id = handle.id();
    let outcome = handle.wait().await.unwrap();

    match outcome {
        JobOutcome::Succeeded {
            destination: ref written,
            units,
        } => {
            assert_eq!(written, &destination);
            assert_eq!(units, 9);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let events = reporter.events_for(id);
    assert_event_stream(&events);
    assert_eq!(events.len(), 10);
    assert_eq!(
        events[0],
        ProgressEvent::Progress {
            completed: 1,
            total: 9
        }
    );
    assert_eq!(events.last(), Some(&outcome.to_event()));

    assert!(destination.exists());
    assert!(!partial_path(&destination).exists());
}

#[tokio::test]
async fn test_run_export_inline() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("all.ome.tif");

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let outcome = service
        .run_export(ExportRequest::new(&path, &destination), reporter.as_ref())
        .await
        .unwrap();

    assert!(outcome.is_success());
    let events: Vec<ProgressEvent> = reporter.events().into_iter().map(|(_, e)| e).collect();
    assert_event_stream(&events);
    assert_eq!(events.len(), 91);
}

#[tokio::test]
async fn test_existing_destination_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("out.ome.tif");
    std::fs::write(&destination, b"stale").unwrap();

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let request =
        ExportRequest::new(&path, &destination).with_selection(position_one_three_planes());
    let outcome = service
        .start_export(request, reporter.clone())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(std::fs::metadata(&destination).unwrap().len() > 5);
}

#[tokio::test]
async fn test_cancelled_reexport_leaves_no_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("out.ome.tif");

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let request =
        ExportRequest::new(&path, &destination).with_selection(position_one_three_planes());
    let outcome = service.run_export(request, &*reporter).await.unwrap();
    assert!(outcome.is_success());
    assert!(destination.exists());

    // Same export again, cancelled: the earlier file would be
    // indistinguishable from a completed run
    let source = open_source(&path).await.unwrap();
    let plan = resolve(source.metadata(), &position_one_three_planes()).unwrap();
    let job = ExportJob::new(source, plan, &destination);
    job.cancel_handle().cancel();
    let outcome = service
        .spawn(job, RecordingReporter::new())
        .wait()
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Cancelled { completed: 0 }));
    assert!(!destination.exists());
    assert!(partial_path(&destination).exists());
}

#[tokio::test]
async fn test_concurrent_jobs_share_a_reporter() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());

    let service = ExportService::new();
    let reporter = RecordingReporter::new();

    let first = service
        .start_export(
            ExportRequest::new(&path, dir.path().join("a.ome.tif"))
                .with_selection(position_one_three_planes()),
            reporter.clone(),
        )
        .await
        .unwrap();
    let second = service
        .start_export(
            ExportRequest::new(&path, dir.path().join("b.ome.tif"))
                .with_selection(SelectionSpec::all().with_indices(AxisKind::Channel, [2])),
            reporter.clone(),
        )
        .await
        .unwrap();

    let (first_id, second_id) = (first.id(), second.id());
    assert_ne!(first_id, second_id);

    let (a, b) = tokio::join!(first.wait(), second.wait());
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());

    for (id, units) in [(first_id, 9), (second_id, 30)] {
        let events = reporter.events_for(id);
        assert_event_stream(&events);
        assert_eq!(events.len(), units + 1);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_mid_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("cancelled.ome.tif");

    let source = open_source(&path).await.unwrap();
    let plan = resolve(source.metadata(), &SelectionSpec::all()).unwrap();
    let job = ExportJob::new(source, plan, &destination);
    let id = job.id();

    let recorder = RecordingReporter::new();
    let reporter = Arc::new(CancellingReporter {
        inner: recorder.clone(),
        cancel: job.cancel_handle(),
        after: 4,
    });

    let service = ExportService::new();
    let outcome = service.spawn(job, reporter).wait().await.unwrap();
    assert!(matches!(outcome, JobOutcome::Cancelled { completed: 4 }));

    let events = recorder.events_for(id);
    assert_event_stream(&events);
    assert_eq!(events.last(), Some(&ProgressEvent::Cancelled { completed: 4 }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Succeeded { .. })));

    assert!(!destination.exists());
    assert!(partial_path(&destination).exists());
}

#[tokio::test]
async fn test_cancel_before_first_unit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("never.ome.tif");

    let source = open_source(&path).await.unwrap();
    let plan = resolve(source.metadata(), &position_one_three_planes()).unwrap();
    let job = ExportJob::new(source, plan, &destination);
    job.cancel_handle().cancel();
    let id = job.id();

    let reporter = RecordingReporter::new();
    let outcome = ExportService::new()
        .spawn(job, reporter.clone())
        .wait()
        .await
        .unwrap();

    assert!(matches!(outcome, JobOutcome::Cancelled { completed: 0 }));
    assert_eq!(
        reporter.events_for(id),
        vec![ProgressEvent::Cancelled { completed: 0 }]
    );
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_cancel_after_completion_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("done.ome.tif");

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let handle = service
        .start_export(
            ExportRequest::new(&path, &destination).with_selection(position_one_three_planes()),
            reporter.clone(),
        )
        .await
        .unwrap();
    let id = handle.id();
    let cancel = handle.cancel_handle();

    let outcome = handle.wait().await.unwrap();
    assert!(outcome.is_success());

    cancel.cancel();
    cancel.cancel();

    let events = reporter.events_for(id);
    assert_event_stream(&events);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Succeeded { units: 9, .. })
    ));
    assert!(destination.exists());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_truncated_frame_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.nd2");
    multipoint_zstack().truncate_frame(3).write_to(&path);
    let destination = dir.path().join("out.ome.tif");

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let request = ExportRequest::new(&path, &destination)
        .with_selection(SelectionSpec::all().with_indices(AxisKind::Position, [0]));

    // Opening succeeds; the failure surfaces while the job runs
    let handle = service.start_export(request, reporter.clone()).await.unwrap();
    let id = handle.id();
    let outcome = handle.wait().await.unwrap();

    let failing = IndexTuple::new([
        (AxisKind::Position, 0),
        (AxisKind::Channel, 0),
        (AxisKind::Z, 3),
    ]);
    match &outcome {
        JobOutcome::Failed { error, index } => {
            assert_eq!(error.kind(), ErrorKind::IoFailure);
            assert_eq!(index.as_ref(), Some(&failing));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let events = reporter.events_for(id);
    assert_event_stream(&events);
    assert_eq!(events.len(), 4);
    match events.last() {
        Some(ProgressEvent::Failed { kind, index, .. }) => {
            assert_eq!(*kind, ErrorKind::IoFailure);
            assert_eq!(index.as_ref(), Some(&failing));
        }
        other => panic!("unexpected terminal event {:?}", other),
    }
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_unwritable_destination_is_a_failed_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_multipoint(dir.path());
    let destination = dir.path().join("no-such-dir").join("out.ome.tif");

    let service = ExportService::new();
    let reporter = RecordingReporter::new();
    let handle = service
        .start_export(ExportRequest::new(&path, &destination), reporter.clone())
        .await
        .unwrap();
    let id = handle.id();
    let outcome = handle.wait().await.unwrap();

    assert!(matches!(
        &outcome,
        JobOutcome::Failed { error, index: None }
            if error.kind() == ErrorKind::DestinationUnwritable
    ));

    let events = reporter.events_for(id);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ProgressEvent::Failed {
            kind: ErrorKind::DestinationUnwritable,
            index: None,
            ..
        }
    ));
}

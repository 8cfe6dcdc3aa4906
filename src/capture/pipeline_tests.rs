use crate::capture::job::JobOutcome;
use crate::capture::{CaptureNotice, CapturePipeline, CapturePipelineBuilder, CycleOutcome};
use crate::config::DashcamConfig;
use crate::detection::Detection;
use crate::storage::memory::MemoryStore;
use crate::storage::CaptureStore;
use crate::test_stuff::ScriptedRecognizer;
use crate::utils::bbox::BoundingBox;
use crate::utils::frame::FrameSnapshot;
use crate::Errors;
use image::RgbImage;
use std::sync::Arc;

const W: u32 = 640;
const H: u32 = 480;

fn config() -> DashcamConfig {
    let mut c = DashcamConfig::default();
    c.retention.write_retry.base_delay_ms = 0;
    c
}

fn frame() -> FrameSnapshot {
    FrameSnapshot::new(1, 0, RgbImage::new(W, H))
}

fn car(x: f32, y: f32, w: f32, h: f32) -> Detection {
    Detection::new("car", 0.8, BoundingBox::new(x, y, w, h))
}

fn pipeline(store: &Arc<MemoryStore>) -> CapturePipeline<MemoryStore> {
    CapturePipelineBuilder::new(store.clone()).build()
}

#[test]
fn vehicle_capture_lifecycle() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let c = config();
    let f = frame();
    let mut now = 0;

    // 3% of the frame width, below the 5% minimum
    for i in 0..5 {
        let d = car(300.0 + i as f32, 200.0, 19.2, 14.4);
        let outcome = p.on_detections(&[d], W, H, Some(f.clone()), now, &c);
        assert!(matches!(outcome, CycleOutcome::Idle));
        assert_eq!(p.debug_info()[0].consecutive_large_frames, 0);
        now += 100;
    }

    // 15% of the frame width for three frames
    let wide = car(300.0, 200.0, 96.0, 72.0);
    assert!(matches!(
        p.on_detections(&[wide.clone()], W, H, Some(f.clone()), 500, &c),
        CycleOutcome::Idle
    ));
    assert!(matches!(
        p.on_detections(&[wide.clone()], W, H, Some(f.clone()), 600, &c),
        CycleOutcome::Idle
    ));
    let job = p
        .on_detections(&[wide.clone()], W, H, Some(f.clone()), 700, &c)
        .job()
        .unwrap();
    let track_id = job.track_id();
    assert_eq!(job.timestamp(), 700);
    assert!(matches!(job.run().unwrap(), JobOutcome::Captured(_)));
    assert_eq!(store.capture_count(), 1);

    // ineligible until the cooldown is over
    let mut scheduled = Vec::default();
    let mut now = 800;
    while now <= 10_800 {
        let outcome = p.on_detections(&[wide.clone()], W, H, Some(f.clone()), now, &c);
        if let Some(job) = outcome.job() {
            scheduled.push((now, job.track_id()));
        }
        now += 100;
    }
    assert_eq!(scheduled, vec![(10_800, track_id)]);
}

#[test]
fn global_throttle_allows_one_attempt_per_window() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let c = config();
    let f = frame();
    let both = [car(50.0, 100.0, 96.0, 72.0), car(400.0, 100.0, 96.0, 72.0)];

    assert!(matches!(
        p.on_detections(&both, W, H, Some(f.clone()), 0, &c),
        CycleOutcome::Idle
    ));
    assert!(matches!(
        p.on_detections(&both, W, H, Some(f.clone()), 100, &c),
        CycleOutcome::Idle
    ));
    let first = p.on_detections(&both, W, H, Some(f.clone()), 200, &c).job().unwrap();
    assert_eq!(first.track_id(), 1);
    assert_eq!(p.tracker().get(2).unwrap().last_capture_attempt_ms, None);

    let mut now = 300;
    while now < 2_200 {
        let outcome = p.on_detections(&both, W, H, Some(f.clone()), now, &c);
        assert!(matches!(outcome, CycleOutcome::Throttled), "{:?} at {}", outcome, now);
        now += 100;
    }
    let second = p.on_detections(&both, W, H, Some(f.clone()), 2_200, &c).job().unwrap();
    assert_eq!(second.track_id(), 2);
}

#[test]
fn missing_frame_consumes_throttle_but_not_cooldown() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let c = config();
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, None, 0, &c);
    p.on_detections(&d, W, H, None, 100, &c);
    assert!(matches!(
        p.on_detections(&d, W, H, None, 200, &c),
        CycleOutcome::NoFrame
    ));
    let tracked = p.tracker().get(1).unwrap();
    assert_eq!(tracked.last_capture_attempt_ms, None);
    assert_eq!(tracked.consecutive_large_frames, 3);

    assert!(matches!(
        p.on_detections(&d, W, H, Some(frame()), 300, &c),
        CycleOutcome::Throttled
    ));
    let job = p.on_detections(&d, W, H, Some(frame()), 2_200, &c).job().unwrap();
    assert_eq!(job.track_id(), 1);
}

#[test]
fn disabling_aborts_scheduled_jobs() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let notices = p.subscribe();
    let c = config();
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(frame()), 0, &c);
    p.on_detections(&d, W, H, Some(frame()), 100, &c);
    let job = p.on_detections(&d, W, H, Some(frame()), 200, &c).job().unwrap();

    p.disable();
    assert_eq!(job.run().unwrap(), JobOutcome::Aborted);
    assert_eq!(store.capture_count(), 0);
    assert!(notices.try_recv().is_err());
    assert!(matches!(
        p.on_detections(&d, W, H, Some(frame()), 300, &c),
        CycleOutcome::Disabled
    ));

    p.enable();
    assert!(p.tracker().is_empty());
    p.on_detections(&d, W, H, Some(frame()), 400, &c);
    assert_eq!(p.tracker().get(1).unwrap().last_seen_ms, 400);
}

#[test]
fn recognized_plate_is_reported() {
    let store = Arc::new(MemoryStore::default());
    let mut p = CapturePipelineBuilder::new(store.clone())
        .recognizer(ScriptedRecognizer::always("AB 1234", 91.0))
        .build();
    let notices = p.subscribe();
    let c = config();
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(frame()), 0, &c);
    p.on_detections(&d, W, H, Some(frame()), 100, &c);
    let job = p.on_detections(&d, W, H, Some(frame()), 200, &c).job().unwrap();
    let metadata = match job.run().unwrap() {
        JobOutcome::Captured(m) => m,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(metadata.plate_text.as_deref(), Some("AB1234"));
    assert_eq!(metadata.ocr_confidence, Some(91.0));

    let captures = store.all_captures().unwrap();
    let stored = &captures[0];
    assert!(stored.plate_region.is_some());
    assert_eq!(&stored.vehicle_image[..2], &[0xFF, 0xD8]);

    let received = notices.try_iter().collect::<Vec<_>>();
    assert_eq!(received.len(), 3);
    assert!(matches!(&received[0], CaptureNotice::ScanAttempt { track_id: 1, timestamp: 200, .. }));
    assert_eq!(received[1], CaptureNotice::Captured(metadata.clone()));
    assert_eq!(
        received[2],
        CaptureNotice::PlateRecognized {
            track_id: 1,
            text: "AB1234".into(),
            confidence: 91.0
        }
    );

    assert_eq!(p.highlights(900).len(), 1);
    assert!(p.highlights(1_200).is_empty());

    // plate text reaches the tracker on the next cycle
    assert!(p.tracker().get(1).unwrap().plate_text.is_none());
    p.on_detections(&d, W, H, Some(frame()), 300, &c);
    assert_eq!(p.tracker().get(1).unwrap().plate_text.as_deref(), Some("AB1234"));
}

#[test]
fn unread_plate_still_persists_capture() {
    let store = Arc::new(MemoryStore::default());
    let mut p = CapturePipelineBuilder::new(store.clone())
        .recognizer(ScriptedRecognizer::new(vec![None]))
        .build();
    let notices = p.subscribe();
    let c = config();
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(frame()), 0, &c);
    p.on_detections(&d, W, H, Some(frame()), 100, &c);
    let job = p.on_detections(&d, W, H, Some(frame()), 200, &c).job().unwrap();
    let JobOutcome::Captured(m) = job.run().unwrap() else {
        panic!("capture expected");
    };
    assert!(m.plate_text.is_none());
    assert_eq!(store.capture_count(), 1);
    assert_eq!(notices.try_iter().count(), 2);
    assert!(p.highlights(200).is_empty());
}

#[test]
fn captures_are_capped() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let mut c = config();
    c.tracker.min_stable_frames = 1;
    c.tracker.cooldown_ms = 0;
    c.capture.global_throttle_ms = 0;
    c.capture.max_captures = 2;
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(frame()), 0, &c);
    for now in [100, 200, 300] {
        let job = p.on_detections(&d, W, H, Some(frame()), now, &c).job().unwrap();
        job.run().unwrap();
    }
    let timestamps: Vec<_> = p.captures().unwrap().iter().map(|m| m.timestamp).collect();
    assert_eq!(timestamps, vec![300, 200]);
}

#[test]
fn spawned_job_persists() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let c = config();
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(frame()), 0, &c);
    p.on_detections(&d, W, H, Some(frame()), 100, &c);
    let job = p.on_detections(&d, W, H, Some(frame()), 200, &c).job().unwrap();
    job.spawn().join().unwrap();
    assert_eq!(store.capture_count(), 1);
}

#[test]
fn storage_failure_is_reported_after_retries() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let notices = p.subscribe();
    let c = config();
    let d = [car(50.0, 100.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(frame()), 0, &c);
    p.on_detections(&d, W, H, Some(frame()), 100, &c);
    let job = p.on_detections(&d, W, H, Some(frame()), 200, &c).job().unwrap();
    store.fail_next_writes(3);
    let err = job.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Errors>(),
        Some(Errors::WriteFailed { attempts: 3, .. })
    ));
    let received = notices.try_iter().collect::<Vec<_>>();
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0], CaptureNotice::ScanAttempt { .. }));
}

#[test]
fn box_outside_of_the_analyzed_frame_is_skipped() {
    let store = Arc::new(MemoryStore::default());
    let mut p = pipeline(&store);
    let c = config();
    let small = FrameSnapshot::new(7, 0, RgbImage::new(64, 48));
    let d = [car(300.0, 200.0, 96.0, 72.0)];

    p.on_detections(&d, W, H, Some(small.clone()), 0, &c);
    p.on_detections(&d, W, H, Some(small.clone()), 100, &c);
    let job = p.on_detections(&d, W, H, Some(small.clone()), 200, &c).job().unwrap();
    assert_eq!(small.handles(), 2);
    assert_eq!(job.run().unwrap(), JobOutcome::Skipped);
    assert_eq!(small.handles(), 1);
    assert_eq!(store.capture_count(), 0);
}

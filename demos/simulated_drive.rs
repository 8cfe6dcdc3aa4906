use dashy::prelude::*;
use dashy::test_stuff::{
    BoxGen, FakeCodecResolver, FakeRecorderFactory, FakeSource, FakeSourceProvider,
    SceneDetector, ScriptedRecognizer,
};
use image::RgbImage;
use log::info;
use std::sync::Arc;
use std::time::Duration;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const STEP_MS: u64 = 100;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = DashcamConfig::default();
    let clock = ManualClock::new(1_700_000_000_000);
    let store = Arc::new(MemoryStore::new(8_000_000_000));
    let buffer = Arc::new(BufferManager::new(
        store.clone(),
        Arc::new(clock.clone()),
        config.retention.clone(),
    ));

    let mut engine = RecordingEngineBuilder::new(
        buffer.clone(),
        store.clone(),
        Arc::new(FakeRecorderFactory::new()),
        Arc::new(FakeSourceProvider::default()),
        Arc::new(FakeCodecResolver::new(Some("video/webm; codecs=vp9"))),
    )
    .clock(Arc::new(clock.clone()))
    .config(config.recording.clone())
    .build();
    let engine_events = engine.subscribe();

    let mut pipeline = CapturePipelineBuilder::new(store.clone())
        .recognizer(ScriptedRecognizer::always("KA 4711", 88.0))
        .build();
    let notices = pipeline.subscribe();

    // one car in front, one far away in the next lane
    let mut detection = DetectionLoop::new(SceneDetector::new(vec![
        BoxGen::new(260.0, 220.0, 110.0, 80.0, 1.0, 0.5),
        BoxGen::new(480.0, 200.0, 20.0, 16.0, 0.5, 0.1),
    ]));

    let source = FakeSource::new("front-camera");
    engine.start(Arc::new(source.clone()))?;

    let mut jobs = Vec::default();
    for step in 0..1_200 {
        let now = clock.advance(STEP_MS);
        engine.poll();

        if step == 400 {
            source.end();
        }

        detection.schedule(RgbImage::new(WIDTH, HEIGHT), RegionParams::default(), now);
        if let Some(update) = detection.wait(Duration::from_secs(1), now, &config.detection) {
            let outcome = pipeline.on_detections(
                &update.detections,
                WIDTH,
                HEIGHT,
                Some(update.frame),
                now,
                &config,
            );
            if let Some(job) = outcome.job() {
                jobs.push(job.spawn());
            }
        }

        for event in engine_events.try_iter() {
            if !matches!(event, EngineEvent::Timer { .. }) {
                info!("Engine: {:?}", event);
            }
        }
        for notice in notices.try_iter() {
            match notice {
                CaptureNotice::ScanAttempt { track_id, .. } => info!("Scanning track {}", track_id),
                other => info!("Capture: {:?}", other),
            }
        }
    }

    for job in jobs {
        let _ = job.join();
    }
    engine.stop()?;

    let clip = buffer.save_clip(60_000, ClipTrigger::Manual)?;
    eprintln!("Saved clip: {} segment(s), {} bytes", clip.segment_ids.len(), clip.size);
    eprintln!("Storage: {:#?}", buffer.stats()?);
    eprintln!("Captures: {:#?}", pipeline.captures()?);
    Ok(())
}

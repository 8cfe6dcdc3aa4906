use crate::capture::recognition::{RecognizedText, TextRecognizer};
use crate::detection::{Detection, Detector, RegionParams};
use crate::recording::media::{
    CodecResolver, InputSource, Recorder, RecorderFactory, RecorderSettings, SourceProvider,
    TrackState,
};
use crate::storage::VideoQualityPreset;
use crate::utils::bbox::BoundingBox;
use anyhow::{anyhow, Result};
use image::{GrayImage, RgbImage};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Recognizer replaying prepared answers, `None` once they run out
///
pub struct ScriptedRecognizer {
    answers: Mutex<VecDeque<Option<RecognizedText>>>,
    repeat: Option<RecognizedText>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new(answers: Vec<Option<RecognizedText>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            repeat: None,
            calls: Arc::default(),
        }
    }

    /// Recognizes the same text on every call
    ///
    pub fn always(text: &str, confidence: f32) -> Self {
        Self {
            answers: Mutex::default(),
            repeat: Some(RecognizedText {
                text: text.to_string(),
                confidence,
            }),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, _image: &GrayImage) -> Result<Option<RecognizedText>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(answer) = self.answers.lock().unwrap().pop_front() {
            return Ok(answer);
        }
        Ok(self.repeat.clone())
    }
}

/// Vehicle box drifting randomly from frame to frame
///
pub struct BoxGen {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    gen: StdRng,
    dist_pos: Uniform<f32>,
    dist_box: Uniform<f32>,
}

impl BoxGen {
    pub fn new(x: f32, y: f32, width: f32, height: f32, pos_drift: f32, box_drift: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            gen: StdRng::from_entropy(),
            dist_pos: Uniform::new_inclusive(-pos_drift, pos_drift),
            dist_box: Uniform::new_inclusive(-box_drift, box_drift),
        }
    }
}

impl Iterator for BoxGen {
    type Item = BoundingBox;

    fn next(&mut self) -> Option<Self::Item> {
        self.x += self.gen.sample(self.dist_pos);
        self.y += self.gen.sample(self.dist_pos);
        self.width = (self.width + self.gen.sample(self.dist_box)).max(1.0);
        self.height = (self.height + self.gen.sample(self.dist_box)).max(1.0);
        Some(BoundingBox::new(self.x, self.y, self.width, self.height))
    }
}

/// Detector reporting one car per box generator, each call advances all of them
///
pub struct SceneDetector {
    vehicles: Mutex<Vec<BoxGen>>,
}

impl SceneDetector {
    pub fn new(vehicles: Vec<BoxGen>) -> Self {
        Self {
            vehicles: Mutex::new(vehicles),
        }
    }
}

impl Detector for SceneDetector {
    fn detect(&self, _frame: &RgbImage, _region: &RegionParams) -> Result<Vec<Detection>> {
        let mut vehicles = self.vehicles.lock().unwrap();
        Ok(vehicles
            .iter_mut()
            .filter_map(|g| g.next())
            .map(|bbox| Detection::new("car", 0.9, bbox))
            .collect())
    }
}

/// Input source whose track can be ended on demand
///
#[derive(Clone)]
pub struct FakeSource {
    id: String,
    ended: Arc<AtomicBool>,
    has_video: bool,
}

impl FakeSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ended: Arc::default(),
            has_video: true,
        }
    }

    pub fn without_video(id: &str) -> Self {
        Self {
            has_video: false,
            ..Self::new(id)
        }
    }

    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

impl InputSource for FakeSource {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track_state(&self) -> TrackState {
        if !self.has_video {
            TrackState::Missing
        } else if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }
}

/// Hands out `camera-1`, `camera-2`, ... and can be told to refuse
///
#[derive(Default)]
pub struct FakeSourceProvider {
    acquired: AtomicUsize,
    failures: AtomicUsize,
}

impl FakeSourceProvider {
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl SourceProvider for FakeSourceProvider {
    fn acquire(&self, _preset: &VideoQualityPreset) -> Result<Arc<dyn InputSource>> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("Permission denied"));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(FakeSource::new(&format!("camera-{}", n))))
    }
}

#[derive(Default)]
struct RecorderLog {
    created: Mutex<Vec<(String, RecorderSettings)>>,
    finished: AtomicUsize,
    fail_create: AtomicBool,
    fail_flush: AtomicBool,
    chunk_size: AtomicUsize,
    tail_size: AtomicUsize,
}

/// Recorder factory producing fixed-size chunks, shared state is visible through clones
///
#[derive(Clone)]
pub struct FakeRecorderFactory {
    log: Arc<RecorderLog>,
}

impl Default for FakeRecorderFactory {
    fn default() -> Self {
        let log = RecorderLog::default();
        log.chunk_size.store(1000, Ordering::SeqCst);
        Self { log: Arc::new(log) }
    }
}

impl FakeRecorderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// source id and settings of every recorder created so far
    pub fn created(&self) -> Vec<(String, RecorderSettings)> {
        self.log.created.lock().unwrap().clone()
    }

    pub fn finished(&self) -> usize {
        self.log.finished.load(Ordering::SeqCst)
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.log.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_flush(&self, fail: bool) {
        self.log.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn set_chunk_size(&self, size: usize) {
        self.log.chunk_size.store(size, Ordering::SeqCst);
    }

    pub fn set_tail_size(&self, size: usize) {
        self.log.tail_size.store(size, Ordering::SeqCst);
    }
}

struct FakeRecorder {
    log: Arc<RecorderLog>,
}

impl Recorder for FakeRecorder {
    fn flush(&mut self) -> Result<Vec<u8>> {
        if self.log.fail_flush.load(Ordering::SeqCst) {
            return Err(anyhow!("Encoder crashed"));
        }
        Ok(vec![0; self.log.chunk_size.load(Ordering::SeqCst)])
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        self.log.finished.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0; self.log.tail_size.load(Ordering::SeqCst)])
    }
}

impl RecorderFactory for FakeRecorderFactory {
    fn create(
        &self,
        source: &Arc<dyn InputSource>,
        settings: &RecorderSettings,
    ) -> Result<Box<dyn Recorder>> {
        if self.log.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("Recorder not supported"));
        }
        self.log
            .created
            .lock()
            .unwrap()
            .push((source.id(), settings.clone()));
        Ok(Box::new(FakeRecorder {
            log: self.log.clone(),
        }))
    }
}

/// Codec resolver with a fixed answer and a call counter
///
#[derive(Default)]
pub struct FakeCodecResolver {
    codec: Option<String>,
    calls: AtomicUsize,
}

impl FakeCodecResolver {
    pub fn new(codec: Option<&str>) -> Self {
        Self {
            codec: codec.map(|c| c.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CodecResolver for FakeCodecResolver {
    fn resolve(&self) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.codec.clone()
    }
}

use crate::capture::highlight::{Highlight, HighlightBoard};
use crate::capture::job::{CaptureJob, PlateReport};
use crate::capture::recognition::{PlateReader, TextRecognizer};
use crate::config::DashcamConfig;
use crate::detection::Detection;
use crate::notify::EventBus;
use crate::storage::{CaptureMetadata, CaptureStore};
use crate::trackers::vehicle::{VehicleDebugInfo, VehicleTracker};
use crate::utils::frame::FrameSnapshot;
use anyhow::Result;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transient overlays for recognized plates
///
pub mod highlight;
/// Capture attempt execution
///
pub mod job;
/// Plate text recognition with a bounded queue
///
pub mod recognition;

#[cfg(test)]
mod pipeline_tests;

/// User-facing notifications of the capture pipeline
///
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureNotice {
    /// a vehicle crop is being scanned, emitted before recognition
    ScanAttempt {
        track_id: u64,
        timestamp: u64,
        vehicle_class: String,
        vehicle_image: Vec<u8>,
    },
    /// the capture is persisted
    Captured(CaptureMetadata),
    PlateRecognized {
        track_id: u64,
        text: String,
        confidence: f32,
    },
}

/// Decision taken for one detection update
///
pub enum CycleOutcome<S: CaptureStore + 'static> {
    Disabled,
    /// no eligible vehicle
    Idle,
    /// a vehicle is eligible but the previous attempt is too recent
    Throttled,
    /// a vehicle is eligible but no analyzed frame exists; the throttle window is consumed
    NoFrame,
    Scheduled(CaptureJob<S>),
}

impl<S: CaptureStore + 'static> CycleOutcome<S> {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, CycleOutcome::Scheduled(_))
    }

    pub fn job(self) -> Option<CaptureJob<S>> {
        match self {
            CycleOutcome::Scheduled(job) => Some(job),
            _ => None,
        }
    }
}

impl<S: CaptureStore + 'static> std::fmt::Debug for CycleOutcome<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Disabled => write!(f, "Disabled"),
            CycleOutcome::Idle => write!(f, "Idle"),
            CycleOutcome::Throttled => write!(f, "Throttled"),
            CycleOutcome::NoFrame => write!(f, "NoFrame"),
            CycleOutcome::Scheduled(job) => write!(f, "Scheduled(track {})", job.track_id()),
        }
    }
}

/// Builder for [`CapturePipeline`]
///
pub struct CapturePipelineBuilder<S: CaptureStore + 'static> {
    store: Arc<S>,
    reader: Option<PlateReader>,
    notices: Option<Arc<EventBus<CaptureNotice>>>,
    enabled: bool,
}

impl<S: CaptureStore + 'static> CapturePipelineBuilder<S> {
    /// Creates a new builder
    ///
    /// # Parameters
    /// * `store` - where captures are persisted
    ///
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            reader: None,
            notices: None,
            enabled: true,
        }
    }

    /// Enables plate recognition with the backend
    ///
    pub fn recognizer<R: TextRecognizer + 'static>(mut self, recognizer: R) -> Self {
        assert!(
            self.reader.is_none(),
            "The method `recognizer` must be called once."
        );
        self.reader = Some(PlateReader::new(recognizer));
        self
    }

    /// Shares an existing notice bus
    ///
    pub fn notices(mut self, notices: Arc<EventBus<CaptureNotice>>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Initial state, enabled by default
    ///
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> CapturePipeline<S> {
        let (plate_sender, plate_receiver) = unbounded();
        CapturePipeline {
            tracker: VehicleTracker::new(),
            store: self.store,
            reader: self.reader,
            notices: self.notices.unwrap_or_default(),
            highlights: Arc::new(HighlightBoard::new()),
            plate_sender,
            plate_receiver,
            abort: Arc::new(AtomicBool::new(!self.enabled)),
            enabled: self.enabled,
            last_attempt_ms: None,
            debug: Vec::default(),
        }
    }
}

/// Turns per-frame detections into rate-limited capture attempts.
///
/// [`CapturePipeline::on_detections`] is the only place where tracker state changes.
/// The global throttle is consumed at decision time, before the returned job does any
/// work, so two cycles can never both pass it. Jobs report plate readings back through
/// a channel drained at the start of the next cycle.
///
pub struct CapturePipeline<S: CaptureStore + 'static> {
    tracker: VehicleTracker,
    store: Arc<S>,
    reader: Option<PlateReader>,
    notices: Arc<EventBus<CaptureNotice>>,
    highlights: Arc<HighlightBoard>,
    plate_sender: Sender<PlateReport>,
    plate_receiver: Receiver<PlateReport>,
    abort: Arc<AtomicBool>,
    enabled: bool,
    last_attempt_ms: Option<u64>,
    debug: Vec<VehicleDebugInfo>,
}

impl<S: CaptureStore + 'static> CapturePipeline<S> {
    /// Handles one detection update.
    ///
    /// # Parameters
    /// * `detections` - detector output for the frame
    /// * `frame_width`, `frame_height` - source frame size in pixels
    /// * `frame` - analyzed frame snapshot, if one is materialized
    /// * `now_ms` - decision time
    /// * `config` - configuration snapshot
    ///
    pub fn on_detections(
        &mut self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
        frame: Option<FrameSnapshot>,
        now_ms: u64,
        config: &DashcamConfig,
    ) -> CycleOutcome<S> {
        if !self.enabled {
            return CycleOutcome::Disabled;
        }
        if frame_width == 0 || frame_height == 0 {
            return CycleOutcome::Idle;
        }

        for report in self.plate_receiver.try_iter() {
            self.tracker.set_plate_text(report.track_id, &report.text);
        }

        let eligible = self
            .tracker
            .update(detections, frame_width, frame_height, now_ms, &config.tracker);
        self.debug = self.tracker.debug_info(now_ms, config.tracker.cooldown_ms);

        let Some(candidate) = eligible.into_iter().next() else {
            return CycleOutcome::Idle;
        };

        if let Some(last) = self.last_attempt_ms {
            if now_ms.saturating_sub(last) < config.capture.global_throttle_ms {
                return CycleOutcome::Throttled;
            }
        }
        self.last_attempt_ms = Some(now_ms);

        let Some(frame) = frame else {
            debug!("Track {} is eligible but no frame is available", candidate.tracked.id);
            return CycleOutcome::NoFrame;
        };

        let track_id = candidate.tracked.id;
        info!(
            "Capturing track {} ({}) at {:?}",
            track_id, candidate.tracked.class, candidate.detection.bbox
        );
        self.tracker.mark_capture_attempt(track_id, now_ms);

        CycleOutcome::Scheduled(CaptureJob {
            track_id,
            detection: candidate.detection,
            frame,
            timestamp: now_ms,
            capture: config.capture.clone(),
            write_retry: config.retention.write_retry.clone(),
            store: self.store.clone(),
            reader: self.reader.clone(),
            notices: self.notices.clone(),
            highlights: self.highlights.clone(),
            plates: self.plate_sender.clone(),
            abort: self.abort.clone(),
        })
    }

    /// Starts a fresh generation with an empty tracker
    ///
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        let (plate_sender, plate_receiver) = unbounded();
        self.plate_sender = plate_sender;
        self.plate_receiver = plate_receiver;
        self.abort = Arc::new(AtomicBool::new(false));
        self.tracker = VehicleTracker::new();
        self.debug.clear();
        self.enabled = true;
        info!("Capture pipeline enabled");
    }

    /// Aborts every job already scheduled; their remaining side effects are skipped
    ///
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.abort.store(true, Ordering::SeqCst);
        self.highlights.clear();
        self.enabled = false;
        info!("Capture pipeline disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn subscribe(&self) -> Receiver<CaptureNotice> {
        self.notices.subscribe()
    }

    pub fn highlights(&self, now_ms: u64) -> Vec<Highlight> {
        self.highlights.active(now_ms)
    }

    /// Tracker view taken right after the last update
    ///
    pub fn debug_info(&self) -> &[VehicleDebugInfo] {
        &self.debug
    }

    pub fn tracker(&self) -> &VehicleTracker {
        &self.tracker
    }

    /// Stored captures without their images, newest first
    ///
    pub fn captures(&self) -> Result<Vec<CaptureMetadata>> {
        let mut captures = self
            .store
            .all_captures()?
            .iter()
            .map(CaptureMetadata::from)
            .collect::<Vec<_>>();
        captures.reverse();
        Ok(captures)
    }
}

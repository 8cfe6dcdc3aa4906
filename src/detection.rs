use crate::config::DetectionConfig;
use crate::utils::bbox::BoundingBox;
use crate::utils::frame::{FrameSlot, FrameSnapshot};
use anyhow::{anyhow, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Single detector output
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: &str, score: f32, bbox: BoundingBox) -> Self {
        Self {
            class: class.to_string(),
            score,
            bbox,
        }
    }
}

/// Part of the frame handed to the detector, fractions of the frame size
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionParams {
    pub crop_top: f32,
    pub crop_bottom: f32,
    pub crop_center_x: f32,
    /// use the full frame width instead of a square crop around `crop_center_x`
    pub full_width: bool,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            crop_top: 0.0,
            crop_bottom: 1.0,
            crop_center_x: 0.5,
            full_width: false,
        }
    }
}

/// Object detection model.
///
/// Boxes are expected in the coordinate space of the full frame that was passed in.
///
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &RgbImage, region: &RegionParams) -> Result<Vec<Detection>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DetectionStats {
    /// finished inferences during the last second
    pub fps: usize,
    pub inference_ms: u64,
    pub detection_count: usize,
}

/// Result of one finished inference
///
#[derive(Debug, Clone)]
pub struct DetectionUpdate {
    pub detections: Vec<Detection>,
    pub frame: FrameSnapshot,
}

struct Inference {
    started_ms: u64,
    elapsed: Duration,
    frame: RgbImage,
    detections: Result<Vec<Detection>>,
}

/// Runs the detector off the caller's thread with at most one inference in flight.
///
/// [`DetectionLoop::schedule`] refuses new work while the previous inference has not
/// been collected with [`DetectionLoop::poll`] or [`DetectionLoop::wait`]. A collected
/// result replaces the analyzed-frame snapshot, releasing the previous one.
///
pub struct DetectionLoop<D: Detector + 'static> {
    detector: Arc<D>,
    busy: Arc<AtomicBool>,
    sender: Sender<Inference>,
    receiver: Receiver<Inference>,
    frames: FrameSlot,
    frame_times: VecDeque<u64>,
    stats: DetectionStats,
    sequence: u64,
}

impl<D: Detector + 'static> DetectionLoop<D> {
    pub fn new(detector: D) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            detector: Arc::new(detector),
            busy: Arc::new(AtomicBool::new(false)),
            sender,
            receiver,
            frames: FrameSlot::new(),
            frame_times: VecDeque::default(),
            stats: DetectionStats::default(),
            sequence: 0,
        }
    }

    /// Starts an inference on `frame` unless one is still outstanding.
    ///
    /// Returns `false` when the frame was skipped.
    ///
    pub fn schedule(&mut self, frame: RgbImage, region: RegionParams, now_ms: u64) -> bool {
        if frame.width() == 0 || frame.height() == 0 {
            return false;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let detector = self.detector.clone();
        let sender = self.sender.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let detections =
                panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&frame, &region)))
                    .unwrap_or_else(|_| Err(anyhow!("Detector panicked")));
            let res = sender.send(Inference {
                started_ms: now_ms,
                elapsed: started.elapsed(),
                frame,
                detections,
            });
            if res.is_err() {
                debug!("Detection loop is gone, inference result dropped");
            }
        });
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Collects a finished inference without blocking
    ///
    pub fn poll(&mut self, now_ms: u64, config: &DetectionConfig) -> Option<DetectionUpdate> {
        let inference = self.receiver.try_recv().ok()?;
        self.complete(inference, now_ms, config)
    }

    /// Waits up to `timeout` for the outstanding inference
    ///
    pub fn wait(
        &mut self,
        timeout: Duration,
        now_ms: u64,
        config: &DetectionConfig,
    ) -> Option<DetectionUpdate> {
        match self.receiver.recv_timeout(timeout) {
            Ok(inference) => self.complete(inference, now_ms, config),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn complete(
        &mut self,
        inference: Inference,
        now_ms: u64,
        config: &DetectionConfig,
    ) -> Option<DetectionUpdate> {
        self.busy.store(false, Ordering::SeqCst);

        let mut detections = match inference.detections {
            Ok(d) => d,
            Err(e) => {
                warn!("Inference failed: {}", e);
                return None;
            }
        };
        detections.retain(|d| d.score >= config.min_confidence);
        detections.truncate(config.max_detections);

        self.sequence += 1;
        let frame = FrameSnapshot::new(self.sequence, inference.started_ms, inference.frame);
        self.frames.replace(frame.clone());

        self.frame_times.push_back(now_ms);
        while let Some(t) = self.frame_times.front() {
            if now_ms.saturating_sub(*t) > 1_000 {
                self.frame_times.pop_front();
            } else {
                break;
            }
        }
        self.stats = DetectionStats {
            fps: self.frame_times.len(),
            inference_ms: inference.elapsed.as_millis() as u64,
            detection_count: detections.len(),
        };

        Some(DetectionUpdate { detections, frame })
    }

    /// Latest analyzed frame
    ///
    pub fn frame(&self) -> Option<FrameSnapshot> {
        self.frames.current()
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }

    /// Drops the analyzed frame, e.g. when detection is disabled
    ///
    pub fn release_frame(&mut self) {
        self.frames.clear();
    }
}

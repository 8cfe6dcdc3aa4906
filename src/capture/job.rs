use crate::capture::highlight::HighlightBoard;
use crate::capture::recognition::PlateReader;
use crate::capture::CaptureNotice;
use crate::config::{CaptureConfig, WriteRetryConfig};
use crate::detection::Detection;
use crate::notify::EventBus;
use crate::storage::{Capture, CaptureMetadata, CaptureStore};
use crate::utils::frame::FrameSnapshot;
use crate::utils::jpeg::{crop, encode_rgb};
use crate::utils::retry::retry_write;
use crate::Errors;
use anyhow::Result;
use crossbeam::channel::Sender;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Plate text read for a track, applied to the tracker on the next cycle
///
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlateReport {
    pub track_id: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// the pipeline was disabled while the job was running
    Aborted,
    /// nothing to crop
    Skipped,
    Captured(CaptureMetadata),
}

/// One scheduled capture attempt.
///
/// Owns its frame handle until the crop is done. Every side effect is preceded by a
/// check of the abort flag of the pipeline generation that scheduled the job.
///
pub struct CaptureJob<S: CaptureStore + 'static> {
    pub(crate) track_id: u64,
    pub(crate) detection: Detection,
    pub(crate) frame: FrameSnapshot,
    pub(crate) timestamp: u64,
    pub(crate) capture: CaptureConfig,
    pub(crate) write_retry: WriteRetryConfig,
    pub(crate) store: Arc<S>,
    pub(crate) reader: Option<PlateReader>,
    pub(crate) notices: Arc<EventBus<CaptureNotice>>,
    pub(crate) highlights: Arc<HighlightBoard>,
    pub(crate) plates: Sender<PlateReport>,
    pub(crate) abort: Arc<AtomicBool>,
}

impl<S: CaptureStore + 'static> CaptureJob<S> {
    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Executes the attempt on the current thread
    ///
    pub fn run(self) -> Result<JobOutcome> {
        let bbox = self.detection.bbox;
        let vehicle = match crop(self.frame.image(), &bbox) {
            Ok(v) => v,
            Err(e) if e.downcast_ref::<Errors>() == Some(&Errors::EmptyCrop) => {
                debug!("Track {} box {:?} is outside of the frame", self.track_id, bbox);
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        let CaptureJob {
            track_id,
            detection,
            frame,
            timestamp,
            capture,
            write_retry,
            store,
            reader,
            notices,
            highlights,
            plates,
            abort,
        } = self;
        drop(frame);
        let aborted = || abort.load(Ordering::SeqCst);

        let vehicle_image = encode_rgb(&vehicle, capture.jpeg_quality)?;
        if aborted() {
            return Ok(JobOutcome::Aborted);
        }
        notices.emit(CaptureNotice::ScanAttempt {
            track_id,
            timestamp,
            vehicle_class: detection.class.clone(),
            vehicle_image: vehicle_image.clone(),
        });

        let reading = reader
            .as_ref()
            .and_then(|r| r.read(&vehicle, &capture.recognition));
        if aborted() {
            return Ok(JobOutcome::Aborted);
        }
        match &reading {
            Some(r) => info!(
                "Plate read for track {}: {} ({:.0}% confidence)",
                track_id, r.text, r.confidence
            ),
            None => debug!("No plate found for track {}", track_id),
        }

        let record = Capture {
            id: Uuid::new_v4().to_string(),
            timestamp,
            vehicle_image,
            plate_region: reading.as_ref().map(|r| r.region_image.clone()),
            plate_text: reading.as_ref().map(|r| r.text.clone()),
            ocr_confidence: reading.as_ref().map(|r| r.confidence),
            vehicle_class: detection.class.clone(),
            detection_score: detection.score,
            bbox,
        };
        let metadata = CaptureMetadata::from(&record);
        retry_write(&write_retry, "capture", || store.add_capture(record.clone()))?;
        prune_captures(store.as_ref(), capture.max_captures)?;

        if aborted() {
            return Ok(JobOutcome::Aborted);
        }
        notices.emit(CaptureNotice::Captured(metadata.clone()));

        if let Some(r) = reading {
            if plates
                .send(PlateReport {
                    track_id,
                    text: r.text.clone(),
                })
                .is_err()
            {
                debug!("Pipeline generation is gone, plate text for track {} dropped", track_id);
            }
            highlights.add(track_id, bbox, &r.text, timestamp, capture.flash_duration_ms);
            notices.emit(CaptureNotice::PlateRecognized {
                track_id,
                text: r.text,
                confidence: r.confidence,
            });
        }

        Ok(JobOutcome::Captured(metadata))
    }

    /// Executes the attempt on a background thread, failures are logged
    ///
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || {
            let track_id = self.track_id;
            if self.aborted() {
                debug!("Capture of track {} aborted before start", track_id);
                return;
            }
            match self.run() {
                Ok(JobOutcome::Captured(m)) => debug!("Capture {} stored", m.id),
                Ok(outcome) => debug!("Capture of track {} ended: {:?}", track_id, outcome),
                Err(e) => error!("Capture of track {} failed: {}", track_id, e),
            }
        })
    }
}

/// Deletes the oldest captures beyond `max_captures`, returns the number deleted
///
pub fn prune_captures<S: CaptureStore + ?Sized>(store: &S, max_captures: usize) -> Result<usize> {
    let captures = store.all_captures()?;
    let excess = captures.len().saturating_sub(max_captures);
    for c in captures.iter().take(excess) {
        store.delete_capture(&c.id)?;
    }
    if excess > 0 {
        debug!("Pruned {} oldest capture(s)", excess);
    }
    Ok(excess)
}

use crate::config::RecognitionConfig;
use crate::utils::jpeg::{encode_gray, plate_region};
use anyhow::Result;
use image::{GrayImage, RgbImage};
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Raw recognizer output
///
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    /// 0-100
    pub confidence: f32,
}

/// Text recognition backend (OCR engine).
///
/// Implementations are expected to be restricted to a single line of plate characters.
///
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage) -> Result<Option<RecognizedText>>;
}

/// Accepted plate reading
///
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    /// `[A-Z0-9]` only
    pub text: String,
    pub confidence: f32,
    /// preprocessed region handed to the recognizer, JPEG
    pub region_image: Vec<u8>,
}

/// Bounded counter of recognitions in flight.
///
/// Acquisition never blocks: when the limit is reached the request is refused.
///
#[derive(Debug, Clone, Default)]
pub struct RecognitionQueue {
    in_flight: Arc<AtomicUsize>,
}

/// Slot in the [`RecognitionQueue`], released on drop
///
#[derive(Debug)]
pub struct RecognitionPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for RecognitionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RecognitionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, depth: usize) -> Option<RecognitionPermit> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < depth).then_some(n + 1)
            })
            .ok()
            .map(|_| RecognitionPermit {
                in_flight: self.in_flight.clone(),
            })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Reads license plates from vehicle crops.
///
/// Clones share the recognizer and the queue.
///
#[derive(Clone)]
pub struct PlateReader {
    recognizer: Arc<dyn TextRecognizer>,
    queue: RecognitionQueue,
}

impl PlateReader {
    pub fn new<R: TextRecognizer + 'static>(recognizer: R) -> Self {
        Self::from_shared(Arc::new(recognizer))
    }

    pub fn from_shared(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            recognizer,
            queue: RecognitionQueue::new(),
        }
    }

    pub fn queue(&self) -> &RecognitionQueue {
        &self.queue
    }

    /// Tries to read the plate of a vehicle crop.
    ///
    /// `None` covers every non-reading: recognition disabled, queue full, recognizer
    /// failure, text below the confidence or length thresholds.
    ///
    /// # Parameters
    /// * `vehicle` - vehicle crop
    /// * `config` - thresholds snapshot
    ///
    pub fn read(&self, vehicle: &RgbImage, config: &RecognitionConfig) -> Option<PlateReading> {
        if !config.enabled {
            return None;
        }
        let Some(_permit) = self.queue.try_acquire(config.queue_depth) else {
            debug!(
                "Recognition queue is full ({} in flight), skipped",
                self.queue.in_flight()
            );
            return None;
        };

        let region = match plate_region(vehicle, config.plate_region_fraction) {
            Ok(r) => r,
            Err(e) => {
                debug!("No plate region: {}", e);
                return None;
            }
        };

        let raw = match self.recognizer.recognize(&region) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Text recognition failed: {}", e);
                return None;
            }
        };

        let text = normalize_plate(&raw.text);
        if raw.confidence < config.min_confidence || text.len() < config.min_text_length {
            debug!(
                "Plate candidate '{}' rejected ({:.0}% confidence)",
                text, raw.confidence
            );
            return None;
        }

        match encode_gray(&region, config.region_jpeg_quality) {
            Ok(region_image) => Some(PlateReading {
                text,
                confidence: raw.confidence,
                region_image,
            }),
            Err(e) => {
                warn!("Plate region encoding failed: {}", e);
                None
            }
        }
    }
}

/// Keeps plate characters only
///
pub fn normalize_plate(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

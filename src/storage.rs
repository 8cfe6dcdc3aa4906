use crate::utils::bbox::BoundingBox;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// In-memory ordered blob store
///
pub mod memory;

/// Key of the singleton session record
pub const SESSION_KEY: &str = "current";

/// Slice of the live recording flushed by the recording engine
///
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSegment {
    pub id: String,
    pub timestamp: u64,
    pub size: usize,
    pub payload: Vec<u8>,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipTrigger {
    Manual,
    Accelerometer,
}

/// Permanently archived part of the rolling buffer
///
#[derive(Debug, Clone, PartialEq)]
pub struct SavedClip {
    pub id: String,
    pub timestamp: u64,
    pub duration_ms: u64,
    pub segment_ids: Vec<String>,
    pub trigger: ClipTrigger,
    pub size: usize,
    pub payload: Vec<u8>,
}

/// Secondary capture artifact, immutable once created
///
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub id: String,
    pub timestamp: u64,
    pub vehicle_image: Vec<u8>,
    pub plate_region: Option<Vec<u8>>,
    pub plate_text: Option<String>,
    pub ocr_confidence: Option<f32>,
    pub vehicle_class: String,
    pub detection_score: f32,
    pub bbox: BoundingBox,
}

/// Blob-free projection of a [`Capture`] surfaced to the UI
///
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureMetadata {
    pub id: String,
    pub timestamp: u64,
    pub plate_text: Option<String>,
    pub ocr_confidence: Option<f32>,
    pub vehicle_class: String,
    pub detection_score: f32,
    pub bbox: BoundingBox,
}

impl From<&Capture> for CaptureMetadata {
    fn from(c: &Capture) -> Self {
        CaptureMetadata {
            id: c.id.clone(),
            timestamp: c.timestamp,
            plate_text: c.plate_text.clone(),
            ocr_confidence: c.ocr_confidence,
            vehicle_class: c.vehicle_class.clone(),
            detection_score: c.detection_score,
            bbox: c.bbox,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoQualityPreset {
    pub width: u32,
    pub height: u32,
    /// bits per second
    pub bitrate: u32,
    pub label: &'static str,
}

impl VideoQuality {
    pub fn preset(&self) -> VideoQualityPreset {
        match self {
            VideoQuality::Low => VideoQualityPreset {
                width: 854,
                height: 480,
                bitrate: 1_000_000,
                label: "480p",
            },
            VideoQuality::Medium => VideoQualityPreset {
                width: 1280,
                height: 720,
                bitrate: 2_500_000,
                label: "720p",
            },
            VideoQuality::High => VideoQualityPreset {
                width: 1920,
                height: 1080,
                bitrate: 5_000_000,
                label: "1080p",
            },
        }
    }
}

/// Record of the in-progress recording, used for crash detection
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub recording: bool,
    pub start_time: u64,
    pub last_chunk_time: u64,
    pub codec: String,
    pub quality: VideoQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageEstimate {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl StorageEstimate {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self {
            used_bytes,
            total_bytes,
        }
    }

    /// Used share of the quota in percent, 0 when the quota is unknown
    ///
    pub fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            self.used_bytes as f64 * 100.0 / self.total_bytes as f64
        } else {
            0.0
        }
    }

    pub fn available_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageWarningLevel {
    #[default]
    Ok,
    Warning,
    Critical,
    Full,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StorageStats {
    pub buffer_segments: usize,
    pub buffer_size_bytes: u64,
    pub buffer_duration_ms: u64,
    pub saved_clips: usize,
    pub saved_size_bytes: u64,
    pub quota_usage_bytes: u64,
    pub quota_total_bytes: u64,
    pub quota_percent: f64,
    pub warning_level: StorageWarningLevel,
}

/// Rolling buffer segments keyed by id and indexed by timestamp and sequence.
///
/// Deleting an unknown id is a no-op.
///
pub trait SegmentStore: Send + Sync {
    fn add_segment(&self, segment: BufferSegment) -> Result<()>;
    fn delete_segment(&self, id: &str) -> Result<()>;
    /// segments with `timestamp < before`, oldest first
    fn segments_before(&self, before: u64) -> Result<Vec<BufferSegment>>;
    /// all segments ordered by sequence number
    fn all_segments(&self) -> Result<Vec<BufferSegment>>;
}

pub trait SavedClipStore: Send + Sync {
    fn add_saved_clip(&self, clip: SavedClip) -> Result<()>;
    fn delete_saved_clip(&self, id: &str) -> Result<()>;
    fn all_saved_clips(&self) -> Result<Vec<SavedClip>>;
}

pub trait CaptureStore: Send + Sync {
    fn add_capture(&self, capture: Capture) -> Result<()>;
    fn delete_capture(&self, id: &str) -> Result<()>;
    /// oldest first, captures sharing a timestamp in insertion order
    fn all_captures(&self) -> Result<Vec<Capture>>;
}

/// Singleton record stored under [`SESSION_KEY`]
///
pub trait SessionStore: Send + Sync {
    fn get_session(&self) -> Result<Option<SessionState>>;
    fn put_session(&self, state: SessionState) -> Result<()>;
    fn clear_session(&self) -> Result<()>;
}

pub trait QuotaEstimator: Send + Sync {
    fn estimate(&self) -> Result<StorageEstimate>;
}

/// Everything the rolling buffer needs from the durable store
///
pub trait BufferStore: SegmentStore + SavedClipStore + QuotaEstimator {}

impl<T> BufferStore for T where T: SegmentStore + SavedClipStore + QuotaEstimator {}

#[cfg(test)]
mod tests {
    use crate::storage::{StorageEstimate, VideoQuality};

    #[test]
    fn estimate_percent() {
        assert_eq!(StorageEstimate::new(82, 100).percent(), 82.0);
        assert_eq!(StorageEstimate::new(82, 0).percent(), 0.0);
        assert_eq!(StorageEstimate::new(120, 100).available_bytes(), 0);
    }

    #[test]
    fn quality_presets() {
        assert_eq!(VideoQuality::default(), VideoQuality::Medium);
        assert_eq!(VideoQuality::High.preset().label, "1080p");
        assert_eq!(VideoQuality::Low.preset().bitrate, 1_000_000);
    }
}

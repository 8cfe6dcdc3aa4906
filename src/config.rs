use crate::storage::VideoQuality;
use crate::Errors;
use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Vehicle classes eligible for capture (bicycles excluded)
pub const DEFAULT_VEHICLE_CLASSES: [&str; 4] = ["car", "truck", "bus", "motorcycle"];

pub const DEFAULT_RETENTION_WINDOW_MS: u64 = 2 * 60 * 60 * 1000;

/// Object tracker options
///
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// class labels the tracker accepts, everything else is ignored
    pub classes: Vec<String>,
    /// minimal IoU for a detection to continue an existing track
    pub iou_threshold: f32,
    /// a track unseen for longer than this is dropped
    pub stale_timeout_ms: u64,
    pub min_area_fraction: f32,
    pub min_width_fraction: f32,
    /// consecutive large frames needed before a capture
    pub min_stable_frames: u32,
    /// per-vehicle pause after a capture attempt
    pub cooldown_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            classes: DEFAULT_VEHICLE_CLASSES.iter().map(|c| c.to_string()).collect(),
            iou_threshold: 0.4,
            stale_timeout_ms: 2_000,
            min_area_fraction: 0.0,
            min_width_fraction: 0.05,
            min_stable_frames: 3,
            cooldown_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub enabled: bool,
    /// recognizer confidence, 0-100
    pub min_confidence: f32,
    pub min_text_length: usize,
    /// recognitions allowed in flight, further requests are dropped
    pub queue_depth: usize,
    /// share of the vehicle crop height, from the bottom, handed to the recognizer
    pub plate_region_fraction: f32,
    pub region_jpeg_quality: u8,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 60.0,
            min_text_length: 4,
            queue_depth: 3,
            plate_region_fraction: 0.6,
            region_jpeg_quality: 90,
        }
    }
}

/// Secondary capture options
///
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// minimal pause between any two capture attempts
    pub global_throttle_ms: u64,
    /// stored captures above this count are pruned, oldest first
    pub max_captures: usize,
    pub flash_duration_ms: u64,
    pub jpeg_quality: u8,
    pub recognition: RecognitionConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            global_throttle_ms: 2_000,
            max_captures: 200,
            flash_duration_ms: 1_000,
            jpeg_quality: 85,
            recognition: RecognitionConfig::default(),
        }
    }
}

/// Detector post-filtering
///
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub min_confidence: f32,
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_detections: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WriteRetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    /// upper bound of a single backoff pause
    pub max_delay_ms: u64,
}

/// Largest accepted `write_retry.max_retries`
pub const MAX_WRITE_RETRIES: usize = 10;

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Rolling buffer options
///
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub retention_window_ms: u64,
    /// quota usage percentages that raise the storage signals
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub full_percent: f64,
    pub write_retry: WriteRetryConfig,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_window_ms: DEFAULT_RETENTION_WINDOW_MS,
            warning_percent: 80.0,
            critical_percent: 90.0,
            full_percent: 95.0,
            write_retry: WriteRetryConfig::default(),
        }
    }
}

/// Recording engine options
///
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// segment timeslice
    pub flush_interval_ms: u64,
    pub watchdog_interval_ms: u64,
    pub circuit_breaker_interval_ms: u64,
    /// pause between recorder teardown and rebuild on a circuit-breaker restart
    pub restart_settle_ms: u64,
    pub timer_tick_ms: u64,
    pub background_grace_ms: u64,
    /// sessions whose last segment is older than this are reported as interrupted
    pub crash_threshold_ms: u64,
    pub quality: VideoQuality,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 30_000,
            watchdog_interval_ms: 5_000,
            circuit_breaker_interval_ms: 60 * 60 * 1000,
            restart_settle_ms: 500,
            timer_tick_ms: 1_000,
            background_grace_ms: 10_000,
            crash_threshold_ms: 2 * 60 * 1000,
            quality: VideoQuality::Medium,
        }
    }
}

/// Complete configuration consumed by the core
///
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DashcamConfig {
    pub tracker: TrackerConfig,
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub retention: RetentionConfig,
    pub recording: RecordingConfig,
}

impl DashcamConfig {
    /// Parses a (possibly partial) JSON document, missing fields take default values
    ///
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DashcamConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        fn check(cond: bool, msg: &str) -> Result<()> {
            if cond {
                Ok(())
            } else {
                Err(Errors::InvalidConfig(msg.to_string()).into())
            }
        }

        let t = &self.tracker;
        check(
            (0.0..=1.0).contains(&t.iou_threshold),
            "tracker.iou_threshold must be within [0, 1]",
        )?;
        check(
            (0.0..=1.0).contains(&t.min_area_fraction) && (0.0..=1.0).contains(&t.min_width_fraction),
            "tracker size fractions must be within [0, 1]",
        )?;
        check(!t.classes.is_empty(), "tracker.classes must not be empty")?;

        let r = &self.capture.recognition;
        check(
            r.plate_region_fraction > 0.0 && r.plate_region_fraction <= 1.0,
            "capture.recognition.plate_region_fraction must be within (0, 1]",
        )?;
        check(r.queue_depth > 0, "capture.recognition.queue_depth must be positive")?;
        check(
            (1..=100).contains(&self.capture.jpeg_quality)
                && (1..=100).contains(&r.region_jpeg_quality),
            "jpeg quality must be within [1, 100]",
        )?;

        let ret = &self.retention;
        check(
            ret.warning_percent <= ret.critical_percent && ret.critical_percent <= ret.full_percent,
            "retention thresholds must be ordered warning <= critical <= full",
        )?;
        check(ret.retention_window_ms > 0, "retention.retention_window_ms must be positive")?;
        check(
            (1..=MAX_WRITE_RETRIES).contains(&ret.write_retry.max_retries),
            "retention.write_retry.max_retries must be within [1, 10]",
        )?;

        let rec = &self.recording;
        check(
            rec.flush_interval_ms > 0
                && rec.watchdog_interval_ms > 0
                && rec.circuit_breaker_interval_ms > 0
                && rec.timer_tick_ms > 0,
            "recording intervals must be positive",
        )?;
        Ok(())
    }
}

/// Read-only shared configuration with versioned updates.
///
/// Readers take an immutable snapshot for the duration of one operation, writers
/// publish a whole new version.
///
#[derive(Debug, Default)]
pub struct SharedConfig {
    inner: RwLock<(u64, Arc<DashcamConfig>)>,
}

impl SharedConfig {
    pub fn new(config: DashcamConfig) -> Self {
        Self {
            inner: RwLock::new((0, Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<DashcamConfig> {
        self.inner.read().unwrap().1.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().unwrap().0
    }

    /// Validates and publishes a new configuration, returns the new version
    ///
    pub fn update(&self, config: DashcamConfig) -> Result<u64> {
        config.validate()?;
        let mut inner = self.inner.write().unwrap();
        inner.0 += 1;
        inner.1 = Arc::new(config);
        Ok(inner.0)
    }
}

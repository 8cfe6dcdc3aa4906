use thiserror::Error;

/// Rolling segment buffer with quota-driven retention
///
pub mod buffer;

/// Secondary (vehicle / plate) capture pipeline
///
pub mod capture;

/// Configuration snapshots consumed by every component
///
pub mod config;

/// Detection loop with single in-flight inference
///
pub mod detection;

/// Publish/subscribe helpers
///
pub mod notify;

/// Segmented recording engine
///
pub mod recording;

/// Durable store interfaces and the in-memory implementation
///
pub mod storage;

/// Fakes and generators used by tests, demos and benches
///
pub mod test_stuff;

/// Object trackers
///
pub mod trackers;

/// Bounding boxes, clocks, frames and image helpers
///
pub mod utils;

pub mod prelude;

use crate::recording::RecordingState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Cannot start recording: current state is {0:?}")]
    InvalidRecordingState(RecordingState),
    #[error("Storage quota exceeded: {0:.1}% used")]
    StorageFull(f64),
    #[error("Write failed after {attempts} attempts: {message}")]
    WriteFailed { attempts: usize, message: String },
    #[error("No supported video codec found on this device")]
    NoSupportedCodec,
    #[error("Input source could not be reacquired: {0}")]
    SourceUnavailable(String),
    #[error("Crop region is empty after clamping to the frame")]
    EmptyCrop,
    #[error("No buffered footage in the requested range")]
    EmptyClip,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub const EPS: f32 = 0.00001;

/// Allows comparing floating point based values
///
pub trait EstimateClose {
    fn almost_same(&self, other: &Self, eps: f32) -> bool;
}

impl EstimateClose for f32 {
    fn almost_same(&self, other: &Self, eps: f32) -> bool {
        (self - other).abs() < eps
    }
}

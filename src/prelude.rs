pub use crate::buffer::{BufferManager, StorageSignal};
pub use crate::capture::highlight::Highlight;
pub use crate::capture::job::{CaptureJob, JobOutcome};
pub use crate::capture::recognition::{PlateReader, RecognizedText, TextRecognizer};
pub use crate::capture::{CaptureNotice, CapturePipeline, CapturePipelineBuilder, CycleOutcome};
pub use crate::config::{DashcamConfig, SharedConfig};
pub use crate::detection::{Detection, DetectionLoop, Detector, RegionParams};
pub use crate::recording::media::{
    CodecResolver, InputSource, LadderResolver, Recorder, RecorderFactory, RecorderSettings,
    SourceProvider, TrackState,
};
pub use crate::recording::{EngineEvent, RecordingEngine, RecordingEngineBuilder, RecordingState};
pub use crate::storage::memory::MemoryStore;
pub use crate::storage::{
    ClipTrigger, StorageEstimate, StorageWarningLevel, VideoQuality, VideoQualityPreset,
};
pub use crate::trackers::vehicle::VehicleTracker;
pub use crate::utils::bbox::BoundingBox;
pub use crate::utils::clock::{Clock, ManualClock, SystemClock};
pub use crate::utils::frame::FrameSnapshot;
pub use crate::Errors;

use crate::storage::VideoQualityPreset;
use anyhow::Result;
use log::debug;
use std::sync::Arc;

/// Container formats in order of preference
pub const CODEC_LADDER: [&str; 4] = [
    "video/webm; codecs=vp9",
    "video/webm; codecs=vp8",
    "video/webm",
    "video/mp4; codecs=h264",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
    /// the source has no video track
    Missing,
}

/// Live, permission-bound frame source
///
pub trait InputSource: Send + Sync {
    fn id(&self) -> String;
    fn track_state(&self) -> TrackState;
}

/// Reacquires an equivalent input source after the previous one ended
///
pub trait SourceProvider: Send + Sync {
    fn acquire(&self, preset: &VideoQualityPreset) -> Result<Arc<dyn InputSource>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSettings {
    pub codec: String,
    /// bits per second
    pub bitrate: u32,
    pub timeslice_ms: u64,
}

/// Segmented encoder bound to one input source.
///
/// Any error it returns is treated as unrecoverable for the recording.
///
pub trait Recorder: Send {
    /// Encoded data produced since the previous call
    fn flush(&mut self) -> Result<Vec<u8>>;
    /// Stops the encoder and returns the remaining data
    fn finish(&mut self) -> Result<Vec<u8>>;
}

pub trait RecorderFactory: Send + Sync {
    fn create(
        &self,
        source: &Arc<dyn InputSource>,
        settings: &RecorderSettings,
    ) -> Result<Box<dyn Recorder>>;
}

/// Picks the output format supported on this device
///
pub trait CodecResolver: Send + Sync {
    fn resolve(&self) -> Option<String>;
}

/// Returns the first entry of [`CODEC_LADDER`] accepted by the probe
///
pub struct LadderResolver<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    probe: F,
}

impl<F> LadderResolver<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(probe: F) -> Self {
        Self { probe }
    }
}

impl<F> CodecResolver for LadderResolver<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn resolve(&self) -> Option<String> {
        CODEC_LADDER
            .iter()
            .find(|codec| {
                let supported = (self.probe)(codec);
                if !supported {
                    debug!("Codec {} is not supported", codec);
                }
                supported
            })
            .map(|codec| codec.to_string())
    }
}

use image::RgbImage;
use log::debug;
use std::sync::Arc;

#[derive(Debug)]
struct FrameData {
    sequence: u64,
    captured_at_ms: u64,
    image: RgbImage,
}

/// Materialized snapshot of an analyzed frame.
///
/// The snapshot is independent of the live video source. Clones are cheap handles
/// to the same pixels; the pixels are released when the last handle is dropped, so a
/// capture job that holds a handle keeps its frame valid until the crop is done even
/// after the detection loop has moved on to a newer frame.
///
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    data: Arc<FrameData>,
}

impl FrameSnapshot {
    pub fn new(sequence: u64, captured_at_ms: u64, image: RgbImage) -> Self {
        Self {
            data: Arc::new(FrameData {
                sequence,
                captured_at_ms,
                image,
            }),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.data.sequence
    }

    pub fn captured_at_ms(&self) -> u64 {
        self.data.captured_at_ms
    }

    pub fn width(&self) -> u32 {
        self.data.image.width()
    }

    pub fn height(&self) -> u32 {
        self.data.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.data.image
    }

    /// Number of live handles to the frame pixels
    ///
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

/// Single-owner holder of the most recent analyzed frame.
///
/// Storing a new frame releases the superseded one; consumers receive their own
/// handle from [`FrameSlot::current`].
///
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Option<FrameSnapshot>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, frame: FrameSnapshot) {
        if let Some(previous) = self.current.replace(frame) {
            debug!(
                "Frame {} superseded, {} handle(s) outstanding",
                previous.sequence(),
                previous.handles() - 1
            );
        }
    }

    pub fn current(&self) -> Option<FrameSnapshot> {
        self.current.clone()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}

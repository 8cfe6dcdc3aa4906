/// Bounding boxes
pub mod bbox;

/// Time sources
pub mod clock;

/// Frame snapshots and their single-owner slot
pub mod frame;

/// Cropping, preprocessing and JPEG encoding
pub mod jpeg;

/// Write retries with exponential backoff
pub mod retry;

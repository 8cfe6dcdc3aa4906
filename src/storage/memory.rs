use crate::storage::{
    BufferSegment, Capture, CaptureStore, QuotaEstimator, SavedClip, SavedClipStore,
    SegmentStore, SessionState, SessionStore, StorageEstimate,
};
use anyhow::{anyhow, Result};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy)]
enum Quota {
    /// usage is the sum of stored blob sizes
    Computed { total_bytes: u64 },
    /// fixed estimate set by the owner
    Fixed(StorageEstimate),
}

/// Ordered blob store kept in memory.
///
/// Implements every durable-store interface the core uses. The quota estimate is either
/// derived from the stored blobs or pinned with [`MemoryStore::set_estimate`], and the
/// next writes can be made to fail with [`MemoryStore::fail_next_writes`].
///
#[derive(Debug)]
pub struct MemoryStore {
    segments: RwLock<HashMap<String, BufferSegment>>,
    clips: RwLock<HashMap<String, SavedClip>>,
    /// captures with their insertion sequence
    captures: RwLock<HashMap<String, (u64, Capture)>>,
    capture_sequence: AtomicU64,
    session: RwLock<Option<SessionState>>,
    quota: RwLock<Quota>,
    failing_writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl MemoryStore {
    /// Creates the store
    ///
    /// # Parameters
    /// * `total_bytes` - quota reported by the estimate, usage is computed from stored blobs
    ///
    pub fn new(total_bytes: u64) -> Self {
        Self {
            segments: RwLock::default(),
            clips: RwLock::default(),
            captures: RwLock::default(),
            capture_sequence: AtomicU64::new(0),
            session: RwLock::default(),
            quota: RwLock::new(Quota::Computed { total_bytes }),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Pins the storage estimate regardless of stored content
    ///
    pub fn set_estimate(&self, estimate: StorageEstimate) {
        *self.quota.write().unwrap() = Quota::Fixed(estimate);
    }

    /// Makes the next `n` add/put operations fail
    ///
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().unwrap().len()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.read().unwrap().len()
    }

    fn stored_bytes(&self) -> u64 {
        let segments: u64 = self
            .segments
            .read()
            .unwrap()
            .values()
            .map(|s| s.size as u64)
            .sum();
        let clips: u64 = self
            .clips
            .read()
            .unwrap()
            .values()
            .map(|c| c.size as u64)
            .sum();
        let captures: u64 = self
            .captures
            .read()
            .unwrap()
            .values()
            .map(|(_, c)| (c.vehicle_image.len() + c.plate_region.as_ref().map_or(0, |r| r.len())) as u64)
            .sum();
        segments + clips + captures
    }

    fn check_write(&self) -> Result<()> {
        let res = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match res {
            Ok(_) => Err(anyhow!("Injected write failure")),
            Err(_) => Ok(()),
        }
    }
}

impl SegmentStore for MemoryStore {
    fn add_segment(&self, segment: BufferSegment) -> Result<()> {
        self.check_write()?;
        let mut segments = self.segments.write().unwrap();
        if segments.contains_key(&segment.id) {
            return Err(anyhow!("Segment {} already exists", segment.id));
        }
        segments.insert(segment.id.clone(), segment);
        Ok(())
    }

    fn delete_segment(&self, id: &str) -> Result<()> {
        self.segments.write().unwrap().remove(id);
        Ok(())
    }

    fn segments_before(&self, before: u64) -> Result<Vec<BufferSegment>> {
        Ok(self
            .segments
            .read()
            .unwrap()
            .values()
            .filter(|s| s.timestamp < before)
            .cloned()
            .sorted_by_key(|s| (s.timestamp, s.sequence_number))
            .collect())
    }

    fn all_segments(&self) -> Result<Vec<BufferSegment>> {
        Ok(self
            .segments
            .read()
            .unwrap()
            .values()
            .cloned()
            .sorted_by_key(|s| s.sequence_number)
            .collect())
    }
}

impl SavedClipStore for MemoryStore {
    fn add_saved_clip(&self, clip: SavedClip) -> Result<()> {
        self.check_write()?;
        self.clips.write().unwrap().insert(clip.id.clone(), clip);
        Ok(())
    }

    fn delete_saved_clip(&self, id: &str) -> Result<()> {
        self.clips.write().unwrap().remove(id);
        Ok(())
    }

    fn all_saved_clips(&self) -> Result<Vec<SavedClip>> {
        Ok(self
            .clips
            .read()
            .unwrap()
            .values()
            .cloned()
            .sorted_by_key(|c| c.timestamp)
            .collect())
    }
}

impl CaptureStore for MemoryStore {
    fn add_capture(&self, capture: Capture) -> Result<()> {
        self.check_write()?;
        let sequence = self.capture_sequence.fetch_add(1, Ordering::SeqCst);
        self.captures
            .write()
            .unwrap()
            .insert(capture.id.clone(), (sequence, capture));
        Ok(())
    }

    fn delete_capture(&self, id: &str) -> Result<()> {
        self.captures.write().unwrap().remove(id);
        Ok(())
    }

    fn all_captures(&self) -> Result<Vec<Capture>> {
        Ok(self
            .captures
            .read()
            .unwrap()
            .values()
            .sorted_by_key(|(sequence, c)| (c.timestamp, *sequence))
            .map(|(_, c)| c.clone())
            .collect())
    }
}

impl SessionStore for MemoryStore {
    fn get_session(&self) -> Result<Option<SessionState>> {
        Ok(self.session.read().unwrap().clone())
    }

    fn put_session(&self, state: SessionState) -> Result<()> {
        self.check_write()?;
        *self.session.write().unwrap() = Some(state);
        Ok(())
    }

    fn clear_session(&self) -> Result<()> {
        *self.session.write().unwrap() = None;
        Ok(())
    }
}

impl QuotaEstimator for MemoryStore {
    fn estimate(&self) -> Result<StorageEstimate> {
        let quota = *self.quota.read().unwrap();
        Ok(match quota {
            Quota::Fixed(e) => e,
            Quota::Computed { total_bytes } => StorageEstimate::new(self.stored_bytes(), total_bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::memory::MemoryStore;
    use crate::storage::{
        BufferSegment, QuotaEstimator, SegmentStore, SessionState, SessionStore,
        StorageEstimate, VideoQuality,
    };

    fn segment(id: &str, timestamp: u64, seq: u64) -> BufferSegment {
        BufferSegment {
            id: id.to_string(),
            timestamp,
            size: 10,
            payload: vec![0; 10],
            sequence_number: seq,
        }
    }

    #[test]
    fn segments_are_ordered_and_indexed() {
        let store = MemoryStore::new(1_000);
        store.add_segment(segment("b", 200, 1)).unwrap();
        store.add_segment(segment("a", 100, 0)).unwrap();
        store.add_segment(segment("c", 300, 2)).unwrap();
        assert!(store.add_segment(segment("c", 300, 3)).is_err());

        let ids: Vec<_> = store
            .all_segments()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let before: Vec<_> = store
            .segments_before(300)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(before, vec!["a", "b"]);

        assert_eq!(store.estimate().unwrap(), StorageEstimate::new(30, 1_000));
    }

    #[test]
    fn deletes_are_idempotent() {
        let store = MemoryStore::default();
        store.add_segment(segment("a", 100, 0)).unwrap();
        store.delete_segment("a").unwrap();
        store.delete_segment("a").unwrap();
        assert_eq!(store.segment_count(), 0);
    }

    #[test]
    fn injected_failures() {
        let store = MemoryStore::default();
        store.fail_next_writes(1);
        assert!(store.add_segment(segment("a", 100, 0)).is_err());
        assert!(store.add_segment(segment("a", 100, 0)).is_ok());
    }

    #[test]
    fn session_roundtrip() {
        let store = MemoryStore::default();
        assert!(store.get_session().unwrap().is_none());
        let state = SessionState {
            recording: true,
            start_time: 1,
            last_chunk_time: 2,
            codec: "video/webm; codecs=vp9".into(),
            quality: VideoQuality::Medium,
        };
        store.put_session(state.clone()).unwrap();
        assert_eq!(store.get_session().unwrap(), Some(state));
        store.clear_session().unwrap();
        assert!(store.get_session().unwrap().is_none());
    }

    #[test]
    fn pinned_estimate() {
        let store = MemoryStore::default();
        store.set_estimate(StorageEstimate::new(96, 100));
        assert_eq!(store.estimate().unwrap().percent(), 96.0);
    }
}

use crate::config::RetentionConfig;
use crate::notify::EventBus;
use crate::storage::{
    BufferSegment, BufferStore, ClipTrigger, SavedClip, StorageEstimate, StorageStats,
    StorageWarningLevel,
};
use crate::utils::clock::Clock;
use crate::utils::retry::retry_write;
use crate::Errors;
use anyhow::Result;
use crossbeam::channel::Receiver;
use itertools::Itertools;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Below this much free space the retention window shrinks to [`LOW_SPACE_WINDOW_MS`]
pub const LOW_SPACE_BYTES: u64 = 200_000_000;
/// Below this much free space the retention window shrinks to [`LIMITED_SPACE_WINDOW_MS`]
pub const LIMITED_SPACE_BYTES: u64 = 500_000_000;
/// Above this much free space the configured retention window is restored
pub const AMPLE_SPACE_BYTES: u64 = 2_000_000_000;

pub const LOW_SPACE_WINDOW_MS: u64 = 30 * 60 * 1000;
pub const LIMITED_SPACE_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Quota pressure raised before a write
///
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSignal {
    pub level: StorageWarningLevel,
    pub estimate: StorageEstimate,
    pub percent: f64,
}

/// Rolling window of recorded segments kept under the storage quota.
///
/// Quota pressure is reported through [`StorageSignal`]s. Retention pruning is silent:
/// it never produces a signal.
///
pub struct BufferManager<S: BufferStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
    window_ms: AtomicU64,
    sequence: AtomicU64,
    signals: EventBus<StorageSignal>,
}

impl<S: BufferStore> BufferManager<S> {
    /// Creates the manager
    ///
    /// # Parameters
    /// * `store` - segment and saved clip storage with a quota estimate
    /// * `clock` - time source for segment timestamps and retention cutoffs
    /// * `config` - thresholds, initial retention window and write retries
    ///
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: RetentionConfig) -> Self {
        Self {
            store,
            clock,
            window_ms: AtomicU64::new(config.retention_window_ms),
            config,
            sequence: AtomicU64::new(0),
            signals: EventBus::new(),
        }
    }

    pub fn subscribe(&self) -> Receiver<StorageSignal> {
        self.signals.subscribe()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn retention_window_ms(&self) -> u64 {
        self.window_ms.load(Ordering::SeqCst)
    }

    fn warning_level(&self, percent: f64) -> StorageWarningLevel {
        if percent > self.config.full_percent {
            StorageWarningLevel::Full
        } else if percent > self.config.critical_percent {
            StorageWarningLevel::Critical
        } else if percent > self.config.warning_percent {
            StorageWarningLevel::Warning
        } else {
            StorageWarningLevel::Ok
        }
    }

    /// Raises the quota signal, fails when the storage is full
    ///
    fn check_quota(&self) -> Result<()> {
        let estimate = self.store.estimate()?;
        let percent = estimate.percent();
        let level = self.warning_level(percent);
        if level != StorageWarningLevel::Ok {
            self.signals.emit(StorageSignal {
                level,
                estimate,
                percent,
            });
        }
        match level {
            StorageWarningLevel::Full => {
                warn!("Storage is full ({:.1}% used), write rejected", percent);
                Err(Errors::StorageFull(percent).into())
            }
            StorageWarningLevel::Critical => {
                warn!("Storage is almost full ({:.1}% used)", percent);
                Ok(())
            }
            StorageWarningLevel::Warning => {
                info!("Storage is filling up ({:.1}% used)", percent);
                Ok(())
            }
            StorageWarningLevel::Ok => Ok(()),
        }
    }

    /// Appends a flushed segment to the buffer.
    ///
    /// Rejected with [`Errors::StorageFull`] above the full threshold, otherwise stored
    /// with retries and followed by retention enforcement.
    ///
    pub fn add_segment(&self, payload: Vec<u8>) -> Result<BufferSegment> {
        self.check_quota()?;

        let segment = BufferSegment {
            id: Uuid::new_v4().to_string(),
            timestamp: self.clock.now_ms(),
            size: payload.len(),
            payload,
            sequence_number: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        retry_write(&self.config.write_retry, "segment", || {
            self.store.add_segment(segment.clone())
        })?;
        debug!(
            "Segment {} #{} stored, {} bytes",
            segment.id, segment.sequence_number, segment.size
        );

        if let Err(e) = self.enforce_retention() {
            warn!("Retention enforcement failed: {}", e);
        }
        Ok(segment)
    }

    /// Deletes segments older than the retention window, returns the number deleted
    ///
    pub fn enforce_retention(&self) -> Result<usize> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(self.retention_window_ms());
        let expired = self.store.segments_before(cutoff)?;
        for s in &expired {
            self.store.delete_segment(&s.id)?;
        }
        if !expired.is_empty() {
            debug!("Retention removed {} segment(s)", expired.len());
        }
        Ok(expired.len())
    }

    /// Recomputes the retention window from the free space and re-applies retention.
    ///
    /// Between [`LIMITED_SPACE_BYTES`] and [`AMPLE_SPACE_BYTES`] the window is left as is.
    ///
    pub fn adapt_retention_window(&self) -> Result<u64> {
        let available = self.store.estimate()?.available_bytes();
        let window = if available < LOW_SPACE_BYTES {
            Some(LOW_SPACE_WINDOW_MS)
        } else if available < LIMITED_SPACE_BYTES {
            Some(LIMITED_SPACE_WINDOW_MS)
        } else if available > AMPLE_SPACE_BYTES {
            Some(self.config.retention_window_ms)
        } else {
            None
        };
        if let Some(window) = window {
            let previous = self.window_ms.swap(window, Ordering::SeqCst);
            if previous != window {
                info!(
                    "Retention window changed from {} to {} minutes ({} bytes available)",
                    previous / 60_000,
                    window / 60_000,
                    available
                );
            }
        }
        self.enforce_retention()?;
        Ok(self.retention_window_ms())
    }

    /// Aggregated buffer and quota figures
    ///
    pub fn stats(&self) -> Result<StorageStats> {
        let segments = self.store.all_segments()?;
        let buffer_duration_ms = match segments.iter().map(|s| s.timestamp).minmax().into_option() {
            Some((oldest, newest)) => newest - oldest,
            None => 0,
        };
        let clips = self.store.all_saved_clips()?;
        let estimate = self.store.estimate()?;
        let quota_percent = estimate.percent();

        Ok(StorageStats {
            buffer_segments: segments.len(),
            buffer_size_bytes: segments.iter().map(|s| s.size as u64).sum(),
            buffer_duration_ms,
            saved_clips: clips.len(),
            saved_size_bytes: clips.iter().map(|c| c.size as u64).sum(),
            quota_usage_bytes: estimate.used_bytes,
            quota_total_bytes: estimate.total_bytes,
            quota_percent,
            warning_level: self.warning_level(quota_percent),
        })
    }

    /// Deletes the `count` oldest segments regardless of the retention window
    ///
    pub fn force_cleanup(&self, count: usize) -> Result<usize> {
        let oldest = self
            .store
            .all_segments()?
            .into_iter()
            .sorted_by_key(|s| (s.timestamp, s.sequence_number))
            .take(count)
            .collect::<Vec<_>>();
        for s in &oldest {
            self.store.delete_segment(&s.id)?;
        }
        warn!("Emergency cleanup deleted {} segment(s)", oldest.len());
        Ok(oldest.len())
    }

    /// Archives the buffered footage of the last `duration_ms` as a saved clip.
    ///
    /// The clip payload is the concatenation of the segment payloads in sequence order,
    /// its duration runs from the oldest included segment to now.
    ///
    pub fn save_clip(&self, duration_ms: u64, trigger: ClipTrigger) -> Result<SavedClip> {
        let now = self.clock.now_ms();
        let from = now.saturating_sub(duration_ms);
        let segments = self
            .store
            .all_segments()?
            .into_iter()
            .filter(|s| s.timestamp >= from)
            .collect::<Vec<_>>();
        let Some(first) = segments.iter().map(|s| s.timestamp).min() else {
            return Err(Errors::EmptyClip.into());
        };
        self.check_quota()?;

        let payload = segments
            .iter()
            .flat_map(|s| s.payload.iter().copied())
            .collect::<Vec<_>>();
        let clip = SavedClip {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            duration_ms: now - first,
            segment_ids: segments.iter().map(|s| s.id.clone()).collect(),
            trigger,
            size: payload.len(),
            payload,
        };
        retry_write(&self.config.write_retry, "saved clip", || {
            self.store.add_saved_clip(clip.clone())
        })?;
        info!(
            "Saved clip {} ({:?}), {} segment(s), {} bytes",
            clip.id,
            trigger,
            clip.segment_ids.len(),
            clip.size
        );
        Ok(clip)
    }

    pub fn saved_clips(&self) -> Result<Vec<SavedClip>> {
        self.store.all_saved_clips()
    }

    pub fn delete_saved_clip(&self, id: &str) -> Result<()> {
        self.store.delete_saved_clip(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::{BufferManager, StorageSignal, LIMITED_SPACE_WINDOW_MS, LOW_SPACE_WINDOW_MS};
    use crate::config::RetentionConfig;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{
        BufferSegment, ClipTrigger, SegmentStore, StorageEstimate, StorageWarningLevel,
    };
    use crate::utils::clock::{Clock, ManualClock};
    use crate::Errors;
    use std::sync::Arc;

    const HOUR: u64 = 60 * 60 * 1000;
    const MB: u64 = 1_000_000;
    const T: u64 = 10 * HOUR;

    fn manager(total: u64) -> (BufferManager<MemoryStore>, Arc<MemoryStore>, ManualClock) {
        let store = Arc::new(MemoryStore::new(total));
        let clock = ManualClock::new(T);
        let mut config = RetentionConfig::default();
        config.write_retry.base_delay_ms = 0;
        (
            BufferManager::new(store.clone(), Arc::new(clock.clone()), config),
            store,
            clock,
        )
    }

    #[test]
    fn retention_keeps_the_window() {
        let (m, store, _) = manager(u64::MAX);
        for (seq, at) in [T - 3 * HOUR, T - 2 * HOUR, T - HOUR / 2].into_iter().enumerate() {
            store
                .add_segment(BufferSegment {
                    id: format!("s{}", seq),
                    timestamp: at,
                    size: 10,
                    payload: vec![0; 10],
                    sequence_number: seq as u64,
                })
                .unwrap();
        }

        assert_eq!(m.enforce_retention().unwrap(), 1);
        let left: Vec<_> = store
            .all_segments()
            .unwrap()
            .into_iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(left, vec![T - 2 * HOUR, T - HOUR / 2]);
        assert_eq!(m.enforce_retention().unwrap(), 0);
    }

    #[test]
    fn adding_enforces_retention_silently() {
        let (m, store, clock) = manager(u64::MAX);
        let signals = m.subscribe();
        clock.set(T - 3 * HOUR);
        m.add_segment(vec![1]).unwrap();
        clock.set(T);
        let s = m.add_segment(vec![2, 3]).unwrap();
        assert_eq!(store.segment_count(), 1);
        assert_eq!(s.sequence_number, 1);
        assert_eq!(s.size, 2);
        assert_eq!(s.timestamp, T);
        assert!(signals.try_recv().is_err());
    }

    #[test]
    fn full_storage_rejects_the_segment() {
        let (m, store, _) = manager(100);
        let signals = m.subscribe();
        store.set_estimate(StorageEstimate::new(96, 100));
        let err = m.add_segment(vec![0; 10]).unwrap_err();
        assert_eq!(err.downcast_ref::<Errors>(), Some(&Errors::StorageFull(96.0)));
        assert_eq!(store.segment_count(), 0);
        assert_eq!(
            signals.try_recv().unwrap(),
            StorageSignal {
                level: StorageWarningLevel::Full,
                estimate: StorageEstimate::new(96, 100),
                percent: 96.0,
            }
        );
    }

    #[test]
    fn quota_pressure_is_signalled() {
        let (m, store, _) = manager(100);
        let signals = m.subscribe();

        store.set_estimate(StorageEstimate::new(82, 100));
        m.add_segment(vec![0; 10]).unwrap();
        assert_eq!(signals.try_recv().unwrap().level, StorageWarningLevel::Warning);

        store.set_estimate(StorageEstimate::new(91, 100));
        m.add_segment(vec![0; 10]).unwrap();
        assert_eq!(signals.try_recv().unwrap().level, StorageWarningLevel::Critical);

        store.set_estimate(StorageEstimate::new(80, 100));
        m.add_segment(vec![0; 10]).unwrap();
        assert!(signals.try_recv().is_err());
        assert_eq!(store.segment_count(), 3);
    }

    #[test]
    fn write_failures_are_retried() {
        let (m, store, _) = manager(u64::MAX);
        store.fail_next_writes(2);
        let s = m.add_segment(vec![0; 4]).unwrap();
        assert_eq!(s.sequence_number, 0);
        assert_eq!(store.segment_count(), 1);

        store.fail_next_writes(3);
        let err = m.add_segment(vec![0; 4]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::WriteFailed { attempts: 3, .. })
        ));
    }

    #[test]
    fn window_adapts_to_free_space() {
        let (m, store, _) = manager(u64::MAX);
        let total = 10_000 * MB;
        assert_eq!(m.retention_window_ms(), 2 * HOUR);

        store.set_estimate(StorageEstimate::new(total - 100 * MB, total));
        assert_eq!(m.adapt_retention_window().unwrap(), LOW_SPACE_WINDOW_MS);

        store.set_estimate(StorageEstimate::new(total - 300 * MB, total));
        assert_eq!(m.adapt_retention_window().unwrap(), LIMITED_SPACE_WINDOW_MS);

        store.set_estimate(StorageEstimate::new(total - 1_000 * MB, total));
        assert_eq!(m.adapt_retention_window().unwrap(), LIMITED_SPACE_WINDOW_MS);

        store.set_estimate(StorageEstimate::new(total - 3_000 * MB, total));
        assert_eq!(m.adapt_retention_window().unwrap(), 2 * HOUR);
    }

    #[test]
    fn adapting_reapplies_retention() {
        let (m, store, clock) = manager(u64::MAX);
        clock.set(T - HOUR);
        m.add_segment(vec![0; 10]).unwrap();
        clock.set(T - HOUR / 4);
        m.add_segment(vec![0; 10]).unwrap();
        clock.set(T);

        store.set_estimate(StorageEstimate::new(0, 100 * MB));
        m.adapt_retention_window().unwrap();
        assert_eq!(store.segment_count(), 1);
    }

    #[test]
    fn forced_cleanup_removes_the_oldest() {
        let (m, store, clock) = manager(u64::MAX);
        for i in 0..5 {
            clock.set(T + i * 1_000);
            m.add_segment(vec![i as u8]).unwrap();
        }
        assert_eq!(m.force_cleanup(2).unwrap(), 2);
        let oldest = store.all_segments().unwrap()[0].timestamp;
        assert_eq!(oldest, T + 2_000);
        assert_eq!(m.force_cleanup(10).unwrap(), 3);
        assert_eq!(store.segment_count(), 0);
        assert_eq!(m.force_cleanup(1).unwrap(), 0);
    }

    #[test]
    fn stats_are_aggregated() {
        let (m, store, clock) = manager(1_000);
        let empty = m.stats().unwrap();
        assert_eq!(empty.buffer_segments, 0);
        assert_eq!(empty.buffer_duration_ms, 0);

        for (at, size) in [(T, 100), (T + 3_000, 50), (T + 1_500, 250)] {
            clock.set(at);
            m.add_segment(vec![0; size]).unwrap();
        }
        m.save_clip(60_000, ClipTrigger::Manual).unwrap();

        let stats = m.stats().unwrap();
        assert_eq!(stats.buffer_segments, 3);
        assert_eq!(stats.buffer_size_bytes, 400);
        assert_eq!(stats.buffer_duration_ms, 3_000);
        assert_eq!(stats.saved_clips, 1);
        assert_eq!(stats.saved_size_bytes, 400);
        assert_eq!(stats.quota_usage_bytes, 800);
        assert_eq!(stats.quota_total_bytes, 1_000);
        assert_eq!(stats.quota_percent, 80.0);
        assert_eq!(stats.warning_level, StorageWarningLevel::Ok);

        // pure read
        assert_eq!(m.stats().unwrap(), stats);
        assert_eq!(store.segment_count(), 3);
    }

    #[test]
    fn clips_archive_the_recent_footage() {
        let (m, _store, clock) = manager(u64::MAX);
        for (i, back) in [90_000, 60_000, 30_000, 0].iter().enumerate() {
            clock.set(T - back);
            m.add_segment(vec![i as u8; 2]).unwrap();
        }
        let clip = m.save_clip(45_000, ClipTrigger::Accelerometer).unwrap();
        assert_eq!(clip.segment_ids.len(), 2);
        assert_eq!(clip.payload, vec![2, 2, 3, 3]);
        assert_eq!(clip.duration_ms, 30_000);
        assert_eq!(clip.timestamp, clock.now_ms());
        assert_eq!(clip.trigger, ClipTrigger::Accelerometer);
        assert_eq!(m.saved_clips().unwrap().len(), 1);

        m.delete_saved_clip(&clip.id).unwrap();
        m.delete_saved_clip(&clip.id).unwrap();
        assert!(m.saved_clips().unwrap().is_empty());

        clock.set(T + HOUR);
        let err = m.save_clip(1_000, ClipTrigger::Manual).unwrap_err();
        assert_eq!(err.downcast_ref::<Errors>(), Some(&Errors::EmptyClip));
    }
}

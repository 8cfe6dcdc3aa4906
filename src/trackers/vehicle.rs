use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::utils::bbox::BoundingBox;
use log::debug;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Physically distinct vehicle followed across frames
///
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedVehicle {
    pub id: u64,
    pub bbox: BoundingBox,
    pub class: String,
    pub score: f32,
    pub consecutive_large_frames: u32,
    pub last_seen_ms: u64,
    pub last_capture_attempt_ms: Option<u64>,
    pub plate_text: Option<String>,
    pub area_fraction: f32,
    pub width_fraction: f32,
}

/// Vehicle that qualifies for a capture attempt in the current cycle
///
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleVehicle {
    /// snapshot of the track right after the update
    pub tracked: TrackedVehicle,
    pub detection: Detection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleDebugInfo {
    pub id: u64,
    pub bbox: BoundingBox,
    pub area_fraction: f32,
    pub width_fraction: f32,
    pub consecutive_large_frames: u32,
    /// 0 when the vehicle is not on cooldown
    pub cooldown_remaining_ms: u64,
    pub plate_text: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    detection: usize,
    track: u64,
    iou: f32,
}

/// Associates per-frame detections into persistent vehicle identities.
///
/// Tracks are matched by IoU. Among all (detection, track) pairs above the threshold the
/// pairs are taken greedily by descending IoU, so a track competed for by several
/// detections goes to the one with the strictly higher overlap; ties keep the detection
/// evaluated first, then the older track. Every detection claims at most one track and
/// every track is claimed at most once per update.
///
#[derive(Debug, Default)]
pub struct VehicleTracker {
    vehicles: BTreeMap<u64, TrackedVehicle>,
    track_id: u64,
}

impl VehicleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn gen_track_id(&mut self) -> u64 {
        self.track_id += 1;
        self.track_id
    }

    /// Feeds a frame worth of detections into the tracker.
    ///
    /// Returns vehicles that are eligible for a capture attempt, in detection order.
    /// Vehicles unseen for longer than `stale_timeout_ms` are removed after matching.
    ///
    /// # Parameters
    /// * `detections` - detector output for the frame, any classes
    /// * `frame_width`, `frame_height` - frame size in pixels
    /// * `now_ms` - frame time
    /// * `config` - thresholds snapshot
    ///
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
        now_ms: u64,
        config: &TrackerConfig,
    ) -> Vec<EligibleVehicle> {
        if frame_width == 0 || frame_height == 0 {
            return Vec::default();
        }
        let frame_area = frame_width as f32 * frame_height as f32;

        let vehicle_detections = detections
            .iter()
            .filter(|d| config.classes.iter().any(|c| *c == d.class))
            .collect::<Vec<_>>();

        let assignment = self.assign(&vehicle_detections, config.iou_threshold);
        let mut eligible = Vec::default();

        for (index, detection) in vehicle_detections.iter().enumerate() {
            let area_fraction = detection.bbox.area() / frame_area;
            let width_fraction = detection.bbox.width() / frame_width as f32;
            let is_large = area_fraction >= config.min_area_fraction
                && width_fraction >= config.min_width_fraction;

            match assignment[index] {
                Some(track_id) => {
                    let Some(tracked) = self.vehicles.get_mut(&track_id) else {
                        continue;
                    };
                    tracked.bbox = detection.bbox;
                    tracked.score = detection.score;
                    tracked.last_seen_ms = now_ms;
                    tracked.area_fraction = area_fraction;
                    tracked.width_fraction = width_fraction;
                    tracked.consecutive_large_frames = if is_large {
                        tracked.consecutive_large_frames + 1
                    } else {
                        0
                    };

                    let cooldown_ok = match tracked.last_capture_attempt_ms {
                        None => true,
                        Some(t) => now_ms.saturating_sub(t) > config.cooldown_ms,
                    };
                    let stable_ok = tracked.consecutive_large_frames >= config.min_stable_frames;
                    if is_large && cooldown_ok && stable_ok {
                        eligible.push(EligibleVehicle {
                            tracked: tracked.clone(),
                            detection: (*detection).clone(),
                        });
                    }
                }
                None => {
                    let id = self.gen_track_id();
                    debug!(
                        "New vehicle track {} ({}) at {:?}",
                        id, detection.class, detection.bbox
                    );
                    self.vehicles.insert(
                        id,
                        TrackedVehicle {
                            id,
                            bbox: detection.bbox,
                            class: detection.class.clone(),
                            score: detection.score,
                            consecutive_large_frames: u32::from(is_large),
                            last_seen_ms: now_ms,
                            last_capture_attempt_ms: None,
                            plate_text: None,
                            area_fraction,
                            width_fraction,
                        },
                    );
                }
            }
        }

        let before = self.vehicles.len();
        self.vehicles
            .retain(|_, v| now_ms.saturating_sub(v.last_seen_ms) <= config.stale_timeout_ms);
        if self.vehicles.len() != before {
            debug!("Pruned {} stale vehicle track(s)", before - self.vehicles.len());
        }

        eligible
    }

    /// Greedy best-overlap assignment, returns the matched track per detection
    ///
    fn assign(&self, detections: &[&Detection], iou_threshold: f32) -> Vec<Option<u64>> {
        let tracks = self
            .vehicles
            .values()
            .map(|v| (v.id, v.bbox))
            .collect::<Vec<_>>();

        let mut candidates = detections
            .par_iter()
            .enumerate()
            .flat_map_iter(|(detection, d)| {
                tracks.iter().filter_map(move |(track, bbox)| {
                    let iou = BoundingBox::iou(&d.bbox, bbox);
                    (iou > iou_threshold).then_some(Candidate {
                        detection,
                        track: *track,
                        iou,
                    })
                })
            })
            .collect::<Vec<_>>();

        candidates.sort_by(|l, r| {
            r.iou
                .partial_cmp(&l.iou)
                .unwrap_or(Ordering::Equal)
                .then(l.detection.cmp(&r.detection))
                .then(l.track.cmp(&r.track))
        });

        let mut assignment = vec![None; detections.len()];
        let mut claimed = Vec::with_capacity(candidates.len());
        for c in candidates {
            if assignment[c.detection].is_none() && !claimed.contains(&c.track) {
                assignment[c.detection] = Some(c.track);
                claimed.push(c.track);
            }
        }
        assignment
    }

    /// Stamps a capture attempt: the cooldown starts now and stable frames must be
    /// accumulated again before the vehicle becomes eligible.
    ///
    /// Returns `false` when the track no longer exists.
    ///
    pub fn mark_capture_attempt(&mut self, id: u64, now_ms: u64) -> bool {
        match self.vehicles.get_mut(&id) {
            Some(tracked) => {
                tracked.last_capture_attempt_ms = Some(now_ms);
                tracked.consecutive_large_frames = 0;
                true
            }
            None => false,
        }
    }

    pub fn set_plate_text(&mut self, id: u64, text: &str) -> bool {
        match self.vehicles.get_mut(&id) {
            Some(tracked) => {
                tracked.plate_text = Some(text.to_string());
                true
            }
            None => false,
        }
    }

    /// Read-only view of all tracks with their remaining cooldown
    ///
    pub fn debug_info(&self, now_ms: u64, cooldown_ms: u64) -> Vec<VehicleDebugInfo> {
        self.vehicles
            .values()
            .map(|v| VehicleDebugInfo {
                id: v.id,
                bbox: v.bbox,
                area_fraction: v.area_fraction,
                width_fraction: v.width_fraction,
                consecutive_large_frames: v.consecutive_large_frames,
                cooldown_remaining_ms: v
                    .last_capture_attempt_ms
                    .map(|t| cooldown_ms.saturating_sub(now_ms.saturating_sub(t)))
                    .unwrap_or(0),
                plate_text: v.plate_text.clone(),
            })
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<&TrackedVehicle> {
        self.vehicles.get(&id)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

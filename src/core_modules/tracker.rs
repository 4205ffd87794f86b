// THEORY:
// The `tracker` module gives the engine object permanence. The segmenter only
// knows "there are three bright regions in this frame"; the tracker turns that
// into "light #4 is still here, light #7 went dark, and this is a new light #9".
// Blink detection is impossible without it, because a blinking lamp is by
// definition absent from some frames.
//
// Key architectural principles:
// 1.  **Arena of tracks**: tracks live in an id-indexed map, never in a web of
//     cross-references. Iteration is in id order, so every update is
//     deterministic for a given input.
// 2.  **Greedy nearest-centroid association**: every (track, detection) pair
//     within the distance gate is a candidate. Candidates are taken globally
//     cheapest first, ties going to the lower track id, and each track and each
//     detection is used at most once.
// 3.  **Absence is evidence**: a track with no detection in a frame records an
//     explicit "off" entry at its last known position. That entry is what a
//     blinking lamp's dark phase looks like.
// 4.  **Lifecycle**:
//     - **Birth**: an unmatched detection starts a new track with a fresh id.
//     - **Tracking**: a matched track appends the observation and clears its
//       miss counter.
//     - **Death**: a track missed for more than `miss_tolerance` consecutive
//       frames is removed, which also bounds the table against flickering noise.

use crate::config::TrackerConfig;
use crate::core_modules::classifier::Label;
use crate::core_modules::detection::{BoundingBox, Detection, LightColor, Point};
use crate::core_modules::history::{FrameState, StateHistory};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// A light followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique, monotonically assigned identifier.
    pub id: u64,
    history: StateHistory,
    misses: u32,
    label: Label,
    confidence: f64,
    bounding_box: BoundingBox,
    color: LightColor,
    first_frame: u64,
    /// Recent fresh verdicts, only filled when label smoothing is enabled.
    pub(crate) label_votes: VecDeque<(Label, f64)>,
}

impl Track {
    fn new(id: u64, detection: &Detection, frame_index: u64, config: &TrackerConfig) -> Self {
        let mut history = StateHistory::new(config.frame_buffer_size);
        history.push(observed_state(detection, frame_index, config));
        Self {
            id,
            history,
            misses: 0,
            label: Label::Analyzing,
            confidence: 0.0,
            bounding_box: detection.bounding_box,
            color: detection.color,
            first_frame: frame_index,
            label_votes: VecDeque::new(),
        }
    }

    fn observe(&mut self, detection: &Detection, frame_index: u64, config: &TrackerConfig) {
        self.history.push(observed_state(detection, frame_index, config));
        self.bounding_box = detection.bounding_box;
        self.color = detection.color;
        self.misses = 0;
    }

    fn miss(&mut self, frame_index: u64) {
        let last_centroid = self.last_centroid();
        self.history.push(FrameState::missed(last_centroid, frame_index));
        self.misses += 1;
    }

    /// Centroid of the most recent entry, observed or carried over.
    pub fn last_centroid(&self) -> Point {
        self.history
            .latest()
            .map(|state| state.centroid)
            .unwrap_or_else(|| self.bounding_box.center())
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    /// Consecutive frames without a matching detection.
    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Region of the last matched detection.
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn color(&self) -> LightColor {
        self.color
    }

    pub fn first_frame(&self) -> u64 {
        self.first_frame
    }

    /// Whether the light was seen in the most recent update.
    pub fn is_visible(&self) -> bool {
        self.misses == 0
    }

    /// Stores the classifier's verdict for the current window.
    pub fn set_classification(&mut self, label: Label, confidence: f64) {
        self.label = label;
        self.confidence = confidence.clamp(0.0, 1.0);
    }
}

fn observed_state(detection: &Detection, frame_index: u64, config: &TrackerConfig) -> FrameState {
    FrameState {
        on: detection.mean_intensity > config.on_intensity_threshold,
        intensity: detection.mean_intensity,
        centroid: detection.centroid,
        frame_index,
    }
}

/// Lifecycle counters for logging and run statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerCounters {
    pub created: u64,
    pub evicted: u64,
}

/// Owns the track table and associates each frame's detections with it.
/// Single writer: all mutation goes through `&mut self`.
#[derive(Debug, Clone)]
pub struct Tracker {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    config: TrackerConfig,
    counters: TrackerCounters,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 0,
            config,
            counters: TrackerCounters::default(),
        }
    }

    /// Advances every track by one frame and returns the live tracks in id order.
    pub fn update(&mut self, detections: Vec<Detection>, frame_index: u64) -> Vec<&Track> {
        // --- 0. Discard detections whose position cannot be measured ---
        let total = detections.len();
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(Detection::has_valid_geometry)
            .collect();
        if detections.len() < total {
            debug!(
                frame_index,
                discarded = total - detections.len(),
                "dropped detections without usable geometry"
            );
        }

        // --- 1. Greedy association ---
        let assignments = self.associate(&detections);
        let mut detection_taken = vec![false; detections.len()];
        let mut matched_tracks = Vec::with_capacity(assignments.len());
        for (track_id, detection_index) in assignments {
            if let Some(track) = self.tracks.get_mut(&track_id) {
                track.observe(&detections[detection_index], frame_index, &self.config);
                detection_taken[detection_index] = true;
                matched_tracks.push(track_id);
            }
        }

        // --- 2. Misses and eviction ---
        let mut evicted = Vec::new();
        for (id, track) in self.tracks.iter_mut() {
            if matched_tracks.binary_search(id).is_ok() {
                continue;
            }
            track.miss(frame_index);
            if track.misses > self.config.miss_tolerance {
                evicted.push(*id);
            }
        }
        for id in &evicted {
            self.tracks.remove(id);
            self.counters.evicted += 1;
            debug!(track_id = id, frame_index, "evicted track");
        }

        // --- 3. Births ---
        for (detection, taken) in detections.iter().zip(detection_taken) {
            if taken {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks
                .insert(id, Track::new(id, detection, frame_index, &self.config));
            self.counters.created += 1;
            debug!(
                track_id = id,
                frame_index,
                x = detection.centroid.x,
                y = detection.centroid.y,
                "new track"
            );
        }

        self.tracks.values().collect()
    }

    /// Returns `(track_id, detection_index)` pairs, sorted by track id.
    fn associate(&self, detections: &[Detection]) -> Vec<(u64, usize)> {
        let gate = self.config.max_match_distance;
        let mut candidates: Vec<(f64, u64, usize)> = Vec::new();
        for (id, track) in &self.tracks {
            let last = track.last_centroid();
            for (index, detection) in detections.iter().enumerate() {
                let distance = last.distance_to(&detection.centroid);
                if distance <= gate {
                    candidates.push((distance, *id, index));
                }
            }
        }

        // Cheapest first; equal distances go to the lower track id.
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut track_taken: Vec<u64> = Vec::new();
        let mut detection_taken = vec![false; detections.len()];
        let mut assignments = Vec::new();
        for (_, id, index) in candidates {
            if detection_taken[index] || track_taken.contains(&id) {
                continue;
            }
            detection_taken[index] = true;
            track_taken.push(id);
            assignments.push((id, index));
        }
        assignments.sort_unstable();
        assignments
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Live tracks in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Mutable access for the classification stage.
    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn counters(&self) -> TrackerCounters {
        self.counters
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Drops every track. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

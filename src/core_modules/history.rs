// THEORY:
// Each tracked light remembers a short, fixed-length window of what it looked
// like in recent frames. The window is a FIFO ring: once full, every new entry
// evicts the oldest one, so memory per track is bounded no matter how long the
// video runs, and all temporal statistics describe "the last N frames".

use crate::core_modules::detection::Point;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What one tracked light looked like in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameState {
    pub on: bool,
    /// Mean intensity of the matched detection, or 0.0 for a missed frame.
    pub intensity: f64,
    pub centroid: Point,
    pub frame_index: u64,
}

impl FrameState {
    /// The entry recorded for a frame in which the light was not detected.
    pub fn missed(centroid: Point, frame_index: u64) -> Self {
        Self {
            on: false,
            intensity: 0.0,
            centroid,
            frame_index,
        }
    }
}

/// Fixed-capacity FIFO of `FrameState`s, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct StateHistory {
    entries: VecDeque<FrameState>,
    capacity: usize,
}

impl StateHistory {
    /// Capacity is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `state`, evicting the oldest entry when full.
    pub fn push(&mut self, state: FrameState) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(state);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&FrameState> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &FrameState> + DoubleEndedIterator {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a StateHistory {
    type Item = &'a FrameState;
    type IntoIter = std::collections::vec_deque::Iter<'a, FrameState>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

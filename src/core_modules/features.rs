// THEORY:
// The `features` module condenses a track's history window into a handful of
// numbers that describe its temporal behaviour. It is a pure function of the
// window: no state, no side effects, recomputed every time it is asked.
//
// The blink frequency is the heart of it. A hazard light turns on at a regular
// rhythm, so the gap between consecutive off->on transitions is its period. Gaps
// are measured in capture frame indices, not buffer positions, so a frame that
// was skipped upstream still counts as elapsed time.

use crate::core_modules::history::{FrameState, StateHistory};
use serde::{Deserialize, Serialize};

/// Number of columns in `FeatureVector::to_array`.
pub const FEATURE_COUNT: usize = 12;

/// Temporal statistics of one track's history window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub mean_intensity: f64,
    /// Population standard deviation.
    pub std_intensity: f64,
    /// on->off plus off->on changes between consecutive entries.
    pub transition_count: u32,
    /// Hz; 0.0 when fewer than two off->on transitions are in the window.
    pub blink_frequency: f64,
    /// Sum of centroid steps across the window, in pixels.
    pub total_displacement: f64,
    pub on_fraction: f64,
    /// Mean length, in entries, of maximal constant-state runs.
    pub mean_run_length: f64,
    pub run_length_std: f64,
    pub centroid_mean_x: f64,
    pub centroid_mean_y: f64,
    /// sqrt(var x + var y) of the centroids.
    pub centroid_spread: f64,
    pub window_length: usize,
}

impl FeatureVector {
    /// Column names of `to_array`, in order. This is the training schema.
    pub const FEATURE_NAMES: [&'static str; FEATURE_COUNT] = [
        "mean_intensity",
        "std_intensity",
        "transition_count",
        "blink_frequency",
        "total_displacement",
        "on_fraction",
        "mean_run_length",
        "run_length_std",
        "centroid_mean_x",
        "centroid_mean_y",
        "centroid_spread",
        "window_length",
    ];

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.mean_intensity,
            self.std_intensity,
            self.transition_count as f64,
            self.blink_frequency,
            self.total_displacement,
            self.on_fraction,
            self.mean_run_length,
            self.run_length_std,
            self.centroid_mean_x,
            self.centroid_mean_y,
            self.centroid_spread,
            self.window_length as f64,
        ]
    }

    pub fn feature_index(name: &str) -> Option<usize> {
        Self::FEATURE_NAMES.iter().position(|n| *n == name)
    }
}

/// Turns history windows into `FeatureVector`s at a known capture rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureExtractor {
    frame_rate: f64,
}

impl FeatureExtractor {
    pub fn new(frame_rate: f64) -> Self {
        Self { frame_rate }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn extract(&self, history: &StateHistory) -> FeatureVector {
        let states: Vec<&FrameState> = history.iter().collect();
        if states.is_empty() {
            return FeatureVector::default();
        }
        let n = states.len() as f64;

        let (mean_intensity, std_intensity) =
            mean_and_std(states.iter().map(|s| s.intensity));

        let mut transition_count = 0u32;
        let mut rising_edges: Vec<u64> = Vec::new();
        let mut runs: Vec<f64> = Vec::new();
        let mut current_run = 1.0;
        let mut total_displacement = 0.0;

        for pair in states.windows(2) {
            let (previous, current) = (pair[0], pair[1]);
            total_displacement += previous.centroid.distance_to(&current.centroid);
            if previous.on != current.on {
                transition_count += 1;
                runs.push(current_run);
                current_run = 1.0;
                if current.on {
                    rising_edges.push(current.frame_index);
                }
            } else {
                current_run += 1.0;
            }
        }
        runs.push(current_run);

        let blink_frequency = if rising_edges.len() >= 2 {
            let span = rising_edges[rising_edges.len() - 1].saturating_sub(rising_edges[0]) as f64;
            let mean_gap = span / (rising_edges.len() - 1) as f64;
            if mean_gap > 0.0 {
                self.frame_rate / mean_gap
            } else {
                0.0
            }
        } else {
            0.0
        };

        let (mean_run_length, run_length_std) = mean_and_std(runs.iter().copied());
        let (centroid_mean_x, std_x) = mean_and_std(states.iter().map(|s| s.centroid.x));
        let (centroid_mean_y, std_y) = mean_and_std(states.iter().map(|s| s.centroid.y));
        let on_count = states.iter().filter(|s| s.on).count() as f64;

        FeatureVector {
            mean_intensity,
            std_intensity,
            transition_count,
            blink_frequency,
            total_displacement,
            on_fraction: on_count / n,
            mean_run_length,
            run_length_std,
            centroid_mean_x,
            centroid_mean_y,
            centroid_spread: (std_x.powi(2) + std_y.powi(2)).sqrt(),
            window_length: states.len(),
        }
    }
}

/// Mean and population standard deviation; (0, 0) for an empty input.
fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (count, sum) = values.clone().fold((0usize, 0.0), |(c, s), v| (c + 1, s + v));
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::Point;

    fn history_from(pattern: &[bool], intensity: f64) -> StateHistory {
        let mut history = StateHistory::new(pattern.len().max(1));
        for (frame, on) in pattern.iter().enumerate() {
            history.push(FrameState {
                on: *on,
                intensity: if *on { intensity } else { 0.0 },
                centroid: Point::new(50.0, 50.0),
                frame_index: frame as u64,
            });
        }
        history
    }

    fn square_wave(on: usize, off: usize, total: usize) -> Vec<bool> {
        (0..total).map(|i| i % (on + off) < on).collect()
    }

    #[test]
    fn steady_window_has_no_transitions_and_flat_intensity() {
        let features = FeatureExtractor::new(20.0).extract(&history_from(&[true; 30], 200.0));
        assert_eq!(features.transition_count, 0);
        assert!(features.std_intensity < 1.0);
        assert_eq!(features.mean_intensity, 200.0);
        assert_eq!(features.blink_frequency, 0.0);
        assert_eq!(features.on_fraction, 1.0);
        assert_eq!(features.mean_run_length, 30.0);
        assert_eq!(features.run_length_std, 0.0);
        assert_eq!(features.total_displacement, 0.0);
    }

    #[test]
    fn five_on_five_off_at_ten_fps_is_one_hertz() {
        let pattern = square_wave(5, 5, 30);
        let features = FeatureExtractor::new(10.0).extract(&history_from(&pattern, 220.0));
        assert_eq!(features.transition_count, 5);
        assert!((features.blink_frequency - 1.0).abs() < 1e-9);
        assert!((features.on_fraction - 0.5).abs() < 1e-9);
        assert_eq!(features.mean_run_length, 5.0);
    }

    #[test]
    fn single_rising_edge_has_no_frequency() {
        let mut pattern = vec![false; 5];
        pattern.extend([true; 10]);
        let features = FeatureExtractor::new(30.0).extract(&history_from(&pattern, 200.0));
        assert_eq!(features.transition_count, 1);
        assert_eq!(features.blink_frequency, 0.0);
    }

    #[test]
    fn frequency_uses_frame_indices_not_positions() {
        // Rising edges at frames 4 and 14; several frames in between were never recorded.
        let mut history = StateHistory::new(30);
        let frames: [(u64, bool); 8] = [
            (2, false),
            (4, true),
            (5, true),
            (9, false),
            (14, true),
            (15, true),
            (16, false),
            (17, false),
        ];
        for (frame_index, on) in frames {
            history.push(FrameState {
                on,
                intensity: if on { 200.0 } else { 0.0 },
                centroid: Point::new(0.0, 0.0),
                frame_index,
            });
        }
        let features = FeatureExtractor::new(10.0).extract(&history);
        assert!((features.blink_frequency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn displacement_sums_centroid_steps() {
        let mut history = StateHistory::new(10);
        for (frame, x) in [0.0, 3.0, 6.0].into_iter().enumerate() {
            history.push(FrameState {
                on: true,
                intensity: 200.0,
                centroid: Point::new(x, 0.0),
                frame_index: frame as u64,
            });
        }
        let features = FeatureExtractor::new(30.0).extract(&history);
        assert_eq!(features.total_displacement, 6.0);
        assert_eq!(features.centroid_mean_x, 3.0);
        assert!((features.centroid_spread - 6.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn empty_history_yields_zeroed_features() {
        let features = FeatureExtractor::new(30.0).extract(&StateHistory::new(5));
        assert_eq!(features, FeatureVector::default());
    }

    #[test]
    fn schema_and_array_line_up() {
        assert_eq!(FeatureVector::FEATURE_NAMES.len(), FEATURE_COUNT);
        let features = FeatureVector {
            transition_count: 4,
            window_length: 30,
            ..FeatureVector::default()
        };
        let row = features.to_array();
        assert_eq!(row[FeatureVector::feature_index("transition_count").unwrap()], 4.0);
        assert_eq!(row[FeatureVector::feature_index("window_length").unwrap()], 30.0);
        assert_eq!(FeatureVector::feature_index("nope"), None);
    }
}

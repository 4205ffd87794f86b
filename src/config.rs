// THEORY:
// Every tunable threshold of the engine lives in one explicit `PipelineConfig`
// tree. Each component receives its own sub-config at construction time, so two
// pipelines with different settings can coexist in one process and tests can
// pin any value without touching globals.
//
// The whole tree deserializes from YAML and every field has a default, so a
// config file only needs to mention what it changes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration for the light inspection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Width in pixels of every frame fed to the pipeline.
    pub image_width: u32,
    /// Height in pixels of every frame fed to the pipeline.
    pub image_height: u32,
    /// Assumed capture rate in Hz, used to turn frame gaps into a blink frequency.
    /// A `FrameSource` that knows its real rate overrides this.
    pub frame_rate: f64,
    pub detection: DetectionConfig,
    pub tracker: TrackerConfig,
    pub classifier: ClassifierConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_width: 0,
            image_height: 0,
            frame_rate: 30.0,
            detection: DetectionConfig::default(),
            tracker: TrackerConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Thresholds for single-frame light segmentation.
/// HSV values use the 8-bit scale: hue 0-180, saturation and value 0-255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Regions with fewer mask pixels than this are discarded.
    pub min_area: u32,
    /// Regions with more mask pixels than this are discarded.
    pub max_area: u32,
    /// Accepted bounding box width / height.
    pub aspect_ratio_range: AspectRatioRange,
    /// Minimum HSV value for a low-saturation pixel to count as "bright".
    pub intensity_threshold: u8,
    pub white: WhiteRange,
    pub amber: AmberRange,
    /// Side of the square structuring element used for closing and opening.
    /// 0 or 1 disables morphology.
    pub morphology_kernel_size: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_area: 100,
            max_area: 50_000,
            aspect_ratio_range: AspectRatioRange::default(),
            intensity_threshold: 150,
            white: WhiteRange::default(),
            amber: AmberRange::default(),
            morphology_kernel_size: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AspectRatioRange {
    pub min: f64,
    pub max: f64,
}

impl Default for AspectRatioRange {
    fn default() -> Self {
        Self { min: 0.3, max: 3.0 }
    }
}

impl AspectRatioRange {
    pub fn contains(&self, ratio: f64) -> bool {
        ratio >= self.min && ratio <= self.max
    }
}

/// White/clear lamps: nearly colourless pixels. Their brightness floor is
/// `DetectionConfig::intensity_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteRange {
    pub max_saturation: u8,
}

impl Default for WhiteRange {
    fn default() -> Self {
        Self { max_saturation: 30 }
    }
}

/// Amber/yellow lamps, the usual colour of hazard lights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmberRange {
    pub hue_min: u8,
    pub hue_max: u8,
    pub min_saturation: u8,
    pub min_value: u8,
}

impl Default for AmberRange {
    fn default() -> Self {
        Self {
            hue_min: 20,
            hue_max: 30,
            min_saturation: 100,
            min_value: 100,
        }
    }
}

/// Association and history settings for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Largest centroid jump (pixels) still accepted as the same light.
    pub max_match_distance: f64,
    /// Consecutive missed frames a track survives. One more and it is evicted.
    pub miss_tolerance: u32,
    /// Capacity of each track's history ring buffer.
    pub frame_buffer_size: usize,
    /// A detection is recorded as "on" only when brighter than this.
    pub on_intensity_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_match_distance: 50.0,
            miss_tolerance: 5,
            frame_buffer_size: 30,
            on_intensity_threshold: 180.0,
        }
    }
}

/// Labelling settings shared by the rule-based and model-based strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// A track stays `ANALYZING` until its history holds this many entries.
    pub min_history_for_classification: usize,
    pub hazard_band: FrequencyBand,
    /// Model verdicts below this probability fall back to the rules.
    pub probability_threshold: f64,
    /// Optional JSON forest artifact. Missing or corrupt files degrade to rules.
    pub model_path: Option<PathBuf>,
    /// Majority vote over the last K labels of a track. 0 or 1 disables it.
    pub label_smoothing_window: usize,
    /// Rule-based blink verdicts whose window moved further than this (pixels)
    /// are demoted to `ANALYZING`.
    pub max_blink_displacement: Option<f64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_history_for_classification: 10,
            hazard_band: FrequencyBand::default(),
            probability_threshold: 0.6,
            model_path: None,
            label_smoothing_window: 0,
            max_blink_displacement: None,
        }
    }
}

/// Inclusive frequency band, in Hz, that counts as hazard blinking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyBand {
    pub min_hz: f64,
    pub max_hz: f64,
}

impl Default for FrequencyBand {
    fn default() -> Self {
        Self {
            min_hz: 0.5,
            max_hz: 3.0,
        }
    }
}

impl FrequencyBand {
    pub fn contains(&self, hz: f64) -> bool {
        hz >= self.min_hz && hz <= self.max_hz
    }

    /// 1.0 at the centre of the band, falling linearly to 0.0 at either edge.
    pub fn centeredness(&self, hz: f64) -> f64 {
        let half_width = (self.max_hz - self.min_hz) / 2.0;
        if half_width <= 0.0 {
            return if self.contains(hz) { 1.0 } else { 0.0 };
        }
        let center = self.min_hz + half_width;
        (1.0 - (hz - center).abs() / half_width).clamp(0.0, 1.0)
    }
}

impl PipelineConfig {
    /// Creates a default config for frames of the given size.
    pub fn for_frame_size(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            ..Self::default()
        }
    }

    /// Reads a YAML config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Rejects settings under which the pipeline cannot behave sensibly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(ConfigError::invalid(
                "image_width/image_height",
                format!("frame size {}x{} is empty", self.image_width, self.image_height),
            ));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::invalid(
                "frame_rate",
                format!("{} is not a positive rate", self.frame_rate),
            ));
        }

        let detection = &self.detection;
        if detection.min_area > detection.max_area {
            return Err(ConfigError::invalid(
                "detection.min_area",
                format!("{} exceeds max_area {}", detection.min_area, detection.max_area),
            ));
        }
        let aspect = detection.aspect_ratio_range;
        if !(aspect.min > 0.0 && aspect.min <= aspect.max) {
            return Err(ConfigError::invalid(
                "detection.aspect_ratio_range",
                format!("[{}, {}] is not a valid range", aspect.min, aspect.max),
            ));
        }
        if detection.amber.hue_min > detection.amber.hue_max {
            return Err(ConfigError::invalid(
                "detection.amber",
                format!(
                    "hue_min {} exceeds hue_max {}",
                    detection.amber.hue_min, detection.amber.hue_max
                ),
            ));
        }

        let tracker = &self.tracker;
        if !tracker.max_match_distance.is_finite() || tracker.max_match_distance < 0.0 {
            return Err(ConfigError::invalid(
                "tracker.max_match_distance",
                format!("{} is not a usable distance", tracker.max_match_distance),
            ));
        }
        if !tracker.on_intensity_threshold.is_finite() {
            return Err(ConfigError::invalid(
                "tracker.on_intensity_threshold",
                format!("{} is not a usable intensity", tracker.on_intensity_threshold),
            ));
        }
        if tracker.frame_buffer_size == 0 {
            return Err(ConfigError::invalid("tracker.frame_buffer_size", "must be at least 1"));
        }

        let classifier = &self.classifier;
        if classifier.min_history_for_classification > tracker.frame_buffer_size {
            return Err(ConfigError::invalid(
                "classifier.min_history_for_classification",
                format!(
                    "{} exceeds tracker.frame_buffer_size {}; no track could ever be classified",
                    classifier.min_history_for_classification, tracker.frame_buffer_size
                ),
            ));
        }
        let band = classifier.hazard_band;
        if !(band.min_hz >= 0.0 && band.min_hz <= band.max_hz) {
            return Err(ConfigError::invalid(
                "classifier.hazard_band",
                format!("[{}, {}] is not a valid band", band.min_hz, band.max_hz),
            ));
        }
        if !(0.0..=1.0).contains(&classifier.probability_threshold) {
            return Err(ConfigError::invalid(
                "classifier.probability_threshold",
                format!("{} is outside [0, 1]", classifier.probability_threshold),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.detection.min_area, 100);
        assert_eq!(config.detection.intensity_threshold, 150);
        assert_eq!(config.detection.aspect_ratio_range, AspectRatioRange { min: 0.3, max: 3.0 });
        assert_eq!(config.tracker.max_match_distance, 50.0);
        assert_eq!(config.tracker.miss_tolerance, 5);
        assert_eq!(config.tracker.frame_buffer_size, 30);
        assert_eq!(config.classifier.min_history_for_classification, 10);
        assert_eq!(config.classifier.hazard_band, FrequencyBand { min_hz: 0.5, max_hz: 3.0 });
        assert_eq!(config.classifier.probability_threshold, 0.6);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r#"
image_width: 640
image_height: 480
frame_rate: 20.0
tracker:
  miss_tolerance: 3
classifier:
  hazard_band:
    max_hz: 2.5
"#;
        let config = PipelineConfig::from_yaml(yaml).expect("yaml should parse");
        assert_eq!(config.image_width, 640);
        assert_eq!(config.frame_rate, 20.0);
        assert_eq!(config.tracker.miss_tolerance, 3);
        assert_eq!(config.tracker.frame_buffer_size, 30);
        assert_eq!(config.classifier.hazard_band.min_hz, 0.5);
        assert_eq!(config.classifier.hazard_band.max_hz, 2.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, "image_width: 32\nimage_height: 16\n").expect("write config");

        let config = PipelineConfig::load(&path).expect("config should load");
        assert_eq!((config.image_width, config.image_height), (32, 16));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PipelineConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn validation_rejects_unclassifiable_history() {
        let mut config = PipelineConfig::for_frame_size(64, 64);
        config.tracker.frame_buffer_size = 8;
        config.classifier.min_history_for_classification = 10;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "classifier.min_history_for_classification", .. }
        ));
    }

    #[test]
    fn validation_rejects_empty_frames_and_bad_rates() {
        assert!(PipelineConfig::default().validate().is_err());

        let mut config = PipelineConfig::for_frame_size(64, 64);
        config.frame_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::for_frame_size(64, 64);
        config.classifier.hazard_band = FrequencyBand { min_hz: 3.0, max_hz: 0.5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_nan_on_threshold() {
        let yaml = "image_width: 64\nimage_height: 64\ntracker:\n  on_intensity_threshold: .nan\n";
        let config = PipelineConfig::from_yaml(yaml).expect("yaml should parse");
        assert!(config.tracker.on_intensity_threshold.is_nan());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "tracker.on_intensity_threshold", .. }
        ));
    }

    #[test]
    fn band_centeredness_peaks_in_the_middle() {
        let band = FrequencyBand::default();
        assert!((band.centeredness(1.75) - 1.0).abs() < 1e-9);
        assert!((band.centeredness(1.0) - 0.4).abs() < 1e-9);
        assert_eq!(band.centeredness(0.5), 0.0);
        assert_eq!(band.centeredness(5.0), 0.0);
    }
}

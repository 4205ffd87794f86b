// THEORY:
// This file is the main entry point for the `hazard_vision` library crate. It
// tells steady vehicle running lights from blinking hazard lights by watching
// how each light behaves over time, not how it looks in any single frame.
//
// The engine is layered, bottom to top:
// - `core_modules::pixel` and `core_modules::light_segmenter`: one frame at a
//   time, find bright white or amber regions.
// - `core_modules::tracker`: give each region a persistent identity and a
//   bounded history of on/off states across frames.
// - `core_modules::features` and `core_modules::classifier`: condense a track's
//   history into temporal statistics and label it RUNNING, BLINKING or
//   ANALYZING.
// - `pipeline` and `parallel_pipeline`: the public entry points, sequential and
//   concurrent, both producing one `FrameReport` per frame.
//
// Frame acquisition (`source`) and training export (`training`) sit at the edges.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod source;
pub mod training;

pub use config::PipelineConfig;
pub use core_modules::classifier::{Classification, ClassifierModel, Label};
pub use core_modules::detection::{BoundingBox, Detection, LightColor, Point};
pub use core_modules::features::{FeatureExtractor, FeatureVector};
pub use core_modules::forest_model::ForestModel;
pub use error::{ConfigError, InputError, ModelError, VisionError};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{FrameReport, LightCounts, LightReport, PipelineStats, VisionPipeline};
pub use source::{FrameSource, ImageSequenceSource};
pub use training::{FeatureDataset, TrainingSample};

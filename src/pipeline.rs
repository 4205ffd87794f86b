// THEORY:
// The `pipeline` module is the top-level, frame-at-a-time API of the engine. It
// wires the layers together in their fixed order:
//
//     segment -> track -> (extract features -> classify) per track -> report
//
// Segmentation looks at one frame in isolation. Everything after it reads or
// writes the track table, which only makes sense when frames arrive in capture
// order and are applied by a single writer. That second half is factored out as
// `TrackingStage` so the sequential `VisionPipeline` and the concurrent
// `ParallelPipeline` share exactly the same temporal logic.

use crate::config::PipelineConfig;
use crate::core_modules::classifier::{Classifier, ClassifierModel, Label};
use crate::core_modules::detection::{BoundingBox, Detection, LightColor};
use crate::core_modules::features::{FeatureExtractor, FeatureVector};
use crate::core_modules::light_segmenter::LightSegmenter;
use crate::core_modules::smoother::LabelSmoother;
use crate::core_modules::tracker::{Track, Tracker};
use crate::error::VisionError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One tracked light as handed to a renderer: `(track_id, bounding_box, label, confidence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightReport {
    pub track_id: u64,
    pub bounding_box: BoundingBox,
    pub label: Label,
    pub confidence: f64,
    pub color: LightColor,
    /// False while the track is coasting through missed frames.
    pub visible: bool,
}

/// Per-label tallies for a summary panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightCounts {
    pub running: usize,
    pub blinking: usize,
    pub analyzing: usize,
    pub total: usize,
}

impl LightCounts {
    pub fn tally<'a>(lights: impl IntoIterator<Item = &'a LightReport>) -> Self {
        let mut counts = Self::default();
        for light in lights {
            match light.label {
                Label::Running => counts.running += 1,
                Label::Blinking => counts.blinking += 1,
                Label::Analyzing => counts.analyzing += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

/// The output of the pipeline for a single frame. Lights are ordered by track id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub lights: Vec<LightReport>,
    pub counts: LightCounts,
}

impl FrameReport {
    pub fn light(&self, track_id: u64) -> Option<&LightReport> {
        self.lights.iter().find(|l| l.track_id == track_id)
    }
}

/// Counters for one run of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub frames_processed: u64,
    /// Frames rejected as malformed.
    pub frames_skipped: u64,
    pub tracks_created: u64,
    pub tracks_evicted: u64,
    pub elapsed: Duration,
}

impl PipelineStats {
    /// Processed frames per second of wall-clock time.
    pub fn fps(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.frames_processed as f64 / seconds
        } else {
            0.0
        }
    }

    pub(crate) fn log_summary(&self, pipeline: &'static str) {
        info!(
            pipeline,
            frames_received = self.frames_received,
            frames_processed = self.frames_processed,
            frames_skipped = self.frames_skipped,
            tracks_created = self.tracks_created,
            tracks_evicted = self.tracks_evicted,
            elapsed_ms = self.elapsed.as_millis() as u64,
            fps = self.fps(),
            "run finished"
        );
    }
}

/// The single-writer half of the engine: tracker, feature extraction and
/// classification applied to one frame's detections.
#[derive(Debug)]
pub struct TrackingStage {
    tracker: Tracker,
    extractor: FeatureExtractor,
    classifier: Classifier,
    smoother: LabelSmoother,
    last_frame: Option<u64>,
}

impl TrackingStage {
    pub fn new(config: &PipelineConfig, classifier: Classifier) -> Self {
        Self {
            tracker: Tracker::new(config.tracker.clone()),
            extractor: FeatureExtractor::new(config.frame_rate),
            smoother: LabelSmoother::new(config.classifier.label_smoothing_window),
            classifier,
            last_frame: None,
        }
    }

    /// True when `frame_index` comes after every frame applied so far.
    pub fn accepts(&self, frame_index: u64) -> bool {
        self.last_frame.is_none_or(|last| frame_index > last)
    }

    /// Applies one frame. Frame indices must be strictly increasing; an index at
    /// or below the last applied one leaves the track table untouched and the
    /// report shows it as it stands.
    pub fn advance(&mut self, detections: Vec<Detection>, frame_index: u64) -> FrameReport {
        if !self.accepts(frame_index) {
            warn!(frame_index, last_frame = ?self.last_frame, "ignoring out-of-order frame");
            return self.snapshot(frame_index);
        }
        self.last_frame = Some(frame_index);
        let detected = detections.len();
        self.tracker.update(detections, frame_index);

        let mut lights = Vec::with_capacity(self.tracker.len());
        for track in self.tracker.tracks_mut() {
            let features = self.extractor.extract(track.history());
            let fresh = self.classifier.classify(&features, track.history().len());
            let verdict = self.smoother.smooth(&mut track.label_votes, fresh);
            track.set_classification(verdict.label, verdict.confidence);
            lights.push(light_report(track));
        }

        let counts = LightCounts::tally(&lights);
        debug!(
            frame_index,
            detected,
            tracks = counts.total,
            running = counts.running,
            blinking = counts.blinking,
            "frame classified"
        );
        FrameReport {
            frame_index,
            lights,
            counts,
        }
    }

    /// The track table as of the last applied frame, without touching it.
    pub fn snapshot(&self, frame_index: u64) -> FrameReport {
        let lights: Vec<LightReport> = self.tracker.tracks().map(light_report).collect();
        FrameReport {
            frame_index,
            counts: LightCounts::tally(&lights),
            lights,
        }
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// Replaces the assumed capture rate, e.g. with one reported by a source.
    /// Non-positive or non-finite rates are ignored.
    pub fn set_frame_rate(&mut self, frame_rate: f64) {
        if frame_rate.is_finite() && frame_rate > 0.0 {
            self.extractor = FeatureExtractor::new(frame_rate);
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Drops the whole track table.
    pub fn reset(&mut self) {
        self.tracker.clear();
        self.last_frame = None;
    }
}

fn light_report(track: &Track) -> LightReport {
    LightReport {
        track_id: track.id,
        bounding_box: track.bounding_box(),
        label: track.label(),
        confidence: track.confidence(),
        color: track.color(),
        visible: track.is_visible(),
    }
}

/// Sequential, synchronous pipeline: one `process_frame` call per captured frame.
#[derive(Debug)]
pub struct VisionPipeline {
    segmenter: LightSegmenter,
    stage: TrackingStage,
    config: PipelineConfig,
    next_frame_index: u64,
    stats: PipelineStats,
    started: Option<Instant>,
}

impl VisionPipeline {
    /// Validates `config` and builds a pipeline. The classifier is model-based
    /// when `classifier.model_path` loads, rule-based otherwise.
    pub fn new(config: PipelineConfig) -> Result<Self, VisionError> {
        config.validate()?;
        let classifier = Classifier::from_config(config.classifier.clone());
        Ok(Self::assemble(config, classifier))
    }

    /// Builds a pipeline around an injected model, ignoring `model_path`.
    pub fn with_model(
        config: PipelineConfig,
        model: Box<dyn ClassifierModel>,
    ) -> Result<Self, VisionError> {
        config.validate()?;
        let classifier = Classifier::with_model(model, config.classifier.clone());
        Ok(Self::assemble(config, classifier))
    }

    fn assemble(config: PipelineConfig, classifier: Classifier) -> Self {
        info!(
            width = config.image_width,
            height = config.image_height,
            frame_rate = config.frame_rate,
            strategy = classifier.strategy_name(),
            "vision pipeline ready"
        );
        Self {
            segmenter: LightSegmenter::new(
                config.image_width,
                config.image_height,
                config.detection.clone(),
            ),
            stage: TrackingStage::new(&config, classifier),
            config,
            next_frame_index: 0,
            stats: PipelineStats::default(),
            started: None,
        }
    }

    /// Runs one RGBA8 frame through the whole pipeline.
    ///
    /// A malformed frame is logged and returned as an error; its index is still
    /// consumed, so the next frame continues the timeline normally.
    pub fn process_frame(&mut self, frame: &[u8]) -> Result<FrameReport, VisionError> {
        self.started.get_or_insert_with(Instant::now);
        let frame_index = self.next_frame_index;
        self.next_frame_index = self.next_frame_index.saturating_add(1);
        self.stats.frames_received += 1;

        let detections = match self.segmenter.segment(frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.stats.frames_skipped += 1;
                warn!(frame_index, error = %err, "skipping malformed frame");
                return Err(err.into());
            }
        };

        let report = self.stage.advance(detections, frame_index);
        self.stats.frames_processed += 1;
        Ok(report)
    }

    /// Accounts for a frame that never arrived, e.g. one the source could not
    /// read. Its index is consumed so blink timing still sees the gap.
    pub fn skip_frame(&mut self) -> u64 {
        self.started.get_or_insert_with(Instant::now);
        let frame_index = self.next_frame_index;
        self.next_frame_index = self.next_frame_index.saturating_add(1);
        self.stats.frames_received += 1;
        self.stats.frames_skipped += 1;
        frame_index
    }

    /// Runs only the tracking and classification stage on pre-computed detections.
    ///
    /// An index at or below the last applied one is counted as skipped and
    /// answered with the unchanged track table.
    pub fn process_detections(
        &mut self,
        detections: Vec<Detection>,
        frame_index: u64,
    ) -> FrameReport {
        self.started.get_or_insert_with(Instant::now);
        self.stats.frames_received += 1;
        if !self.stage.accepts(frame_index) {
            self.stats.frames_skipped += 1;
            warn!(frame_index, "skipping out-of-order detections");
            return self.stage.snapshot(frame_index);
        }
        self.next_frame_index = self.next_frame_index.max(frame_index.saturating_add(1));
        let report = self.stage.advance(detections, frame_index);
        self.stats.frames_processed += 1;
        report
    }

    /// Live tracks in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.stage.tracker().tracks()
    }

    /// Current feature vector of every live track, in id order.
    pub fn track_features(&self) -> impl Iterator<Item = (&Track, FeatureVector)> {
        let extractor = *self.stage.extractor();
        self.tracks()
            .map(move |track| (track, extractor.extract(track.history())))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.stage.classifier().strategy_name()
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = self.stage.tracker().counters();
        PipelineStats {
            tracks_created: counters.created,
            tracks_evicted: counters.evicted,
            elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
            ..self.stats
        }
    }

    /// Ends the run: logs the statistics and discards the track table.
    pub fn finish(mut self) -> PipelineStats {
        let stats = self.stats();
        self.stage.reset();
        stats.log_summary("sequential");
        stats
    }
}

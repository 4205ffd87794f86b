// THEORY:
// Model fitting happens outside this crate. What the crate owns is the contract
// a fitting process consumes: feature rows in the fixed column order of
// `FeatureVector::FEATURE_NAMES`, each tagged with a ground-truth label. A
// recording known to show only running lights (or only hazards) is played
// through the pipeline and every track with enough history contributes one row
// per frame.
//
// File layout is JSON lines. The first line is the schema header, every other
// line one sample.

use crate::core_modules::classifier::Label;
use crate::core_modules::features::{FEATURE_COUNT, FeatureVector};
use crate::error::VisionError;
use crate::pipeline::VisionPipeline;
use crate::source::FrameSource;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SchemaHeader {
    feature_names: Vec<String>,
}

/// One labelled feature row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub label: Label,
    pub track_id: u64,
    pub frame_index: u64,
    /// Columns in `FeatureVector::FEATURE_NAMES` order.
    pub features: [f64; FEATURE_COUNT],
}

/// Labelled rows gathered from one or more recordings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDataset {
    samples: Vec<TrainingSample>,
}

impl FeatureDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one row per live track whose history has reached the classification
    /// minimum. Returns how many rows were added.
    pub fn collect(&mut self, pipeline: &VisionPipeline, frame_index: u64, label: Label) -> usize {
        let min_history = pipeline.config().classifier.min_history_for_classification;
        let before = self.samples.len();
        for (track, features) in pipeline.track_features() {
            if track.history().len() < min_history {
                continue;
            }
            self.push(label, track.id, frame_index, &features);
        }
        self.samples.len() - before
    }

    /// Plays `source` to the end through `pipeline`, collecting rows after every
    /// frame. An unreadable frame still consumes a frame index, the same as in
    /// `ParallelPipeline::run`, so the exported timing matches inference.
    pub async fn record<S: FrameSource>(
        &mut self,
        pipeline: &mut VisionPipeline,
        source: &mut S,
        label: Label,
    ) -> Result<usize, VisionError> {
        let before = self.samples.len();
        while let Some(frame) = source.next_frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    let frame_index = pipeline.skip_frame();
                    warn!(frame_index, error = %err, "skipping unreadable frame");
                    continue;
                }
            };
            match pipeline.process_frame(&frame) {
                Ok(report) => {
                    self.collect(pipeline, report.frame_index, label);
                }
                Err(err) if err.is_recoverable() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(self.samples.len() - before)
    }

    pub fn push(&mut self, label: Label, track_id: u64, frame_index: u64, features: &FeatureVector) {
        self.samples.push(TrainingSample {
            label,
            track_id,
            frame_index,
            features: features.to_array(),
        });
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn count(&self, label: Label) -> usize {
        self.samples.iter().filter(|s| s.label == label).count()
    }

    pub fn extend(&mut self, other: FeatureDataset) {
        self.samples.extend(other.samples);
    }

    pub fn write_jsonl(&self, writer: impl Write) -> io::Result<()> {
        let mut writer = BufWriter::new(writer);
        let header = SchemaHeader {
            feature_names: FeatureVector::FEATURE_NAMES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;
        for sample in &self.samples {
            serde_json::to_writer(&mut writer, sample)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        self.write_jsonl(File::create(path)?)
    }

    /// Reads a file written by `write_jsonl`. A header with a different column
    /// order is rejected.
    pub fn read_jsonl(reader: impl io::Read) -> io::Result<Self> {
        let mut lines = BufReader::new(reader).lines();
        let header_line = lines
            .next()
            .transpose()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing schema header"))?;
        let header: SchemaHeader = serde_json::from_str(&header_line)?;
        if header.feature_names != FeatureVector::FEATURE_NAMES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("feature schema mismatch: {:?}", header.feature_names),
            ));
        }

        let mut samples = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            samples.push(serde_json::from_str(&line)?);
        }
        Ok(Self { samples })
    }
}

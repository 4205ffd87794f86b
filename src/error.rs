// THEORY:
// Errors in this crate fall into two families. Per-frame problems (a malformed
// buffer) are recoverable: the frame is skipped and the stream continues.
// Construction-time problems (bad config, unreadable model) are surfaced once,
// and the caller decides whether to degrade or stop. Nothing here is fatal to a
// running pipeline by itself.

use std::path::PathBuf;
use thiserror::Error;

/// A frame that cannot be interpreted as an RGBA8 image of the configured size.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("frame has zero dimensions ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A classifier model artifact that could not be used.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot read model artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid model: {0}")]
    Invalid(String),
}

/// A configuration that could not be loaded or does not make sense.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Umbrella error for the vision engine.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("frame source failed: {0}")]
    Source(String),

    #[error("segmentation worker failed: {0}")]
    Worker(String),

    #[error("pipeline channel closed")]
    PipelineClosed,
}

impl VisionError {
    /// Frame-level errors are skipped by the pipelines; everything else is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Input(_) | Self::Source(_) | Self::Worker(_))
    }
}

//! Error taxonomy for the frame pipeline.
//!
//! Frame-scoped errors (`ConversionError`, `ClassifierError`, `DetectionFailure`)
//! are reported and counted but never stop the worker. `ClassificationConfigError`
//! and `ConfigError` are raised while building the pipeline, before any frame.

use thiserror::Error;

use crate::capture::frame::PixelFormat;

/// Failure to turn a raw sensor frame into a renderable RGB image.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("frame {sequence} carries no image payload")]
    MissingPayload { sequence: u64 },

    #[error("frame is {actual:?} but the frame buffer is locked to {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("plane layout invalid for {format:?}: {reason}")]
    PlaneLayout {
        format: PixelFormat,
        reason: &'static str,
    },

    #[error("compressed payload could not be decoded: {0}")]
    Decode(String),
}

/// Model input shape does not fit the frames the pipeline will feed it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassificationConfigError {
    #[error("model expects {0} channels, pipeline produces 3")]
    ChannelCount(u32),

    #[error("model input {width}x{height} is not square")]
    NotSquare { width: u32, height: u32 },

    #[error("model input shape has a zero dimension")]
    EmptyShape,

    #[error("model input {model:?} differs from frame shape {frame:?} and resizing is disabled")]
    ShapeMismatch { model: (u32, u32), frame: (u32, u32) },

    #[error("model does not support the {0:?} device")]
    UnsupportedDevice(crate::inference::Device),

    #[error("model rejected {device:?} settings: {reason}")]
    Configure {
        device: crate::inference::Device,
        reason: String,
    },
}

/// Runtime failure inside a classifier backend.
#[derive(Debug, Error)]
#[error("classifier failed: {0}")]
pub struct ClassifierError(pub String);

/// Runtime failure inside a detector backend.
#[derive(Debug, Error)]
#[error("detector failed: {0}")]
pub struct DetectorError(pub String);

/// An asynchronous detection call failed. Observed only; never reaches the
/// result sink or the overlay.
#[derive(Debug, Clone, Error)]
#[error("detection for frame {sequence} failed: {reason}")]
pub struct DetectionFailure {
    pub sequence: u64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced while assembling or running the pipeline as a whole.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Classification(#[from] ClassificationConfigError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline worker did not stop within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

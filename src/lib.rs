//! Live camera-frame analysis pipeline: keep-only-latest frame admission,
//! colorspace conversion into a reusable buffer, synchronous classification
//! and asynchronous detection feeding a single-slot bounding-box overlay.

pub mod capture;
pub mod diagnostics;
pub mod display;
pub mod error;
pub mod inference;
pub mod pipeline;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::inference::Device;

/// Prefix of environment variables overriding the config, e.g.
/// `LOOKOUT__PIPELINE__TOP_K=5`.
pub const ENV_PREFIX: &str = "LOOKOUT";

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub model: ModelConfig,
    pub detector: DetectorConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Clockwise sensor rotation: 0, 90, 180 or 270.
    pub rotation_degrees: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub top_k: usize,
    /// Frames held for the worker; older ones are released when full.
    pub queue_depth: usize,
    pub shutdown_grace_ms: u64,
    pub pin_worker_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Side of the square classifier input.
    pub input_size: u32,
    pub device: Device,
    /// CPU threads when no accelerator is used.
    pub num_threads: usize,
    pub resize_to_input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Children of the render surface the overlay never touches. The overlay
    /// slot sits right after them.
    pub base_children: usize,
    pub stroke_width: f32,
    pub color: [u8; 4],
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Yuv420,
            rotation_degrees: 90,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            queue_depth: 1,
            shutdown_grace_ms: 1000,
            pin_worker_core: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            device: Device::Auto,
            num_threads: 4,
            resize_to_input: true,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            base_children: 2,
            stroke_width: 8.0,
            color: [0, 255, 0, 255],
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `LOOKOUT__*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture dimensions must be non-zero");
        }
        if !matches!(self.capture.rotation_degrees, 0 | 90 | 180 | 270) {
            return invalid("capture.rotation_degrees must be 0, 90, 180 or 270");
        }
        if self.pipeline.top_k == 0 {
            return invalid("pipeline.top_k must be at least 1");
        }
        if self.model.input_size == 0 {
            return invalid("model.input_size must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return invalid("detector.confidence_threshold must lie in [0, 1]");
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pipeline.shutdown_grace_ms)
    }
}

/// Counters collected throughout the pipeline
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub admitted: u64,
    pub processed: u64,
    pub dropped_busy: u64,
    pub dropped_superseded: u64,
    pub dropped_shutdown: u64,
    pub conversion_failures: u64,
    pub classification_failures: u64,
    pub detection_failures: u64,
    pub detections_skipped: u64,
    /// Frames whose processing panicked; the worker carried on.
    pub worker_panics: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.top_k, 3);
        assert_eq!(config.overlay.base_children, 2);
    }

    #[test]
    fn rejects_odd_rotation() {
        let mut config = Config::default();
        config.capture.rotation_degrees = 45;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_toml_overrides() {
        let path = std::env::temp_dir().join(format!("lookout-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[pipeline]\ntop_k = 5\n\n[capture]\nwidth = 320\nformat = \"Yuyv\"\n",
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.pipeline.top_k, 5);
        assert_eq!(config.capture.width, 320);
        assert_eq!(config.capture.height, 480);
        assert_eq!(config.capture.format, PixelFormat::Yuyv);
    }

    #[test]
    fn global_config_swaps_atomically() {
        let mut next = Config::default();
        next.pipeline.top_k = 7;
        let previous = CONFIG.swap(std::sync::Arc::new(next));
        assert_eq!(CONFIG.load().pipeline.top_k, 7);
        CONFIG.store(previous);
    }
}

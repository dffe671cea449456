//! Whole-image classification: tensor preparation, acceleration selection and
//! top-K ranking.

use std::time::Instant;

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClassificationConfigError, ClassifierError};
use crate::inference::types::{Detection, RankedResult};
use crate::ModelConfig;

/// Input tensor shape of a classifier (HxWxC, values normalized to [0, 1]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl InputShape {
    pub fn square_rgb(side: u32) -> Self {
        Self {
            width: side,
            height: side,
            channels: 3,
        }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a model runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// GPU when the model supports it, CPU otherwise.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

/// Resolved acceleration settings handed to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOptions {
    pub device: Device,
    pub num_threads: usize,
}

impl ModelOptions {
    pub fn select(requested: Device, gpu_supported: bool, num_threads: usize) -> Self {
        let device = match requested {
            Device::Gpu | Device::Auto if gpu_supported => Device::Gpu,
            Device::Gpu => {
                warn!("GPU delegate requested but not supported, using CPU");
                Device::Cpu
            }
            _ => Device::Cpu,
        };
        Self {
            device,
            num_threads: num_threads.max(1),
        }
    }
}

/// A fixed-input-size image classifier.
///
/// Implementations score every class they know; ranking happens in
/// [`ClassificationEngine`].
pub trait Classifier: Send {
    fn input_shape(&self) -> InputShape;

    fn supports(&self, device: Device) -> bool {
        device == Device::Cpu
    }

    /// Apply acceleration settings before the first prediction.
    fn configure(&mut self, _options: &ModelOptions) -> Result<(), ClassifierError> {
        Ok(())
    }

    /// Score a row-major HxWx3 tensor with values in [0, 1].
    fn predict(&mut self, tensor: &[f32]) -> Result<Vec<Detection>, ClassifierError>;
}

/// Runs a [`Classifier`] on converted frames and ranks its output.
pub struct ClassificationEngine {
    model: Box<dyn Classifier>,
    shape: InputShape,
    options: ModelOptions,
    top_k: usize,
    tensor: Vec<f32>,
}

impl ClassificationEngine {
    /// Validate the model against the frames it will receive.
    ///
    /// `frame_dims` is the shape of the converted image after rotation.
    pub fn new(
        mut model: Box<dyn Classifier>,
        config: &ModelConfig,
        frame_dims: (u32, u32),
        top_k: usize,
    ) -> Result<Self, ClassificationConfigError> {
        let shape = model.input_shape();
        if shape.width == 0 || shape.height == 0 {
            return Err(ClassificationConfigError::EmptyShape);
        }
        if shape.channels != 3 {
            return Err(ClassificationConfigError::ChannelCount(shape.channels));
        }
        if shape.width != shape.height {
            return Err(ClassificationConfigError::NotSquare {
                width: shape.width,
                height: shape.height,
            });
        }
        if !config.resize_to_input && frame_dims != (shape.width, shape.height) {
            return Err(ClassificationConfigError::ShapeMismatch {
                model: (shape.width, shape.height),
                frame: frame_dims,
            });
        }

        let options = ModelOptions::select(
            config.device,
            model.supports(Device::Gpu),
            config.num_threads,
        );
        if !model.supports(options.device) {
            return Err(ClassificationConfigError::UnsupportedDevice(options.device));
        }
        model
            .configure(&options)
            .map_err(|e| ClassificationConfigError::Configure {
                device: options.device,
                reason: e.0,
            })?;

        info!(
            "Classifier ready: input {}x{}x{}, device {:?}, {} threads, top-{}",
            shape.width, shape.height, shape.channels, options.device, options.num_threads, top_k
        );

        Ok(Self {
            model,
            shape,
            options,
            top_k,
            tensor: vec![0.0; shape.len()],
        })
    }

    pub fn options(&self) -> ModelOptions {
        self.options
    }

    pub fn input_shape(&self) -> InputShape {
        self.shape
    }

    pub fn classify(
        &mut self,
        image: &RgbImage,
        sequence: u64,
    ) -> Result<RankedResult, ClassifierError> {
        let start = Instant::now();
        self.fill_tensor(image);
        let scores = self.model.predict(&self.tensor)?;
        let result = RankedResult::rank(sequence, scores, self.top_k);

        let elapsed = start.elapsed();
        metrics::histogram!("lookout_classify_time_us").record(elapsed.as_micros() as f64);
        debug!("Classified frame {} in {:?}: {:?}", sequence, elapsed, result.top());
        Ok(result)
    }

    fn fill_tensor(&mut self, image: &RgbImage) {
        let (w, h) = (self.shape.width, self.shape.height);
        let resized;
        let source = if image.dimensions() == (w, h) {
            image
        } else {
            resized = imageops::resize(image, w, h, imageops::FilterType::Triangle);
            &resized
        };
        for (dst, &src) in self.tensor.iter_mut().zip(source.as_raw()) {
            *dst = f32::from(src) / 255.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording {
        shape: InputShape,
        gpu: bool,
        seen: Arc<Mutex<Vec<f32>>>,
    }

    impl Classifier for Recording {
        fn input_shape(&self) -> InputShape {
            self.shape
        }

        fn supports(&self, device: Device) -> bool {
            device == Device::Cpu || (device == Device::Gpu && self.gpu)
        }

        fn predict(&mut self, tensor: &[f32]) -> Result<Vec<Detection>, ClassifierError> {
            *self.seen.lock().unwrap() = tensor.to_vec();
            Ok(vec![
                Detection::new("a", 0.1),
                Detection::new("b", 0.7),
                Detection::new("c", 0.4),
                Detection::new("d", 0.2),
            ])
        }
    }

    fn model(shape: InputShape) -> (Box<dyn Classifier>, Arc<Mutex<Vec<f32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let model = Recording {
            shape,
            gpu: false,
            seen: seen.clone(),
        };
        (Box::new(model), seen)
    }

    #[test]
    fn rejects_non_rgb_models() {
        let (m, _) = model(InputShape {
            width: 4,
            height: 4,
            channels: 1,
        });
        let err = ClassificationEngine::new(m, &ModelConfig::default(), (8, 8), 3).err();
        assert_eq!(err, Some(ClassificationConfigError::ChannelCount(1)));
    }

    #[test]
    fn rejects_shape_mismatch_without_resize() {
        let (m, _) = model(InputShape::square_rgb(4));
        let config = ModelConfig {
            resize_to_input: false,
            ..ModelConfig::default()
        };
        let err = ClassificationEngine::new(m, &config, (8, 6), 3).err();
        assert_eq!(
            err,
            Some(ClassificationConfigError::ShapeMismatch {
                model: (4, 4),
                frame: (8, 6)
            })
        );
    }

    #[test]
    fn resizes_and_normalizes_input() {
        let (m, seen) = model(InputShape::square_rgb(2));
        let mut engine = ClassificationEngine::new(m, &ModelConfig::default(), (4, 4), 3).unwrap();
        let image = RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 51]));
        let result = engine.classify(&image, 9).unwrap();

        let tensor = seen.lock().unwrap().clone();
        assert_eq!(tensor.len(), 12);
        assert!((tensor[0] - 1.0).abs() < 1e-6);
        assert!(tensor[1].abs() < 1e-6);
        assert!((tensor[2] - 0.2).abs() < 1e-6);

        assert_eq!(result.sequence, 9);
        let labels: Vec<_> = result.items.iter().map(Detection::label).collect();
        assert_eq!(labels, vec!["b", "c", "d"]);
    }

    #[test]
    fn auto_device_falls_back_to_cpu() {
        let auto = ModelOptions::select(Device::Auto, false, 4);
        assert_eq!(auto, ModelOptions { device: Device::Cpu, num_threads: 4 });
        assert_eq!(ModelOptions::select(Device::Auto, true, 4).device, Device::Gpu);
        assert_eq!(ModelOptions::select(Device::Gpu, false, 0).num_threads, 1);
    }

    struct RejectsSettings;

    impl Classifier for RejectsSettings {
        fn input_shape(&self) -> InputShape {
            InputShape::square_rgb(2)
        }

        fn configure(&mut self, options: &ModelOptions) -> Result<(), ClassifierError> {
            Err(ClassifierError(format!("{} threads exceeds the limit", options.num_threads)))
        }

        fn predict(&mut self, _tensor: &[f32]) -> Result<Vec<Detection>, ClassifierError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn configure_failure_keeps_model_message() {
        let config = ModelConfig {
            num_threads: 64,
            ..ModelConfig::default()
        };
        let err = ClassificationEngine::new(Box::new(RejectsSettings), &config, (2, 2), 3).err();
        assert_eq!(
            err,
            Some(ClassificationConfigError::Configure {
                device: Device::Cpu,
                reason: "64 threads exceeds the limit".into(),
            })
        );
        assert!(err
            .map(|e| e.to_string())
            .is_some_and(|msg| msg.contains("64 threads exceeds the limit")));
    }
}

//! Small deterministic models that need no assets. The binary runs the whole
//! pipeline with these against the synthetic camera.

use image::RgbImage;

use crate::error::{ClassifierError, DetectorError};
use crate::inference::classify::{Classifier, InputShape};
use crate::inference::detect::Detector;
use crate::inference::types::{BoundingRegion, Detection, Rect};

const CHROMA_THRESHOLD: f32 = 0.2;
const COLOUR_LABELS: [&str; 3] = ["red", "green", "blue"];
const BACKGROUND_LABEL: &str = "background";

/// Index of the dominant channel when the pixel is clearly coloured.
fn dominant_channel(px: [f32; 3]) -> Option<usize> {
    let max = px.iter().copied().fold(f32::MIN, f32::max);
    let min = px.iter().copied().fold(f32::MAX, f32::min);
    if max - min < CHROMA_THRESHOLD {
        return None;
    }
    px.iter().position(|&v| v == max)
}

/// Scores each primary colour by the share of pixels it dominates.
#[derive(Debug, Clone)]
pub struct DominantColourClassifier {
    side: u32,
}

impl DominantColourClassifier {
    pub fn new(side: u32) -> Self {
        Self { side }
    }
}

impl Classifier for DominantColourClassifier {
    fn input_shape(&self) -> InputShape {
        InputShape::square_rgb(self.side)
    }

    fn predict(&mut self, tensor: &[f32]) -> Result<Vec<Detection>, ClassifierError> {
        if tensor.len() != self.input_shape().len() {
            return Err(ClassifierError(format!(
                "tensor has {} values, expected {}",
                tensor.len(),
                self.input_shape().len()
            )));
        }

        let mut counts = [0usize; 4];
        for px in tensor.chunks_exact(3) {
            match dominant_channel([px[0], px[1], px[2]]) {
                Some(channel) => counts[channel] += 1,
                None => counts[3] += 1,
            }
        }
        let total = (tensor.len() / 3).max(1) as f32;

        Ok(COLOUR_LABELS
            .iter()
            .chain(std::iter::once(&BACKGROUND_LABEL))
            .zip(counts)
            .map(|(label, count)| Detection::new(*label, count as f32 / total))
            .collect())
    }
}

/// Boxes the coloured pixels of an image.
///
/// Reports at most one region, labelled with its dominant colour and scored by
/// how densely coloured pixels fill the box.
#[derive(Debug, Clone)]
pub struct ColourRegionDetector {
    confidence_threshold: f32,
}

impl ColourRegionDetector {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }
}

impl Detector for ColourRegionDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingRegion>, DetectorError> {
        let mut bounds: Option<Rect> = None;
        let mut counts = [0usize; 3];

        for (x, y, px) in image.enumerate_pixels() {
            let [r, g, b] = px.0.map(|v| f32::from(v) / 255.0);
            let Some(channel) = dominant_channel([r, g, b]) else {
                continue;
            };
            counts[channel] += 1;
            let (x, y) = (x as i32, y as i32);
            let rect = bounds.get_or_insert(Rect::new(x, y, x + 1, y + 1));
            rect.left = rect.left.min(x);
            rect.top = rect.top.min(y);
            rect.right = rect.right.max(x + 1);
            rect.bottom = rect.bottom.max(y + 1);
        }

        let Some(rect) = bounds else {
            return Ok(Vec::new());
        };
        let coloured: usize = counts.iter().sum();
        let area = (rect.width() * rect.height()).max(1) as f32;
        let score = coloured as f32 / area;
        if score < self.confidence_threshold {
            return Ok(Vec::new());
        }

        let channel = (0..3).max_by_key(|&c| counts[c]).unwrap_or(0);
        Ok(vec![BoundingRegion {
            rect,
            label: COLOUR_LABELS[channel].to_string(),
            score,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn classifier_scores_sum_to_one() {
        let mut model = DominantColourClassifier::new(2);
        // red, red, gray, blue
        let tensor = [1.0, 0.0, 0.0, 0.9, 0.1, 0.1, 0.5, 0.5, 0.5, 0.0, 0.0, 1.0];
        let scores = model.predict(&tensor).unwrap();
        let by_label = |l: &str| scores.iter().find(|d| d.label() == l).unwrap().score();
        assert_eq!(by_label("red"), 0.5);
        assert_eq!(by_label("blue"), 0.25);
        assert_eq!(by_label("background"), 0.25);
        assert_eq!(by_label("green"), 0.0);
    }

    #[test]
    fn classifier_rejects_wrong_tensor_size() {
        let mut model = DominantColourClassifier::new(2);
        assert!(model.predict(&[0.0; 3]).is_err());
    }

    #[test]
    fn detector_boxes_coloured_square() {
        let mut image = RgbImage::from_pixel(20, 10, Rgb([16, 16, 16]));
        for x in 4..8 {
            for y in 2..6 {
                image.put_pixel(x, y, Rgb([0, 200, 0]));
            }
        }
        let regions = ColourRegionDetector::new(0.5).detect(&image).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].rect, Rect::new(4, 2, 8, 6));
        assert_eq!(regions[0].label, "green");
        assert_eq!(regions[0].score, 1.0);
    }

    #[test]
    fn detector_ignores_gray_frames() {
        let image = RgbImage::from_pixel(8, 8, Rgb([90, 90, 90]));
        assert!(ColourRegionDetector::new(0.5).detect(&image).unwrap().is_empty());
    }
}

pub mod builtin;
pub mod classify;
pub mod detect;
pub mod types;

pub use classify::{ClassificationEngine, Classifier, Device, InputShape, ModelOptions};
pub use detect::{DetectionEngine, DetectionOutcome, Detector, Dispatch};
pub use types::{BoundingRegion, Detection, RankedResult, Rect};

//! Frame orchestration: admission, conversion, classification and detection
//! dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flume::Receiver;
use tracing::{debug, info, instrument};

use crate::capture::{ColorSpaceConverter, Frame, Rotation};
use crate::diagnostics::{DiagnosticSink, FrameFault};
use crate::display::{OverlayCoordinator, RenderSurface, ResultSink};
use crate::error::{ConfigError, PipelineError};
use crate::inference::{
    ClassificationEngine, Classifier, DetectionEngine, DetectionOutcome, Detector, Dispatch,
    RankedResult,
};
use crate::pipeline::stats::{DropReason, PipelineStats};
use crate::{Config, Metrics};

/// External collaborators a pipeline is assembled from.
pub struct PipelineParts {
    pub classifier: Box<dyn Classifier>,
    pub detector: Box<dyn Detector>,
    pub surface: Box<dyn RenderSurface>,
    pub sink: Arc<dyn ResultSink>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

/// What `submit` did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Classified and published; `detection` tells whether the detector
    /// accepted the frame.
    Processed {
        result: RankedResult,
        detection: Dispatch,
    },
    Dropped(DropReason),
    ConversionFailed,
    ClassificationFailed,
}

/// State touched only by the frame currently admitted.
struct Stage {
    converter: ColorSpaceConverter,
    classifier: ClassificationEngine,
}

pub struct FramePipeline {
    busy: AtomicBool,
    closed: AtomicBool,
    stage: Mutex<Stage>,
    detection: Mutex<DetectionEngine>,
    overlay: Arc<OverlayCoordinator>,
    sink: Arc<dyn ResultSink>,
    diagnostics: Arc<dyn DiagnosticSink>,
    stats: Arc<PipelineStats>,
}

/// Holds the admission flag for the duration of one frame.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FramePipeline {
    /// Validate the model against the configured capture shape and start the
    /// detector thread.
    pub fn new(config: &Config, parts: PipelineParts) -> Result<Self, PipelineError> {
        config.validate()?;

        let rotation = Rotation::try_from(config.capture.rotation_degrees).map_err(|deg| {
            ConfigError::Invalid(format!("rotation of {deg} degrees is not a right angle"))
        })?;
        let frame_dims = rotation.rotated_dims((config.capture.width, config.capture.height));
        let classifier = ClassificationEngine::new(
            parts.classifier,
            &config.model,
            frame_dims,
            config.pipeline.top_k,
        )?;

        let stats = Arc::new(PipelineStats::default());
        let overlay = Arc::new(OverlayCoordinator::new(parts.surface, &config.overlay));
        let detection = DetectionEngine::spawn(
            parts.detector,
            overlay.clone(),
            parts.diagnostics.clone(),
            stats.clone(),
        )?;

        info!(
            "Frame pipeline ready: capture {}x{} rotated {} deg, overlay slot {}",
            config.capture.width,
            config.capture.height,
            rotation.degrees(),
            overlay.slot_index()
        );

        Ok(Self {
            busy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stage: Mutex::new(Stage {
                converter: ColorSpaceConverter::new(),
                classifier,
            }),
            detection: Mutex::new(detection),
            overlay,
            sink: parts.sink,
            diagnostics: parts.diagnostics,
            stats,
        })
    }

    /// Process one frame.
    ///
    /// A frame that arrives while another is being processed is dropped
    /// untouched. The frame is released exactly once on every path. Frame-scoped
    /// failures are reported and absorbed; the pipeline stays ready.
    #[instrument(skip(self, frame), fields(seq = frame.sequence()))]
    pub fn submit(&self, frame: Frame) -> FrameOutcome {
        let sequence = frame.sequence();
        let Some(_busy) = BusyGuard::try_acquire(&self.busy) else {
            debug!("Pipeline busy, dropping frame {}", sequence);
            self.stats.record_dropped(DropReason::Busy);
            frame.close();
            return FrameOutcome::Dropped(DropReason::Busy);
        };
        if self.closed.load(Ordering::Acquire) {
            self.stats.record_dropped(DropReason::Shutdown);
            frame.close();
            return FrameOutcome::Dropped(DropReason::Shutdown);
        }
        self.stats.record_admitted();

        let mut stage = lock(&self.stage);
        let converted = stage.converter.convert(&frame);
        // The converted image is an owned copy; the raw frame is no longer needed.
        frame.close();

        let image = match converted {
            Ok(image) => Arc::new(image),
            Err(e) => {
                self.stats.record_conversion_failure();
                self.diagnostics.report(FrameFault::Conversion {
                    sequence,
                    reason: e.to_string(),
                });
                return FrameOutcome::ConversionFailed;
            }
        };

        let detection = lock(&self.detection).dispatch(sequence, image.clone());

        match stage.classifier.classify(&image, sequence) {
            Ok(result) => {
                self.sink.publish(result.clone());
                self.stats.record_processed();
                FrameOutcome::Processed { result, detection }
            }
            Err(e) => {
                self.stats.record_classification_failure();
                self.diagnostics.report(FrameFault::Classification {
                    sequence,
                    reason: e.to_string(),
                });
                FrameOutcome::ClassificationFailed
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn overlay(&self) -> &Arc<OverlayCoordinator> {
        &self.overlay
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn metrics(&self) -> Metrics {
        self.stats.snapshot()
    }

    /// Completed detection jobs, for observers that need to sequence on them.
    pub fn detection_outcomes(&self) -> Receiver<DetectionOutcome> {
        lock(&self.detection).outcomes()
    }

    /// Dimensions the frame buffer is locked to, once the first frame converted.
    pub fn buffer_dims(&self) -> Option<(u32, u32)> {
        lock(&self.stage).converter.buffer().dims()
    }

    /// Address of the reusable frame buffer's storage.
    pub fn buffer_addr(&self) -> Option<usize> {
        lock(&self.stage).converter.buffer().storage_addr()
    }

    /// Stop admitting frames, close the detector and detach the overlay. Later
    /// detection results are ignored.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.detection).close();
        self.overlay.detach();
        info!("Frame pipeline shut down: {:?}", self.stats.snapshot());
    }
}

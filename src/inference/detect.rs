//! Asynchronous region detection.
//!
//! The detector runs on its own thread. At most one job is outstanding at a
//! time; dispatches made while a job is in flight are skipped. Successful
//! results go to the [`OverlayCoordinator`], failures to the diagnostic sink.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use flume::{Receiver, Sender, TrySendError};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::diagnostics::{panic_message, DiagnosticSink, FrameFault};
use crate::display::OverlayCoordinator;
use crate::error::{DetectionFailure, DetectorError, PipelineError};
use crate::inference::types::BoundingRegion;
use crate::pipeline::PipelineStats;

const OUTCOME_BACKLOG: usize = 16;

/// A (possibly slow) spatial detector.
pub trait Detector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingRegion>, DetectorError>;
}

/// Completion record of one detection job.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub sequence: u64,
    pub result: Result<Vec<BoundingRegion>, DetectionFailure>,
}

/// Whether a dispatch was handed to the detector thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// A previous job is still in flight.
    Busy,
    /// The detector thread is gone.
    Closed,
}

struct DetectionJob {
    sequence: u64,
    image: Arc<RgbImage>,
}

pub struct DetectionEngine {
    jobs: Option<Sender<DetectionJob>>,
    in_flight: Arc<AtomicBool>,
    outcomes: Receiver<DetectionOutcome>,
    stats: Arc<PipelineStats>,
    handle: Option<JoinHandle<()>>,
}

impl DetectionEngine {
    pub fn spawn(
        detector: Box<dyn Detector>,
        overlay: Arc<OverlayCoordinator>,
        diagnostics: Arc<dyn DiagnosticSink>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, PipelineError> {
        let (jobs_tx, jobs_rx) = flume::bounded::<DetectionJob>(1);
        let (outcome_tx, outcome_rx) = flume::bounded(OUTCOME_BACKLOG);
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker = DetectionWorker {
            detector,
            overlay,
            diagnostics,
            in_flight: in_flight.clone(),
            outcomes: outcome_tx,
            stats: stats.clone(),
        };
        let handle = thread::Builder::new()
            .name("lookout-detect".into())
            .spawn(move || worker.run(jobs_rx))
            .map_err(|source| PipelineError::Spawn {
                name: "detector",
                source,
            })?;

        Ok(Self {
            jobs: Some(jobs_tx),
            in_flight,
            outcomes: outcome_rx,
            stats,
            handle: Some(handle),
        })
    }

    /// Hand `image` to the detector without waiting for the result.
    pub fn dispatch(&self, sequence: u64, image: Arc<RgbImage>) -> Dispatch {
        let Some(jobs) = self.jobs.as_ref() else {
            return Dispatch::Closed;
        };
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.record_detection_skipped();
            debug!("Detector busy, skipping frame {}", sequence);
            return Dispatch::Busy;
        }

        match jobs.try_send(DetectionJob { sequence, image }) {
            Ok(()) => Dispatch::Queued,
            Err(TrySendError::Full(_)) => {
                // Unreachable while the in-flight flag is honoured.
                self.in_flight.store(false, Ordering::Release);
                Dispatch::Busy
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::Release);
                warn!("Detector thread terminated, frame {} not dispatched", sequence);
                Dispatch::Closed
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Completed jobs, oldest first. Outcomes nobody reads are dropped once the
    /// backlog is full.
    pub fn outcomes(&self) -> Receiver<DetectionOutcome> {
        self.outcomes.clone()
    }

    /// Stop accepting jobs. A job already running finishes on its own; the
    /// thread is not joined so a slow detector cannot stall shutdown.
    pub fn close(&mut self) {
        if self.jobs.take().is_some() {
            info!("Detection engine closed");
        }
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() && handle.join().is_err() {
                error!("Detector thread panicked");
            }
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

struct DetectionWorker {
    detector: Box<dyn Detector>,
    overlay: Arc<OverlayCoordinator>,
    diagnostics: Arc<dyn DiagnosticSink>,
    in_flight: Arc<AtomicBool>,
    outcomes: Sender<DetectionOutcome>,
    stats: Arc<PipelineStats>,
}

impl DetectionWorker {
    fn run(mut self, jobs: Receiver<DetectionJob>) {
        while let Ok(job) = jobs.recv() {
            let start = Instant::now();
            let detector = &mut self.detector;
            let image = &job.image;
            let result = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(image)))
                .unwrap_or_else(|payload| {
                    Err(DetectorError(format!("panicked: {}", panic_message(&*payload))))
                })
                .map_err(|e| DetectionFailure {
                    sequence: job.sequence,
                    reason: e.0,
                });
            metrics::histogram!("lookout_detect_time_us")
                .record(start.elapsed().as_micros() as f64);

            match &result {
                Ok(regions) => {
                    debug!("Frame {}: {} regions", job.sequence, regions.len());
                    self.overlay.apply(job.sequence, regions);
                }
                Err(failure) => {
                    self.stats.record_detection_failure();
                    self.diagnostics
                        .report(FrameFault::Detection(failure.clone()));
                }
            }

            self.in_flight.store(false, Ordering::Release);
            let _ = self.outcomes.try_send(DetectionOutcome {
                sequence: job.sequence,
                result,
            });
        }
        debug!("Detector thread exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::TracingDiagnostics;
    use crate::display::VisualList;
    use crate::inference::Rect;
    use crate::OverlayConfig;
    use std::time::Duration;

    struct FixedDetector;

    impl Detector for FixedDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingRegion>, DetectorError> {
            Ok(vec![BoundingRegion {
                rect: Rect::new(0, 0, image.width() as i32, image.height() as i32),
                label: "whole".into(),
                score: 1.0,
            }])
        }
    }

    /// Panics on its first call, then behaves like [`FixedDetector`].
    struct PanicsOnce {
        panicked: bool,
    }

    impl Detector for PanicsOnce {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingRegion>, DetectorError> {
            if !self.panicked {
                self.panicked = true;
                panic!("inference backend crashed");
            }
            FixedDetector.detect(image)
        }
    }

    fn engine() -> (DetectionEngine, Arc<OverlayCoordinator>) {
        let (engine, overlay, _) = engine_with(Box::new(FixedDetector));
        (engine, overlay)
    }

    fn engine_with(
        detector: Box<dyn Detector>,
    ) -> (DetectionEngine, Arc<OverlayCoordinator>, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::default());
        let overlay = Arc::new(OverlayCoordinator::new(
            Box::new(VisualList::default()),
            &OverlayConfig {
                base_children: 0,
                ..OverlayConfig::default()
            },
        ));
        let engine = DetectionEngine::spawn(
            detector,
            overlay.clone(),
            Arc::new(TracingDiagnostics),
            stats.clone(),
        )
        .unwrap();
        (engine, overlay, stats)
    }

    #[test]
    fn completed_job_reaches_overlay() {
        let (engine, overlay) = engine();
        let outcomes = engine.outcomes();

        let image = Arc::new(RgbImage::new(6, 4));
        assert_eq!(engine.dispatch(7, image), Dispatch::Queued);

        let outcome = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.sequence, 7);
        assert_eq!(outcome.result.unwrap().len(), 1);
        assert!(!engine.is_busy());
        assert_eq!(overlay.inspect(|s| s.child_count()), Some(1));
    }

    #[test]
    fn closed_engine_refuses_jobs() {
        let (mut engine, _overlay) = engine();
        engine.close();
        assert_eq!(
            engine.dispatch(1, Arc::new(RgbImage::new(2, 2))),
            Dispatch::Closed
        );
    }

    #[test]
    fn detector_panic_is_reported_and_detection_resumes() {
        let (engine, overlay, stats) = engine_with(Box::new(PanicsOnce { panicked: false }));
        let outcomes = engine.outcomes();

        assert_eq!(engine.dispatch(1, Arc::new(RgbImage::new(4, 4))), Dispatch::Queued);
        let failed = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        let failure = failed.result.unwrap_err();
        assert_eq!(failure.sequence, 1);
        assert!(failure.reason.contains("inference backend crashed"), "{}", failure.reason);
        assert_eq!(stats.snapshot().detection_failures, 1);
        assert!(!engine.is_busy());

        assert_eq!(engine.dispatch(2, Arc::new(RgbImage::new(4, 4))), Dispatch::Queued);
        let recovered = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(recovered.sequence, 2);
        assert!(recovered.result.is_ok());
        assert_eq!(overlay.inspect(|s| s.child_count()), Some(1));
        assert_eq!(stats.snapshot().detections_skipped, 0);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::Metrics;

/// Why a frame never reached conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The pipeline was still processing an earlier frame.
    Busy,
    /// A newer frame replaced it in the delivery queue.
    Superseded,
    /// The pipeline was shutting down.
    Shutdown,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Busy => "busy",
            DropReason::Superseded => "superseded",
            DropReason::Shutdown => "shutdown",
        }
    }
}

/// Lock-free counters shared by the pipeline, its worker and the detector.
#[derive(Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    processed: AtomicU64,
    dropped_busy: AtomicU64,
    dropped_superseded: AtomicU64,
    dropped_shutdown: AtomicU64,
    conversion_failures: AtomicU64,
    classification_failures: AtomicU64,
    detection_failures: AtomicU64,
    detections_skipped: AtomicU64,
    worker_panics: AtomicU64,
}

impl PipelineStats {
    pub fn record_admitted(&self) {
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lookout_frames_admitted_total").increment(1);
    }

    pub fn record_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Busy => &self.counters.dropped_busy,
            DropReason::Superseded => &self.counters.dropped_superseded,
            DropReason::Shutdown => &self.counters.dropped_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lookout_frames_dropped_total", "reason" => reason.as_str())
            .increment(1);
    }

    pub fn record_conversion_failure(&self) {
        self.counters.conversion_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lookout_conversion_failures_total").increment(1);
    }

    pub fn record_classification_failure(&self) {
        self.counters
            .classification_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection_failure(&self) {
        self.counters.detection_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lookout_detection_failures_total").increment(1);
    }

    pub fn record_detection_skipped(&self) {
        self.counters.detections_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lookout_detections_skipped_total").increment(1);
    }

    pub fn record_worker_panic(&self) {
        self.counters.worker_panics.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lookout_worker_panics_total").increment(1);
    }

    pub fn snapshot(&self) -> Metrics {
        let c = &self.counters;
        Metrics {
            admitted: c.admitted.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            dropped_busy: c.dropped_busy.load(Ordering::Relaxed),
            dropped_superseded: c.dropped_superseded.load(Ordering::Relaxed),
            dropped_shutdown: c.dropped_shutdown.load(Ordering::Relaxed),
            conversion_failures: c.conversion_failures.load(Ordering::Relaxed),
            classification_failures: c.classification_failures.load(Ordering::Relaxed),
            detection_failures: c.detection_failures.load(Ordering::Relaxed),
            detections_skipped: c.detections_skipped.load(Ordering::Relaxed),
            worker_panics: c.worker_panics.load(Ordering::Relaxed),
        }
    }
}

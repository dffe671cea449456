//! Dedicated single-thread executor draining the frame queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::RecvTimeoutError;
use tracing::{debug, error, info, warn};

use crate::capture::Frame;
use crate::diagnostics::panic_message;
use crate::error::PipelineError;
use crate::pipeline::frame_pipeline::FramePipeline;
use crate::pipeline::ringbuf::LatestFrameQueue;
use crate::PipelineConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle given to the frame source.
#[derive(Clone)]
pub struct FrameSender {
    queue: Arc<LatestFrameQueue>,
}

impl FrameSender {
    /// Deliver a frame. Never blocks; an older undelivered frame is released
    /// in its place. Returns false once the worker is shutting down.
    pub fn offer(&self, frame: Frame) -> bool {
        self.queue.push(frame)
    }
}

pub struct FrameWorker {
    queue: Arc<LatestFrameQueue>,
    pipeline: Arc<FramePipeline>,
    stop: Arc<AtomicBool>,
    done: flume::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl FrameWorker {
    pub fn spawn(pipeline: Arc<FramePipeline>, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let queue = Arc::new(LatestFrameQueue::new(config.queue_depth, pipeline.stats()));
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = flume::bounded(1);

        let handle = {
            let queue = queue.clone();
            let pipeline = pipeline.clone();
            let stop = stop.clone();
            let pin_core = config.pin_worker_core;
            thread::Builder::new()
                .name("lookout-pipeline".into())
                .spawn(move || {
                    let _closer = CloseOnExit(queue.clone());
                    if let Some(core) = pin_core {
                        pin_current_thread(core);
                    }
                    while !stop.load(Ordering::Acquire) {
                        if let Some(frame) = queue.pop_timeout(POLL_INTERVAL) {
                            run_frame(&pipeline, frame);
                        }
                    }
                    debug!("Pipeline worker exiting");
                    let _ = done_tx.send(());
                })
                .map_err(|source| PipelineError::Spawn {
                    name: "pipeline worker",
                    source,
                })?
        };

        info!("Pipeline worker started (queue depth {})", config.queue_depth.max(1));
        Ok(Self {
            queue,
            pipeline,
            stop,
            done: done_rx,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> FrameSender {
        FrameSender {
            queue: self.queue.clone(),
        }
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline> {
        &self.pipeline
    }

    /// Stop the worker, waiting at most `grace` for the frame in progress.
    pub fn shutdown(mut self, grace: Duration) -> Result<(), PipelineError> {
        self.begin_shutdown();
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        error!("Pipeline worker panicked");
                    }
                }
                info!("Pipeline worker stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Pipeline worker still busy after {:?}, detaching", grace);
                self.handle.take();
                Err(PipelineError::ShutdownTimeout(grace))
            }
        }
    }

    fn begin_shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let released = self.queue.close();
        if released > 0 {
            debug!("Released {} queued frames on shutdown", released);
        }
        self.pipeline.shutdown();
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.begin_shutdown();
        }
    }
}

/// Closes the queue when the worker thread ends, so the source sees `offer`
/// fail instead of feeding a thread that is gone.
struct CloseOnExit(Arc<LatestFrameQueue>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Pipeline worker lost, frame queue closed");
        }
        self.0.close();
    }
}

/// Submit one frame, containing any panic to that frame. The frame is
/// released during unwinding and the busy flag is cleared by its guard.
fn run_frame(pipeline: &FramePipeline, frame: Frame) {
    let sequence = frame.sequence();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| pipeline.submit(frame))) {
        pipeline.stats().record_worker_panic();
        error!(
            "Processing frame {} panicked, worker continues: {}",
            sequence,
            panic_message(&*payload)
        );
    }
}

fn pin_current_thread(core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
        .map(core_affinity::set_for_current)
        .unwrap_or(false);
    if pinned {
        info!("Pipeline worker pinned to core {}", core);
    } else {
        warn!("Could not pin pipeline worker to core {}", core);
    }
}

//! Keep-only-latest frame queue between the frame source and the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::trace;

use crate::capture::Frame;
use crate::pipeline::stats::{DropReason, PipelineStats};

/// Bounded queue that overwrites its oldest frame when full.
///
/// With capacity 1 the worker always picks up the newest frame captured while
/// it was busy. Displaced frames are released immediately.
pub struct LatestFrameQueue {
    ring: Mutex<HeapRb<Frame>>,
    ready: Condvar,
    closed: AtomicBool,
    stats: Arc<PipelineStats>,
}

impl LatestFrameQueue {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapRb<Frame>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: queue `frame`, displacing the oldest one if full. Returns
    /// false when the queue is closed; the frame is released either way.
    pub fn push(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.stats.record_dropped(DropReason::Shutdown);
            frame.close();
            return false;
        }

        let displaced = self.lock().push_overwrite(frame);
        self.ready.notify_one();

        if let Some(old) = displaced {
            trace!("Frame {} superseded before processing", old.sequence());
            self.stats.record_dropped(DropReason::Superseded);
            old.close();
        }
        true
    }

    /// Consumer: wait up to `timeout` for the oldest queued frame.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let mut ring = self.lock();
        if let Some(frame) = ring.try_pop() {
            return Some(frame);
        }
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        ring = self
            .ready
            .wait_timeout(ring, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
        ring.try_pop()
    }

    pub fn len(&self) -> usize {
        self.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further frames and release everything still queued.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<Frame> = {
            let mut ring = self.lock();
            std::iter::from_fn(|| ring.try_pop()).collect()
        };
        self.ready.notify_all();

        let count = drained.len();
        for frame in drained {
            self.stats.record_dropped(DropReason::Shutdown);
            frame.close();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat, Rotation};
    use std::sync::atomic::AtomicUsize;

    fn frame(sequence: u64, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        Frame::new(
            None,
            FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                rotation: Rotation::Deg0,
                format: PixelFormat::Rgb24,
            },
            Box::new(move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn newest_frame_replaces_queued_one() {
        let stats = Arc::new(PipelineStats::default());
        let queue = LatestFrameQueue::new(1, stats.clone());
        let released = Arc::new(AtomicUsize::new(0));

        assert!(queue.push(frame(1, &released)));
        assert!(queue.push(frame(2, &released)));
        assert!(queue.push(frame(3, &released)));

        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().dropped_superseded, 2);
        let next = queue.pop_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(next.sequence(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = LatestFrameQueue::new(1, Arc::new(PipelineStats::default()));
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn close_releases_queued_frames_and_rejects_new_ones() {
        let stats = Arc::new(PipelineStats::default());
        let queue = LatestFrameQueue::new(1, stats.clone());
        let released = Arc::new(AtomicUsize::new(0));

        queue.push(frame(1, &released));
        assert_eq!(queue.close(), 1);
        assert!(!queue.push(frame(2, &released)));
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().dropped_shutdown, 2);
        assert!(queue.pop_timeout(Duration::from_millis(1)).is_none());
    }
}

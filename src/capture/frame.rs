use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Callback returning a frame's native resource to its source. Receives the
/// frame's sequence id.
pub type ReleaseFn = Box<dyn FnOnce(u64) + Send + 'static>;

/// A single admitted unit of work.
///
/// The pipeline owns a `Frame` exclusively while processing it. The release
/// callback runs exactly once: on [`Frame::close`], or on drop if the frame
/// was never closed explicitly.
pub struct Frame {
    /// Raw pixel planes; `None` when the source delivered no image payload.
    pub planes: Option<Vec<Plane>>,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,

    release: Option<ReleaseFn>,
}

/// One plane of a raw frame.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes between the starts of two consecutive rows.
    pub row_stride: usize,
    /// Bytes between two consecutive samples within a row.
    pub pixel_stride: usize,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub format: PixelFormat,
}

/// Pixel formats the converter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YUV 4:2:0 in three planes (Y, U, V). Chroma planes may be interleaved
    /// through their pixel stride, which covers I420, NV12 and NV21.
    Yuv420,
    /// Packed YUV 4:2:2 (Y0 U Y1 V).
    Yuyv,
    Rgb24,
    Rgba,
    Mjpeg,
}

/// Clockwise rotation to apply to the sensor image for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Output dimensions after rotating an image of `(width, height)`.
    pub fn rotated_dims(self, (width, height): (u32, u32)) -> (u32, u32) {
        match self {
            Rotation::Deg0 | Rotation::Deg180 => (width, height),
            Rotation::Deg90 | Rotation::Deg270 => (height, width),
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = u32;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(other),
        }
    }
}

impl Frame {
    pub fn new(planes: Option<Vec<Plane>>, meta: FrameMetadata, release: ReleaseFn) -> Self {
        Self {
            planes,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
            release: Some(release),
        }
    }

    /// Frame whose resource needs no explicit return to the source.
    pub fn unmanaged(planes: Option<Vec<Plane>>, meta: FrameMetadata) -> Self {
        Self::new(planes, meta, Box::new(|_| {}))
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    /// Return the native resource to the source.
    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.meta.sequence);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("planes", &self.planes.as_ref().map(Vec::len))
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn meta() -> FrameMetadata {
        FrameMetadata {
            sequence: 7,
            width: 4,
            height: 2,
            rotation: Rotation::Deg0,
            format: PixelFormat::Rgb24,
        }
    }

    #[test]
    fn close_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let frame = Frame::new(
            None,
            meta(),
            Box::new(move |seq| {
                assert_eq!(seq, 7);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        frame.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_unclosed_frame() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        drop(Frame::new(
            None,
            meta(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rotation_from_degrees() {
        assert_eq!(Rotation::try_from(270), Ok(Rotation::Deg270));
        assert_eq!(Rotation::try_from(45), Err(45));
        assert_eq!(Rotation::Deg90.rotated_dims((640, 480)), (480, 640));
    }
}

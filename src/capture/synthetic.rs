//! Deterministic test-pattern camera.
//!
//! Produces planar YUV 4:2:0 frames showing a coloured square sweeping across
//! a dark background. Each frame's release callback returns its slot to the
//! source, so `outstanding()` behaves like a native buffer pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Plane, Rotation};
use crate::CaptureConfig;

const BACKGROUND_LUMA: u8 = 16;
const STEP_PX: u32 = 8;
const FRAMES_PER_COLOUR: u64 = 30;

/// Label and YUV triple of each pattern colour.
pub const PATTERN_COLOURS: [(&str, [u8; 3]); 3] = [
    ("red", [76, 85, 255]),
    ("green", [150, 44, 21]),
    ("blue", [29, 255, 107]),
];

pub struct SyntheticSource {
    width: u32,
    height: u32,
    rotation: Rotation,
    sequence: u64,
    outstanding: Arc<AtomicUsize>,
}

impl SyntheticSource {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            rotation: Rotation::try_from(config.rotation_degrees).unwrap_or_default(),
            sequence: 0,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Frames handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Top-left corner and side of the square in frame `sequence`.
    pub fn square_at(&self, sequence: u64) -> (u32, u32, u32) {
        let short_edge = self.width.min(self.height);
        let side = (short_edge / 4).max(2).min(short_edge);
        let travel = self.width.saturating_sub(side).max(1);
        let x = ((sequence * u64::from(STEP_PX)) % u64::from(travel)) as u32;
        let y = self.height.saturating_sub(side) / 2;
        (x, y, side)
    }

    pub fn colour_at(sequence: u64) -> (&'static str, [u8; 3]) {
        PATTERN_COLOURS[((sequence / FRAMES_PER_COLOUR) % PATTERN_COLOURS.len() as u64) as usize]
    }

    pub fn next_frame(&mut self) -> Frame {
        self.sequence += 1;
        let sequence = self.sequence;
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        let mut luma = vec![BACKGROUND_LUMA; w * h];
        let mut u = vec![128u8; cw * ch];
        let mut v = vec![128u8; cw * ch];

        let (sx, sy, side) = self.square_at(sequence);
        let (_, [cy, cu, cv]) = Self::colour_at(sequence);
        for row in sy as usize..(sy + side) as usize {
            luma[row * w + sx as usize..row * w + (sx + side) as usize].fill(cy);
        }
        for row in (sy as usize / 2)..(sy + side) as usize / 2 {
            let span = row * cw + sx as usize / 2..row * cw + (sx + side) as usize / 2;
            u[span.clone()].fill(cu);
            v[span].fill(cv);
        }

        let planes = vec![
            Plane {
                data: Bytes::from(luma),
                row_stride: w,
                pixel_stride: 1,
            },
            Plane {
                data: Bytes::from(u),
                row_stride: cw,
                pixel_stride: 1,
            },
            Plane {
                data: Bytes::from(v),
                row_stride: cw,
                pixel_stride: 1,
            },
        ];

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = self.outstanding.clone();
        Frame::new(
            Some(planes),
            FrameMetadata {
                sequence,
                width: self.width,
                height: self.height,
                rotation: self.rotation,
                format: PixelFormat::Yuv420,
            },
            Box::new(move |_| {
                outstanding.fetch_sub(1, Ordering::AcqRel);
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig {
            width: 64,
            height: 48,
            rotation_degrees: 0,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn frames_are_sequenced_and_returned() {
        let mut source = SyntheticSource::new(&config());
        let a = source.next_frame();
        let b = source.next_frame();
        assert_eq!((a.sequence(), b.sequence()), (1, 2));
        assert_eq!(source.outstanding(), 2);
        a.close();
        drop(b);
        assert_eq!(source.outstanding(), 0);
    }

    #[test]
    fn square_stays_inside_frame() {
        let source = SyntheticSource::new(&config());
        for seq in 0..200 {
            let (x, y, side) = source.square_at(seq);
            assert!(x + side <= 64 && y + side <= 48);
        }
    }

    #[test]
    fn tiny_frames_are_generated_and_convertible() {
        for (width, height) in [(1, 1), (3, 1), (1, 5), (2, 2)] {
            let mut source = SyntheticSource::new(&CaptureConfig {
                width,
                height,
                ..config()
            });
            let mut converter = crate::capture::ColorSpaceConverter::new();
            for _ in 0..40 {
                let frame = source.next_frame();
                let image = converter.convert(&frame).unwrap();
                assert_eq!(image.dimensions(), (width, height));
            }
            assert_eq!(source.outstanding(), 0);
        }
    }
}

//! Colorspace conversion from sensor encodings to packed RGB.

use std::time::Instant;

use image::{imageops, RgbImage};
use tracing::{debug, instrument};

use crate::capture::frame::{Frame, PixelFormat, Plane, Rotation};
use crate::error::ConversionError;

const RGB_CHANNELS: usize = 3;

/// Reusable decoded-image storage.
///
/// Allocated on the first conversion and locked to that frame's dimensions for
/// the rest of its life. It always holds unrotated pixels.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    image: Option<RgbImage>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dims(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(RgbImage::dimensions)
    }

    /// Address of the backing storage, if allocated.
    pub fn storage_addr(&self) -> Option<usize> {
        self.image.as_ref().map(|img| img.as_raw().as_ptr() as usize)
    }

    pub fn image(&self) -> Option<&RgbImage> {
        self.image.as_ref()
    }

    fn acquire(&mut self, dims: (u32, u32)) -> Result<&mut RgbImage, ConversionError> {
        if let Some(expected) = self.dims() {
            if expected != dims {
                return Err(ConversionError::DimensionMismatch {
                    expected,
                    actual: dims,
                });
            }
        }
        Ok(self
            .image
            .get_or_insert_with(|| RgbImage::new(dims.0, dims.1)))
    }
}

/// Converts raw frames into the pipeline's single reusable [`FrameBuffer`].
#[derive(Debug, Default)]
pub struct ColorSpaceConverter {
    buffer: FrameBuffer,
}

impl ColorSpaceConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Convert `frame` into the shared buffer and return the rotated image.
    ///
    /// The returned image is an owned copy, so it stays valid after the frame
    /// is released and after the next call overwrites the buffer.
    #[instrument(skip(self, frame), fields(seq = frame.sequence()))]
    pub fn convert(&mut self, frame: &Frame) -> Result<RgbImage, ConversionError> {
        let start = Instant::now();
        let meta = &frame.meta;
        let planes = frame
            .planes
            .as_deref()
            .filter(|planes| !planes.is_empty())
            .ok_or(ConversionError::MissingPayload {
                sequence: meta.sequence,
            })?;

        let dims = (meta.width, meta.height);
        if dims.0 == 0 || dims.1 == 0 {
            return Err(ConversionError::PlaneLayout {
                format: meta.format,
                reason: "frame has a zero dimension",
            });
        }
        let buffer = self.buffer.acquire(dims)?;
        let (width, height) = (dims.0 as usize, dims.1 as usize);
        let out: &mut [u8] = &mut **buffer;

        match meta.format {
            PixelFormat::Yuv420 => yuv420_to_rgb(planes, width, height, out)?,
            PixelFormat::Yuyv => yuyv_to_rgb(&planes[0], width, height, out)?,
            PixelFormat::Rgb24 => packed_to_rgb(&planes[0], PixelFormat::Rgb24, width, height, out)?,
            PixelFormat::Rgba => packed_to_rgb(&planes[0], PixelFormat::Rgba, width, height, out)?,
            PixelFormat::Mjpeg => mjpeg_to_rgb(&planes[0], width, height, out)?,
        }

        let image = rotate(buffer, meta.rotation);
        let elapsed = start.elapsed();
        metrics::histogram!("lookout_convert_time_us").record(elapsed.as_micros() as f64);
        debug!(
            "Converted {:?} {}x{} (rotation {}) in {:?}",
            meta.format,
            meta.width,
            meta.height,
            meta.rotation.degrees(),
            elapsed
        );
        Ok(image)
    }
}

fn rotate(buffer: &RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::Deg0 => buffer.clone(),
        Rotation::Deg90 => imageops::rotate90(buffer),
        Rotation::Deg180 => imageops::rotate180(buffer),
        Rotation::Deg270 => imageops::rotate270(buffer),
    }
}

/// Full-range BT.601 YUV to RGB in 16.16 fixed point.
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = i32::from(y);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let r = y + ((91_881 * e + 32_768) >> 16);
    let g = y - ((22_554 * d + 46_802 * e + 32_768) >> 16);
    let b = y + ((116_130 * d + 32_768) >> 16);
    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Bytes needed to address a `width x height` grid of `sample_bytes`-wide
/// samples in `plane`.
fn required_len(plane: &Plane, width: usize, height: usize, sample_bytes: usize) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    (height - 1) * plane.row_stride + (width - 1) * plane.pixel_stride + sample_bytes
}

fn check_plane(
    plane: &Plane,
    format: PixelFormat,
    width: usize,
    height: usize,
    sample_bytes: usize,
) -> Result<(), ConversionError> {
    if plane.pixel_stride == 0 {
        return Err(ConversionError::PlaneLayout {
            format,
            reason: "zero pixel stride",
        });
    }
    if plane.data.len() < required_len(plane, width, height, sample_bytes) {
        return Err(ConversionError::PlaneLayout {
            format,
            reason: "plane shorter than its strides imply",
        });
    }
    Ok(())
}

fn yuv420_to_rgb(
    planes: &[Plane],
    width: usize,
    height: usize,
    out: &mut [u8],
) -> Result<(), ConversionError> {
    let [y_plane, u_plane, v_plane] = planes else {
        return Err(ConversionError::PlaneLayout {
            format: PixelFormat::Yuv420,
            reason: "expected three planes",
        });
    };
    let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
    check_plane(y_plane, PixelFormat::Yuv420, width, height, 1)?;
    check_plane(u_plane, PixelFormat::Yuv420, chroma_w, chroma_h, 1)?;
    check_plane(v_plane, PixelFormat::Yuv420, chroma_w, chroma_h, 1)?;

    for (row, out_row) in out.chunks_exact_mut(width * RGB_CHANNELS).enumerate() {
        let y_row = row * y_plane.row_stride;
        let u_row = (row / 2) * u_plane.row_stride;
        let v_row = (row / 2) * v_plane.row_stride;
        for (col, px) in out_row.chunks_exact_mut(RGB_CHANNELS).enumerate() {
            let y = y_plane.data[y_row + col * y_plane.pixel_stride];
            let u = u_plane.data[u_row + (col / 2) * u_plane.pixel_stride];
            let v = v_plane.data[v_row + (col / 2) * v_plane.pixel_stride];
            px.copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    Ok(())
}

fn yuyv_to_rgb(
    plane: &Plane,
    width: usize,
    height: usize,
    out: &mut [u8],
) -> Result<(), ConversionError> {
    let row_bytes = width.div_ceil(2) * 4;
    if plane.row_stride < row_bytes || plane.data.len() < (height - 1) * plane.row_stride + row_bytes
    {
        return Err(ConversionError::PlaneLayout {
            format: PixelFormat::Yuyv,
            reason: "plane shorter than width x height x 2",
        });
    }

    for (row, out_row) in out.chunks_exact_mut(width * RGB_CHANNELS).enumerate() {
        let src = &plane.data[row * plane.row_stride..row * plane.row_stride + row_bytes];
        for (col, px) in out_row.chunks_exact_mut(RGB_CHANNELS).enumerate() {
            let macro_px = &src[(col / 2) * 4..(col / 2) * 4 + 4];
            let y = macro_px[(col % 2) * 2];
            px.copy_from_slice(&yuv_to_rgb(y, macro_px[1], macro_px[3]));
        }
    }
    Ok(())
}

fn packed_to_rgb(
    plane: &Plane,
    format: PixelFormat,
    width: usize,
    height: usize,
    out: &mut [u8],
) -> Result<(), ConversionError> {
    if plane.pixel_stride < RGB_CHANNELS {
        return Err(ConversionError::PlaneLayout {
            format,
            reason: "pixel stride smaller than three channels",
        });
    }
    check_plane(plane, format, width, height, RGB_CHANNELS)?;

    for (row, out_row) in out.chunks_exact_mut(width * RGB_CHANNELS).enumerate() {
        let base = row * plane.row_stride;
        for (col, px) in out_row.chunks_exact_mut(RGB_CHANNELS).enumerate() {
            let start = base + col * plane.pixel_stride;
            px.copy_from_slice(&plane.data[start..start + RGB_CHANNELS]);
        }
    }
    Ok(())
}

fn mjpeg_to_rgb(
    plane: &Plane,
    width: usize,
    height: usize,
    out: &mut [u8],
) -> Result<(), ConversionError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(&plane.data[..]);
    let pixels = decoder
        .decode()
        .map_err(|e| ConversionError::Decode(format!("{e:?}")))?;
    let decoded = decoder
        .dimensions()
        .ok_or_else(|| ConversionError::Decode("missing JPEG dimensions".into()))?;

    if decoded != (width, height) {
        return Err(ConversionError::DimensionMismatch {
            expected: (width as u32, height as u32),
            actual: (decoded.0 as u32, decoded.1 as u32),
        });
    }
    if pixels.len() != out.len() {
        return Err(ConversionError::Decode(format!(
            "decoded {} bytes, expected {} RGB bytes",
            pixels.len(),
            out.len()
        )));
    }
    out.copy_from_slice(&pixels);
    Ok(())
}

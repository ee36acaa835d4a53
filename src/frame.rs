//! Camera frames handed to the pipeline.
//!
//! - `Frame`: owned pixel buffer plus dimensions and pixel format. Bytes are read-only
//!   once constructed.
//! - `FrameSnapshot`: read-only RGBA copy published on the camera-feed stream.
//!
//! A frame may carry a release hook supplied by the capture source. The hook runs
//! exactly once, when the frame is dropped, on whichever path drops it: processed by
//! the worker, replaced in the intake slot, or discarded after `dispose()`.

use anyhow::Result;
use std::fmt;
use std::str::FromStr;

use crate::error::{ensure_arg, PerceptionError};
use crate::field::GrayField;
use crate::ingest::normalize;

/// Pixel layouts accepted from capture sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// One byte per pixel.
    Luma8,
    /// Four bytes per pixel, R G B A.
    Rgba8,
    /// Full-resolution Y plane followed by interleaved half-resolution UV.
    Nv12,
}

impl PixelFormat {
    pub fn is_color(self) -> bool {
        !matches!(self, PixelFormat::Luma8)
    }
}

impl FromStr for PixelFormat {
    type Err = PerceptionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "luma8" | "gray" | "grey" => Ok(PixelFormat::Luma8),
            "rgba8" | "rgba" => Ok(PixelFormat::Rgba8),
            "nv12" => Ok(PixelFormat::Nv12),
            other => Err(PerceptionError::invalid(format!("unknown pixel format '{other}'"))),
        }
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Owned camera frame.
///
/// There is no `Clone`: a frame has exactly one owner at a time, and ownership moves
/// from the capture source into the pipeline on `submit_frame`.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    release: Option<ReleaseHook>,
}

impl Frame {
    /// Wrap a pixel buffer. Fails if its length does not match `width`, `height` and
    /// `format`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = normalize::expected_len(width, height, format)
            .map_err(|e| PerceptionError::invalid(e.to_string()))?;
        ensure_arg(data.len() == expected, || {
            format!(
                "{:?} frame length mismatch: {}x{} needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            )
        })?;
        Ok(Self {
            data,
            width,
            height,
            format,
            release: None,
        })
    }

    /// Attach the capture source's release callback. Runs once, on drop.
    pub fn with_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Single-channel luma field.
    pub fn to_grayscale(&self) -> GrayField {
        let luma = normalize::to_luma(&self.data, self.width, self.height, self.format);
        GrayField::from_parts(self.width, self.height, luma)
    }

    /// Packed RGB image, as expected by inference backends.
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        let rgb = normalize::to_rgb(&self.data, self.width, self.height, self.format);
        image::RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| PerceptionError::invalid("rgb buffer does not match frame size").into())
    }

    /// Read-only RGBA copy for display consumers.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            width: self.width,
            height: self.height,
            rgba: normalize::to_rgba(&self.data, self.width, self.height, self.format),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// RGBA copy of a frame, published on the camera-feed stream.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSnapshot {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl FrameSnapshot {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

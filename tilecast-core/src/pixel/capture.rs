//! Live screen capture as a pixel source.
//!
//! A [`CaptureSource`] owns its [`FrameGrabber`] backend for the lifetime of
//! a session. Each call to [`CaptureSource::capture`] grabs one frame of a
//! fixed desktop rectangle, converts it to [`RgbPlanes`] and scales it down
//! (never up) to fit the streaming limit while keeping the aspect ratio.
//! The result also stays under [`MAX_REGION_PIXELS`], so its payload always
//! fits the region length header.

use image::imageops::{self, FilterType};
use tracing::debug;

use crate::error::TileError;
use crate::packet::COLOR_BYTES;
use crate::pixel::RgbPlanes;

/// Most pixels a region can carry under its `u16` byte-length header.
pub const MAX_REGION_PIXELS: usize = u16::MAX as usize / COLOR_BYTES;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI default).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of red, green and blue within one pixel.
    const fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 => [2, 1, 0],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [0, 1, 2],
        }
    }
}

// ── RawScreenFrame ───────────────────────────────────────────────

/// An uncompressed frame as handed over by a capture backend.
///
/// `data` holds `height` rows of `stride` bytes; `stride` may exceed
/// `width * bytes_per_pixel` when the backend pads rows.
#[derive(Debug, Clone)]
pub struct RawScreenFrame {
    pub width: u32,
    pub height: u32,
    /// Row pitch in **bytes**.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawScreenFrame {
    /// Drop row padding and alpha, producing RGB planes.
    pub fn to_planes(&self) -> Result<RgbPlanes, TileError> {
        let bpp = self.format.bytes_per_pixel();
        let row_len = self.width as usize * bpp;
        let stride = self.stride as usize;
        if stride < row_len || self.data.len() < stride * self.height as usize {
            return Err(TileError::Capture(format!(
                "frame {}x{} with stride {} does not fit {} bytes",
                self.width,
                self.height,
                self.stride,
                self.data.len()
            )));
        }

        let [r, g, b] = self.format.rgb_offsets();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height as usize {
            let row = &self.data[y * stride..y * stride + row_len];
            for px in row.chunks_exact(bpp) {
                rgb.extend_from_slice(&[px[r], px[g], px[b]]);
            }
        }
        RgbPlanes::from_interleaved(self.width, self.height, &rgb)
    }
}

// ── CaptureRect ──────────────────────────────────────────────────

/// Desktop rectangle to sample, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ── FrameGrabber ─────────────────────────────────────────────────

/// A backend able to grab one frame of a desktop rectangle.
///
/// Implementations block until a frame is available.
pub trait FrameGrabber: Send {
    fn grab(&mut self, rect: CaptureRect) -> Result<RawScreenFrame, TileError>;
}

// ── CaptureSource ────────────────────────────────────────────────

/// Session-scoped capture resource.
pub struct CaptureSource {
    grabber: Box<dyn FrameGrabber>,
    rect: CaptureRect,
    max_width: u32,
    max_height: u32,
}

impl CaptureSource {
    /// `max_width`/`max_height` bound the streamed frame.
    pub fn new(
        grabber: Box<dyn FrameGrabber>,
        rect: CaptureRect,
        max_width: u32,
        max_height: u32,
    ) -> Result<Self, TileError> {
        if rect.width == 0 || rect.height == 0 || max_width == 0 || max_height == 0 {
            return Err(TileError::Precondition(format!(
                "capture rect {}x{} and limit {max_width}x{max_height} must be non-empty",
                rect.width, rect.height
            )));
        }
        Ok(Self {
            grabber,
            rect,
            max_width,
            max_height,
        })
    }

    pub fn rect(&self) -> CaptureRect {
        self.rect
    }

    /// Grab, convert and scale one frame.
    pub fn capture(&mut self) -> Result<RgbPlanes, TileError> {
        let frame = self.grabber.grab(self.rect)?;
        let planes = frame.to_planes()?;
        let (w, h) = fit_within(
            planes.width(),
            planes.height(),
            self.max_width,
            self.max_height,
        );
        let (w, h) = fit_area(w, h, MAX_REGION_PIXELS);
        if (w, h) == (planes.width(), planes.height()) {
            return Ok(planes);
        }
        debug!(
            "scaling capture {}x{} -> {w}x{h}",
            planes.width(),
            planes.height()
        );
        scale(&planes, w, h)
    }
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("rect", &self.rect)
            .field("max_width", &self.max_width)
            .field("max_height", &self.max_height)
            .finish()
    }
}

/// Largest size with the same aspect ratio that fits `max_w × max_h`.
///
/// Never upscales; never returns a zero dimension for a non-empty input.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    // Compare max_w/width against max_h/height without floats.
    if max_w as u64 * height as u64 <= max_h as u64 * width as u64 {
        let h = (height as u64 * max_w as u64 / width as u64).max(1) as u32;
        (max_w, h)
    } else {
        let w = (width as u64 * max_h as u64 / height as u64).max(1) as u32;
        (w, max_h)
    }
}

/// Shrink `width × height` uniformly until it holds at most `max_pixels`.
pub fn fit_area(width: u32, height: u32, max_pixels: usize) -> (u32, u32) {
    let area = width as usize * height as usize;
    if area <= max_pixels {
        return (width, height);
    }
    let factor = (max_pixels as f64 / area as f64).sqrt();
    let mut w = ((width as f64 * factor) as u32).max(1);
    let mut h = ((height as f64 * factor) as u32).max(1);
    // Float rounding can leave the product a few pixels over.
    while w as usize * h as usize > max_pixels && (w > 1 || h > 1) {
        if w >= h {
            w -= 1;
        } else {
            h -= 1;
        }
    }
    (w, h)
}

fn scale(planes: &RgbPlanes, width: u32, height: u32) -> Result<RgbPlanes, TileError> {
    let buffer = image::RgbImage::from_raw(planes.width(), planes.height(), planes.to_interleaved())
        .ok_or_else(|| TileError::Capture("frame buffer size mismatch".into()))?;
    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    RgbPlanes::from_interleaved(width, height, resized.as_raw())
}

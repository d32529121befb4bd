//! Fixed-shape pixel buffers and the sources that fill them.
//!
//! Every buffer carries its own `width × height` and refuses to be built
//! from a backing vector of the wrong length, so downstream stages never
//! infer a shape.
//!
//! | Module    | Purpose                                               |
//! |-----------|-------------------------------------------------------|
//! | `source`  | Decoded images (direct RGB or palette-indexed)        |
//! | `capture` | Owned live screen capture with fit-to-size scaling    |
//! | `dxgi`    | DXGI Desktop Duplication backend (Windows)            |

pub mod capture;
pub mod dxgi;
pub mod source;

pub use capture::{
    CaptureRect, CaptureSource, FrameGrabber, MAX_REGION_PIXELS, PixelFormat, RawScreenFrame,
};
pub use dxgi::DxgiGrabber;
pub use source::{DecodedImage, ImageSource, Palette};

use crate::error::TileError;

// ── Grid ─────────────────────────────────────────────────────────

/// A row-major 2D grid of samples with explicit dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

/// One 8-bit channel of an image.
pub type PixelPlane = Grid<u8>;

impl<T: Copy> Grid<T> {
    /// Wrap `data` as a `width × height` grid.
    pub fn new(width: u32, height: u32, data: Vec<T>) -> Result<Self, TileError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(TileError::Precondition(format!(
                "grid {width}x{height} needs {expected} samples, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a grid by evaluating `f(x, y)` for every position.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample at `(x, y)`, or `None` outside the grid.
    pub fn get(&self, x: u32, y: u32) -> Option<T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[y as usize * self.width as usize + x as usize])
    }

    /// Row `y` as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    pub fn row(&self, y: u32) -> &[T] {
        let start = y as usize * self.width as usize;
        &self.data[start..start + self.width as usize]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Whether `other` has the same dimensions.
    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.width == other.width && self.height == other.height
    }
}

// ── RgbPlanes ────────────────────────────────────────────────────

/// Three equal-shaped channel planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbPlanes {
    red: PixelPlane,
    green: PixelPlane,
    blue: PixelPlane,
}

impl RgbPlanes {
    /// Bundle three planes, rejecting mismatched shapes.
    pub fn new(red: PixelPlane, green: PixelPlane, blue: PixelPlane) -> Result<Self, TileError> {
        if !red.same_shape(&green) || !red.same_shape(&blue) {
            return Err(TileError::Precondition(format!(
                "channel planes differ in shape: r={:?} g={:?} b={:?}",
                red.dimensions(),
                green.dimensions(),
                blue.dimensions()
            )));
        }
        Ok(Self { red, green, blue })
    }

    /// Split an interleaved `RGBRGB…` buffer into planes.
    pub fn from_interleaved(width: u32, height: u32, rgb: &[u8]) -> Result<Self, TileError> {
        let pixels = width as usize * height as usize;
        if rgb.len() != pixels * 3 {
            return Err(TileError::Decode(format!(
                "interleaved RGB buffer for {width}x{height} needs {} bytes, got {}",
                pixels * 3,
                rgb.len()
            )));
        }
        let mut red = Vec::with_capacity(pixels);
        let mut green = Vec::with_capacity(pixels);
        let mut blue = Vec::with_capacity(pixels);
        for px in rgb.chunks_exact(3) {
            red.push(px[0]);
            green.push(px[1]);
            blue.push(px[2]);
        }
        Self::new(
            Grid::new(width, height, red)?,
            Grid::new(width, height, green)?,
            Grid::new(width, height, blue)?,
        )
    }

    /// Re-interleave into `RGBRGB…` order.
    pub fn to_interleaved(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.red.len() * 3);
        for ((r, g), b) in self
            .red
            .as_slice()
            .iter()
            .zip(self.green.as_slice())
            .zip(self.blue.as_slice())
        {
            out.extend_from_slice(&[*r, *g, *b]);
        }
        out
    }

    pub fn red(&self) -> &PixelPlane {
        &self.red
    }

    pub fn green(&self) -> &PixelPlane {
        &self.green
    }

    pub fn blue(&self) -> &PixelPlane {
        &self.blue
    }

    pub fn width(&self) -> u32 {
        self.red.width()
    }

    pub fn height(&self) -> u32 {
        self.red.height()
    }
}

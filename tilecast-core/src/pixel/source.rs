//! Decoded-image pixel sources.
//!
//! A source is either direct RGB or palette-indexed. The distinction is
//! resolved exactly once, when an [`ImageSource`] is built; everything
//! downstream only sees [`RgbPlanes`].

use std::path::Path;

use tracing::debug;

use crate::error::TileError;
use crate::pixel::RgbPlanes;

// ── Palette ──────────────────────────────────────────────────────

/// Index → RGB lookup table for indexed images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<[u8; 3]>,
}

impl Palette {
    /// At most 256 entries, addressed by an 8-bit index.
    pub fn new(entries: Vec<[u8; 3]>) -> Result<Self, TileError> {
        if entries.len() > 256 {
            return Err(TileError::Decode(format!(
                "palette has {} entries (max 256)",
                entries.len()
            )));
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, index: u8) -> Option<[u8; 3]> {
        self.entries.get(index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── DecodedImage ─────────────────────────────────────────────────

/// Raw output of an image decoder.
#[derive(Debug, Clone)]
pub enum DecodedImage {
    /// Interleaved 8-bit `RGBRGB…` samples.
    Direct { width: u32, height: u32, rgb: Vec<u8> },
    /// One palette index per pixel.
    Indexed {
        width: u32,
        height: u32,
        indices: Vec<u8>,
        palette: Palette,
    },
}

impl DecodedImage {
    /// Decode an image file from disk.
    ///
    /// The decoder expands palettes, so the result is always `Direct`.
    pub fn open(path: &Path) -> Result<Self, TileError> {
        let image = image::open(path)?;
        debug!(
            "decoded {} ({}x{}, {:?})",
            path.display(),
            image.width(),
            image.height(),
            image.color()
        );
        Ok(Self::from_dynamic(image))
    }

    /// Decode an in-memory encoded image (PNG, BMP, …). Always `Direct`.
    pub fn from_memory(bytes: &[u8]) -> Result<Self, TileError> {
        Ok(Self::from_dynamic(image::load_from_memory(bytes)?))
    }

    fn from_dynamic(image: image::DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        Self::Direct {
            width: rgb.width(),
            height: rgb.height(),
            rgb: rgb.into_raw(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Direct { width, height, .. } | Self::Indexed { width, height, .. } => {
                (*width, *height)
            }
        }
    }
}

// ── ImageSource ──────────────────────────────────────────────────

/// A still image normalised to RGB planes.
#[derive(Debug, Clone)]
pub struct ImageSource {
    planes: RgbPlanes,
    indexed: bool,
}

impl ImageSource {
    /// Resolve `decoded` into RGB planes.
    ///
    /// Indexed data is looked up through its palette here; an index with
    /// no palette entry is a [`TileError::Decode`].
    pub fn new(decoded: DecodedImage) -> Result<Self, TileError> {
        match decoded {
            DecodedImage::Direct { width, height, rgb } => Ok(Self {
                planes: RgbPlanes::from_interleaved(width, height, &rgb)?,
                indexed: false,
            }),
            DecodedImage::Indexed {
                width,
                height,
                indices,
                palette,
            } => {
                let pixels = width as usize * height as usize;
                if indices.len() != pixels {
                    return Err(TileError::Decode(format!(
                        "indexed image {width}x{height} needs {pixels} indices, got {}",
                        indices.len()
                    )));
                }
                let mut rgb = Vec::with_capacity(pixels * 3);
                for (i, &index) in indices.iter().enumerate() {
                    let color = palette.lookup(index).ok_or_else(|| {
                        TileError::Decode(format!(
                            "pixel {i} uses index {index} outside a {}-entry palette",
                            palette.len()
                        ))
                    })?;
                    rgb.extend_from_slice(&color);
                }
                Ok(Self {
                    planes: RgbPlanes::from_interleaved(width, height, &rgb)?,
                    indexed: true,
                })
            }
        }
    }

    /// Decode and resolve an image file in one step.
    pub fn open(path: &Path) -> Result<Self, TileError> {
        Self::new(DecodedImage::open(path)?)
    }

    pub fn planes(&self) -> &RgbPlanes {
        &self.planes
    }

    pub fn into_planes(self) -> RgbPlanes {
        self.planes
    }

    /// Whether the source went through palette resolution.
    pub fn was_indexed(&self) -> bool {
        self.indexed
    }
}

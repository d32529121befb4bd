//! The precomputed set of transmittable units.
//!
//! A [`Catalog`] is built once from an image before the serial port is
//! opened and never mutated afterwards; the session shares it behind an
//! `Arc`. Every geometry limit the wire imposes (single-byte coordinates,
//! `u16` counts and lengths) is checked here, so a catalog that exists can
//! always be served.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::color::ColorReducer;
use crate::error::TileError;
use crate::pixel::RgbPlanes;
use crate::tile::Tiler;

// ── DisplaySurface ───────────────────────────────────────────────

/// The device's drawable area. Coordinates are sent as single bytes, so
/// each side is at most 256 pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySurface {
    pub width: u16,
    pub height: u16,
}

impl DisplaySurface {
    pub fn new(width: u16, height: u16) -> Result<Self, TileError> {
        if !(1..=256).contains(&width) || !(1..=256).contains(&height) {
            return Err(TileError::Precondition(format!(
                "display {width}x{height} must be between 1x1 and 256x256"
            )));
        }
        Ok(Self { width, height })
    }
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self {
            width: 160,
            height: 128,
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// Inclusive rectangle on the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x0: u8,
    pub y0: u8,
    pub x1: u8,
    pub y1: u8,
}

impl Rect {
    /// Center a `width × height` block on `display`.
    pub fn centered(width: u32, height: u32, display: DisplaySurface) -> Result<Self, TileError> {
        let (dw, dh) = (display.width as u32, display.height as u32);
        if width == 0 || height == 0 || width > dw || height > dh {
            return Err(TileError::Precondition(format!(
                "region {width}x{height} does not fit the {dw}x{dh} display"
            )));
        }
        let x0 = (dw - width) / 2;
        let y0 = (dh - height) / 2;
        // Display sides are ≤ 256, so every coordinate is ≤ 255.
        Ok(Self {
            x0: x0 as u8,
            y0: y0 as u8,
            x1: (x0 + width - 1) as u8,
            y1: (y0 + height - 1) as u8,
        })
    }

    pub fn width(&self) -> u32 {
        self.x1 as u32 - self.x0 as u32 + 1
    }

    pub fn height(&self) -> u32 {
        self.y1 as u32 - self.y0 as u32 + 1
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

// ── Placement ────────────────────────────────────────────────────

/// Where a unit lands on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Top-left corner of a fixed-size tile.
    Tile { x: u8, y: u8 },
    /// Arbitrary rectangle carrying its own length header.
    Region(Rect),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Tile { x, y } => write!(f, "tile@({x},{y})"),
            Placement::Region(r) => write!(f, "region({},{})-({},{})", r.x0, r.y0, r.x1, r.y1),
        }
    }
}

// ── CatalogEntry ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub placement: Placement,
    /// Serialised packed colors.
    pub payload: Bytes,
}

impl CatalogEntry {
    /// A whole frame reduced and centered on `display`.
    pub fn region(
        planes: &RgbPlanes,
        display: DisplaySurface,
        reducer: ColorReducer,
    ) -> Result<Self, TileError> {
        let rect = Rect::centered(planes.width(), planes.height(), display)?;
        let payload = reducer.serialize(reducer.reduce(planes).as_slice());
        if payload.len() > u16::MAX as usize {
            return Err(TileError::Precondition(format!(
                "region payload of {} bytes exceeds the u16 length header",
                payload.len()
            )));
        }
        debug_assert_eq!(payload.len(), rect.pixel_count() * 2);
        Ok(Self {
            placement: Placement::Region(rect),
            payload: Bytes::from(payload),
        })
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Wrap prepared entries; the count must fit the `u16` wire field.
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, TileError> {
        if entries.len() > u16::MAX as usize {
            return Err(TileError::Precondition(format!(
                "catalog of {} entries cannot be addressed with a u16 index",
                entries.len()
            )));
        }
        Ok(Self { entries })
    }

    /// Reduce `planes` and cut them into tiles.
    pub fn from_tiles(
        planes: &RgbPlanes,
        tiler: Tiler,
        reducer: ColorReducer,
    ) -> Result<Self, TileError> {
        // Fail on geometry before reducing anything.
        if planes.width() == 0 || planes.height() == 0 {
            return Err(TileError::Precondition(format!(
                "cannot tile an empty {}x{} image",
                planes.width(),
                planes.height()
            )));
        }
        tiler.grid_size(planes.width(), planes.height())?;
        let last_x = planes.width() - tiler.edge();
        let last_y = planes.height() - tiler.edge();
        if last_x > u8::MAX as u32 || last_y > u8::MAX as u32 {
            return Err(TileError::Precondition(format!(
                "tile origin ({last_x},{last_y}) does not fit single-byte coordinates"
            )));
        }

        let reduced = reducer.reduce(planes);
        let entries = tiler
            .split(&reduced)?
            .into_iter()
            .map(|tile| CatalogEntry {
                placement: Placement::Tile {
                    x: tile.x as u8,
                    y: tile.y as u8,
                },
                payload: Bytes::from(reducer.serialize(tile.pixels.as_slice())),
            })
            .collect();
        let catalog = Self::new(entries)?;
        info!(
            "catalog: {} tiles of {}x{} from a {}x{} image",
            catalog.len(),
            tiler.edge(),
            tiler.edge(),
            planes.width(),
            planes.height()
        );
        Ok(catalog)
    }

    /// A single region entry holding the whole image.
    pub fn from_region(
        planes: &RgbPlanes,
        display: DisplaySurface,
        reducer: ColorReducer,
    ) -> Result<Self, TileError> {
        let entry = CatalogEntry::region(planes, display, reducer)?;
        info!("catalog: one {} of {} bytes", entry.placement, entry.payload.len());
        Self::new(vec![entry])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bounds-checked lookup by device-supplied index.
    pub fn get(&self, index: u16) -> Result<&CatalogEntry, TileError> {
        self.entries
            .get(index as usize)
            .ok_or(TileError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Total payload bytes across all entries.
    pub fn payload_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.payload.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ByteOrder, PackedColor};
    use crate::pixel::Grid;

    fn planes(width: u32, height: u32) -> RgbPlanes {
        RgbPlanes::new(
            Grid::from_fn(width, height, |x, _| (x * 8) as u8),
            Grid::from_fn(width, height, |_, y| (y * 4) as u8),
            Grid::from_fn(width, height, |_, _| 0xF8),
        )
        .unwrap()
    }

    #[test]
    fn tiles_carry_grid_placement() {
        let catalog =
            Catalog::from_tiles(&planes(24, 16), Tiler::new(8).unwrap(), ColorReducer::default())
                .unwrap();
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.get(4).unwrap().placement, Placement::Tile { x: 8, y: 8 });
        assert_eq!(catalog.get(0).unwrap().payload.len(), 8 * 8 * 2);
    }

    #[test]
    fn tile_payload_is_row_major_within_tile() {
        let catalog = Catalog::from_tiles(
            &planes(16, 8),
            Tiler::new(8).unwrap(),
            ColorReducer::new(ByteOrder::HighFirst),
        )
        .unwrap();
        let payload = &catalog.get(1).unwrap().payload;
        // Second pixel of tile 1 is source (9, 0).
        let expected = PackedColor::pack(9 * 8, 0, 0xF8).0.to_be_bytes();
        assert_eq!(&payload[2..4], &expected);
        // First pixel of the tile's second row is source (8, 1).
        let expected = PackedColor::pack(8 * 8, 4, 0xF8).0.to_be_bytes();
        assert_eq!(&payload[16..18], &expected);
    }

    #[test]
    fn out_of_range_lookup() {
        let catalog =
            Catalog::from_tiles(&planes(8, 8), Tiler::new(8).unwrap(), ColorReducer::default())
                .unwrap();
        assert!(matches!(
            catalog.get(1),
            Err(TileError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn wide_image_rejected_before_reduction() {
        let err = Catalog::from_tiles(
            &planes(272, 8),
            Tiler::new(8).unwrap(),
            ColorReducer::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TileError::Precondition(_)));
    }

    #[test]
    fn empty_image_rejected() {
        for (w, h) in [(0, 0), (8, 0), (0, 8)] {
            let err = Catalog::from_tiles(
                &planes(w, h),
                Tiler::new(8).unwrap(),
                ColorReducer::default(),
            )
            .unwrap_err();
            assert!(matches!(err, TileError::Precondition(_)), "{w}x{h}: {err:?}");
        }
    }

    #[test]
    fn region_is_centered() {
        let display = DisplaySurface::new(160, 128).unwrap();
        let catalog = Catalog::from_region(&planes(100, 60), display, ColorReducer::default())
            .unwrap();
        let entry = catalog.get(0).unwrap();
        assert_eq!(
            entry.placement,
            Placement::Region(Rect {
                x0: 30,
                y0: 34,
                x1: 129,
                y1: 93
            })
        );
        assert_eq!(entry.payload.len(), 100 * 60 * 2);
    }

    #[test]
    fn region_larger_than_display_rejected() {
        let display = DisplaySurface::new(64, 64).unwrap();
        assert!(Catalog::from_region(&planes(80, 8), display, ColorReducer::default()).is_err());
    }

    #[test]
    fn display_limits() {
        assert!(DisplaySurface::new(256, 256).is_ok());
        assert!(DisplaySurface::new(257, 10).is_err());
        assert!(DisplaySurface::new(0, 10).is_err());
    }
}

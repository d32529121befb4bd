//! RGB888 → RGB565 color reduction.
//!
//! Reduction truncates: red and blue keep their top 5 bits, green its top
//! 6. There is no rounding or dithering, so the transform is deterministic
//! and idempotent on already-reduced values.

use serde::{Deserialize, Serialize};

use crate::error::TileError;
use crate::pixel::{Grid, RgbPlanes};

// ── PackedColor ──────────────────────────────────────────────────

/// A 16-bit 5-6-5 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackedColor(pub u16);

impl PackedColor {
    pub const fn pack(r: u8, g: u8, b: u8) -> Self {
        Self((((r & 0xF8) as u16) << 8) | (((g & 0xFC) as u16) << 3) | (((b & 0xF8) as u16) >> 3))
    }

    /// Retained channel bits, back in 8-bit position.
    pub const fn unpack(self) -> (u8, u8, u8) {
        let v = self.0;
        (
            ((v >> 8) & 0xF8) as u8,
            ((v >> 3) & 0xFC) as u8,
            ((v << 3) & 0xF8) as u8,
        )
    }

    /// Wire bytes in the given order.
    pub const fn to_bytes(self, order: ByteOrder) -> [u8; 2] {
        match order {
            ByteOrder::LowFirst => self.0.to_le_bytes(),
            ByteOrder::HighFirst => self.0.to_be_bytes(),
        }
    }

    pub const fn from_bytes(bytes: [u8; 2], order: ByteOrder) -> Self {
        match order {
            ByteOrder::LowFirst => Self(u16::from_le_bytes(bytes)),
            ByteOrder::HighFirst => Self(u16::from_be_bytes(bytes)),
        }
    }
}

// ── ByteOrder ────────────────────────────────────────────────────

/// Byte order of packed colors on the wire. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    /// Low byte first (host memory order).
    #[default]
    LowFirst,
    /// High byte first, for panels that expect swapped colors.
    HighFirst,
}

impl ByteOrder {
    pub fn from_swap(swap: bool) -> Self {
        if swap {
            ByteOrder::HighFirst
        } else {
            ByteOrder::LowFirst
        }
    }
}

// ── ColorReducer ─────────────────────────────────────────────────

/// Reduces RGB planes to a grid of packed colors and serialises them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorReducer {
    order: ByteOrder,
}

impl ColorReducer {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Pack every pixel of `planes`.
    pub fn reduce(&self, planes: &RgbPlanes) -> Grid<PackedColor> {
        let (r, g, b) = (planes.red(), planes.green(), planes.blue());
        Grid::from_fn(planes.width(), planes.height(), |x, y| {
            let i = y as usize * planes.width() as usize + x as usize;
            PackedColor::pack(r.as_slice()[i], g.as_slice()[i], b.as_slice()[i])
        })
    }

    /// Pack three loose planes, checking their shapes first.
    pub fn reduce_planes(
        &self,
        red: &Grid<u8>,
        green: &Grid<u8>,
        blue: &Grid<u8>,
    ) -> Result<Grid<PackedColor>, TileError> {
        let planes = RgbPlanes::new(red.clone(), green.clone(), blue.clone())?;
        Ok(self.reduce(&planes))
    }

    /// Serialise colors in row-major order with this reducer's byte order.
    pub fn serialize<'a>(&self, colors: impl IntoIterator<Item = &'a PackedColor>) -> Vec<u8> {
        let iter = colors.into_iter();
        let mut out = Vec::with_capacity(iter.size_hint().0 * 2);
        for c in iter {
            out.extend_from_slice(&c.to_bytes(self.order));
        }
        out
    }

    /// Read back a serialised payload. A trailing odd byte is ignored.
    pub fn parse(&self, bytes: &[u8]) -> Vec<PackedColor> {
        bytes
            .chunks_exact(2)
            .map(|pair| PackedColor::from_bytes([pair[0], pair[1]], self.order))
            .collect()
    }
}

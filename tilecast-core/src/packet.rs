//! Payload chunking sized to the device's receive buffer.

use bytes::Bytes;

use crate::error::TileError;

/// Bytes per packed color; packets never split one.
pub const COLOR_BYTES: usize = 2;

/// Packet size used by the classic firmware.
pub const CLASSIC_PACKET_SIZE: usize = 32;

/// Packet size used by the live-capture firmware.
pub const LIVE_PACKET_SIZE: usize = 256;

/// Splits payloads into packets of at most `size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    size: usize,
}

impl Packetizer {
    /// Odd sizes are rounded down to a whole number of colors.
    pub fn new(size: usize) -> Result<Self, TileError> {
        let size = size - size % COLOR_BYTES;
        if size == 0 {
            return Err(TileError::Precondition(format!(
                "packet size must hold at least one {COLOR_BYTES}-byte color"
            )));
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of packets `len` bytes occupy.
    pub fn count(&self, len: usize) -> usize {
        len.div_ceil(self.size)
    }

    /// Zero-copy packet views over `payload`. Empty input yields none.
    pub fn split(&self, payload: &Bytes) -> Vec<Bytes> {
        (0..payload.len())
            .step_by(self.size)
            .map(|start| payload.slice(start..(start + self.size).min(payload.len())))
            .collect()
    }
}

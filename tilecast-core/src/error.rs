//! Domain-specific error types for tilecast.
//!
//! Pipeline failures (`Shape`, `Precondition`, `Decode`) abort startup before
//! the serial port is touched. Session failures are split into the ones the
//! protocol loop recovers from (`Protocol`, `Timeout`, `Capture`) and the
//! ones that end the session (`Transport`).

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for tilecast.
#[derive(Debug, Error)]
pub enum TileError {
    // ── Pipeline Errors ──────────────────────────────────────────
    /// A grid's dimensions do not fit the requested operation.
    #[error("shape error: {width}x{height} is not divisible into {tile}x{tile} tiles")]
    Shape { width: u32, height: u32, tile: u32 },

    /// Inputs violated a precondition checked before any I/O.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Source image data could not be interpreted as RGB or indexed RGB.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Session Errors ───────────────────────────────────────────
    /// The device sent a byte sequence the host cannot serve.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A catalog index supplied by the device is outside the catalog.
    #[error("index {index} out of range (catalog has {len} entries)")]
    IndexOutOfRange { index: u16, len: usize },

    /// The serial link failed or was closed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A read did not complete within its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Live screen capture could not produce a frame.
    #[error("capture error: {0}")]
    Capture(String),

    /// The session was asked to stop.
    #[error("session cancelled")]
    Cancelled,
}

impl TileError {
    /// Whether the protocol loop can answer this error and keep serving.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TileError::Protocol(_)
                | TileError::IndexOutOfRange { .. }
                | TileError::Timeout(_)
                | TileError::Capture(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<image::ImageError> for TileError {
    fn from(e: image::ImageError) -> Self {
        TileError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TileError::Shape {
            width: 30,
            height: 16,
            tile: 8,
        };
        assert!(e.to_string().contains("30x16"));

        let e = TileError::IndexOutOfRange { index: 9, len: 4 };
        assert!(e.to_string().contains('9'));
        assert!(e.to_string().contains('4'));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TileError = io_err.into();
        assert!(matches!(e, TileError::Transport(_)));
        assert!(!e.is_recoverable());
    }

    #[test]
    fn recoverable_split() {
        assert!(TileError::Timeout(Duration::from_millis(5)).is_recoverable());
        assert!(TileError::IndexOutOfRange { index: 1, len: 0 }.is_recoverable());
        assert!(!TileError::Decode("bad".into()).is_recoverable());
    }
}

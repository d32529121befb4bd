//! # tilecast-core
//!
//! Host-side library for streaming images to a small serial display that
//! pulls its data on demand.
//!
//! This crate contains:
//! - **Pixel sources**: `ImageSource` (decoded, direct or palette-indexed) and `CaptureSource` (live screen)
//! - **Pipeline**: `ColorReducer` (RGB565), `Tiler`, `Packetizer`
//! - **Catalog**: the immutable set of tiles/regions served to the device
//! - **Transport**: the async byte-transport seam and a stream adapter
//! - **Session**: the framing/dispatch state machine with ACK-gated transfers
//! - **Error**: `TileError`, a typed, `thiserror`-based error hierarchy

pub mod catalog;
pub mod color;
pub mod error;
pub mod packet;
pub mod pixel;
pub mod protocol;
pub mod session;
pub mod tile;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use catalog::{Catalog, CatalogEntry, DisplaySurface, Placement, Rect};
pub use color::{ByteOrder, ColorReducer, PackedColor};
pub use error::TileError;
pub use packet::{CLASSIC_PACKET_SIZE, LIVE_PACKET_SIZE, Packetizer};
pub use pixel::{
    CaptureRect, CaptureSource, DecodedImage, DxgiGrabber, FrameGrabber, Grid, ImageSource,
    Palette, PixelPlane, RgbPlanes,
};
pub use protocol::{ACK, Command, FRAME_DELIMITER, Generation, NAK};
pub use session::{Session, SessionConfig, SessionEnd, SessionState, SessionStats, SessionSummary};
pub use tile::{Tile, Tiler};
pub use transport::{StreamTransport, Transport};

//! Wire constants and command decoding.
//!
//! ```text
//! Device ── <diagnostic text…> 0xFF <opcode> [args] ──► Host
//! Host   ── response bytes, each unit gated on 0xAA ──► Device
//! ```
//!
//! Multi-byte integers are little-endian; display coordinates are single
//! bytes. Which opcodes exist depends on the firmware [`Generation`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TileError;

/// Ends device diagnostic text and announces a command byte.
pub const FRAME_DELIMITER: u8 = 0xFF;

/// Sent by the device once it has consumed a unit.
pub const ACK: u8 = 0xAA;

/// Sent by the host when it refuses a command.
pub const NAK: u8 = 0x15;

// ── Generation ───────────────────────────────────────────────────

/// Firmware protocol generation. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    /// Tile streaming; `0x03` terminates.
    #[default]
    Classic,
    /// Tiles or regions plus on-demand capture; `0xFE` terminates.
    Live,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Classic => write!(f, "classic"),
            Generation::Live => write!(f, "live"),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// A decoded device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `0x01`: report the catalog size.
    QueryCount,
    /// `0x02`: send one catalog entry; a `u16` index follows.
    FetchUnit,
    /// `0x03` (live): capture the screen and send it as a region.
    LiveCapture,
    /// `0x03` (classic) / `0xFE` (live): end the session.
    Terminate,
}

impl Command {
    pub const QUERY_COUNT: u8 = 0x01;
    pub const FETCH_UNIT: u8 = 0x02;
    pub const LIVE_CAPTURE: u8 = 0x03;
    pub const CLASSIC_TERMINATE: u8 = 0x03;
    pub const LIVE_TERMINATE: u8 = 0xFE;

    /// Decode `opcode` for `generation`.
    pub fn decode(opcode: u8, generation: Generation) -> Result<Self, TileError> {
        match (opcode, generation) {
            (Self::QUERY_COUNT, _) => Ok(Command::QueryCount),
            (Self::FETCH_UNIT, _) => Ok(Command::FetchUnit),
            (Self::CLASSIC_TERMINATE, Generation::Classic) => Ok(Command::Terminate),
            (Self::LIVE_CAPTURE, Generation::Live) => Ok(Command::LiveCapture),
            (Self::LIVE_TERMINATE, Generation::Live) => Ok(Command::Terminate),
            _ => Err(TileError::Protocol(format!(
                "unknown opcode {opcode:#04x} for {generation} protocol"
            ))),
        }
    }

    /// The opcode byte for this command under `generation`.
    pub fn opcode(self, generation: Generation) -> Option<u8> {
        match (self, generation) {
            (Command::QueryCount, _) => Some(Self::QUERY_COUNT),
            (Command::FetchUnit, _) => Some(Self::FETCH_UNIT),
            (Command::LiveCapture, Generation::Live) => Some(Self::LIVE_CAPTURE),
            (Command::LiveCapture, Generation::Classic) => None,
            (Command::Terminate, Generation::Classic) => Some(Self::CLASSIC_TERMINATE),
            (Command::Terminate, Generation::Live) => Some(Self::LIVE_TERMINATE),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::QueryCount => write!(f, "QueryCount"),
            Command::FetchUnit => write!(f, "FetchUnit"),
            Command::LiveCapture => write!(f, "LiveCapture"),
            Command::Terminate => write!(f, "Terminate"),
        }
    }
}

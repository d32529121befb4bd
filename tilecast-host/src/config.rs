//! Configuration for the serial host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tilecast_core::{
    ByteOrder, CLASSIC_PACKET_SIZE, CaptureRect, DisplaySurface, Generation, LIVE_PACKET_SIZE,
    SessionConfig, TileError,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Serial link settings.
    pub serial: SerialConfig,
    /// Image pipeline settings.
    pub image: ImageConfig,
    /// Firmware protocol settings.
    pub protocol: ProtocolConfig,
    /// Device display surface.
    pub display: DisplayConfig,
    /// Live screen capture settings.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyACM0` or `COM3`.
    pub port: String,
    /// Line speed (8N1).
    pub baud: u32,
    /// Per-read deadline in milliseconds; 0 waits forever.
    pub read_timeout_ms: u64,
}

/// How the image is cut into catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Square tiles of `tile_size`.
    #[default]
    Tiles,
    /// One region centered on the display.
    Region,
}

/// Image pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Image served to the device.
    pub path: PathBuf,
    pub layout: Layout,
    /// Tile edge in pixels; 0 sends the whole (square) image as one tile.
    pub tile_size: u32,
    /// Packet size in bytes; 0 picks the protocol generation's default.
    pub packet_size: usize,
    /// Send packed colors high byte first.
    pub swap_bytes: bool,
}

/// Protocol configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// `"classic"` or `"live"`.
    pub generation: Generation,
}

/// Display surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u16,
    pub height: u16,
}

/// Live capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Serve the live-capture command.
    pub enabled: bool,
    /// Monitor index to capture (0 = primary).
    pub monitor: u32,
    /// Desktop rectangle, in screen pixels.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// DXGI acquire timeout in milliseconds.
    pub acquire_timeout_ms: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port().into(),
            baud: 115_200,
            read_timeout_ms: 5_000,
        }
    }
}

fn default_port() -> &'static str {
    if cfg!(target_os = "windows") {
        "COM3"
    } else {
        "/dev/ttyACM0"
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("image.png"),
            layout: Layout::Tiles,
            tile_size: 8,
            packet_size: 0,
            swap_bytes: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let surface = DisplaySurface::default();
        Self {
            width: surface.width,
            height: surface.height,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monitor: 0,
            x: 0,
            y: 0,
            width: 640,
            height: 480,
            acquire_timeout_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Byte order implied by `image.swap_bytes`.
    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_swap(self.image.swap_bytes)
    }

    pub fn display(&self) -> Result<DisplaySurface, TileError> {
        DisplaySurface::new(self.display.width, self.display.height)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        match self.serial.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Packet size, defaulting per protocol generation.
    pub fn packet_size(&self) -> usize {
        match (self.image.packet_size, self.protocol.generation) {
            (0, Generation::Classic) => CLASSIC_PACKET_SIZE,
            (0, Generation::Live) => LIVE_PACKET_SIZE,
            (size, _) => size,
        }
    }

    pub fn capture_rect(&self) -> CaptureRect {
        CaptureRect {
            x: self.capture.x,
            y: self.capture.y,
            width: self.capture.width,
            height: self.capture.height,
        }
    }

    /// Convert protocol settings into a `SessionConfig`.
    pub fn to_session_config(&self) -> Result<SessionConfig, TileError> {
        if self.image.layout == Layout::Region && self.protocol.generation == Generation::Classic {
            return Err(TileError::Precondition(
                "image.layout = \"region\" needs protocol.generation = \"live\"".into(),
            ));
        }
        Ok(SessionConfig {
            generation: self.protocol.generation,
            packet_size: self.packet_size(),
            read_timeout: self.read_timeout(),
            display: self.display()?,
            byte_order: self.byte_order(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

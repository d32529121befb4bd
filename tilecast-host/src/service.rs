//! Host service core logic.
//!
//! Builds the catalog from the configured image before the serial port is
//! touched, then serves one device session until the device terminates,
//! the link fails, or the host is stopped.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tilecast_core::{
    CaptureSource, Catalog, ColorReducer, DxgiGrabber, Generation, Grid, ImageSource, Placement,
    RgbPlanes, Session, SessionSummary, Tile, TileError, Tiler,
};

use crate::config::{HostConfig, Layout};
use crate::serial::SerialTransport;

// ── HostService ──────────────────────────────────────────────────

/// The top-level host service.
pub struct HostService {
    config: HostConfig,
    cancel: CancellationToken,
}

impl HostService {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Obtain a handle that stops the session from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one device session.
    ///
    /// 1. Decodes the image and builds the catalog (fails before any I/O).
    /// 2. Opens the capture backend when live capture is enabled.
    /// 3. Opens the serial port and serves the device.
    pub async fn run(&self) -> Result<SessionSummary, TileError> {
        let catalog = Arc::new(build_catalog(&self.config)?);
        let session_config = self.config.to_session_config()?;
        let capture = open_capture(&self.config)?;

        let transport = SerialTransport::open(
            &self.config.serial.port,
            self.config.serial.baud,
            session_config.read_timeout,
        )?
        .with_cancellation(self.cancel.clone());

        let mut session =
            Session::new(transport, catalog, session_config)?.with_cancellation(self.cancel.clone());
        if let Some(capture) = capture {
            session = session.with_capture(capture);
        }
        session.run().await
    }

    /// Build the catalog, check it decodes back to the source image, and
    /// log a summary. Never opens the serial port.
    pub fn inspect(&self) -> Result<(), TileError> {
        let planes = load_planes(&self.config)?;
        let catalog = catalog_for(&self.config, &planes)?;
        let session_config = self.config.to_session_config()?;
        let packets: usize = catalog
            .iter()
            .map(|e| e.payload.len().div_ceil(session_config.packet_size.max(1)))
            .sum();

        info!(
            "{}: {} entries, {} payload bytes, ~{packets} packets",
            self.config.image.path.display(),
            catalog.len(),
            catalog.payload_bytes()
        );
        for (index, entry) in catalog.iter().enumerate().take(8) {
            info!("  [{index}] {} {} bytes", entry.placement, entry.payload.len());
        }
        if catalog.len() > 8 {
            info!("  … {} more", catalog.len() - 8);
        }

        verify(&self.config, &catalog, &planes)?;
        info!("catalog verified against source image");
        Ok(())
    }
}

// ── Pipeline ─────────────────────────────────────────────────────

/// Decode the configured image and cut it per `image.layout`.
pub fn build_catalog(config: &HostConfig) -> Result<Catalog, TileError> {
    catalog_for(config, &load_planes(config)?)
}

fn load_planes(config: &HostConfig) -> Result<RgbPlanes, TileError> {
    let source = ImageSource::open(&config.image.path)?;
    info!(
        "decoded {} ({}x{})",
        config.image.path.display(),
        source.planes().width(),
        source.planes().height()
    );
    Ok(source.into_planes())
}

pub fn catalog_for(config: &HostConfig, planes: &RgbPlanes) -> Result<Catalog, TileError> {
    let reducer = ColorReducer::new(config.byte_order());
    match config.image.layout {
        Layout::Tiles => {
            let tiler = tiler_for(config, planes.width(), planes.height())?;
            Catalog::from_tiles(planes, tiler, reducer)
        }
        Layout::Region => Catalog::from_region(planes, config.display()?, reducer),
    }
}

/// Tile edge from config; 0 means the whole image as a single tile.
fn tiler_for(config: &HostConfig, width: u32, height: u32) -> Result<Tiler, TileError> {
    match config.image.tile_size {
        0 if width != height => Err(TileError::Precondition(format!(
            "whole-image tile needs a square image, got {width}x{height}"
        ))),
        0 => Tiler::new(width),
        edge => Tiler::new(edge),
    }
}

/// Reassemble the catalog and compare it with a fresh reduction.
fn verify(config: &HostConfig, catalog: &Catalog, planes: &RgbPlanes) -> Result<(), TileError> {
    let reducer = ColorReducer::new(config.byte_order());
    let expected = reducer.reduce(planes);

    let rebuilt = match config.image.layout {
        Layout::Tiles => {
            let tiler = tiler_for(config, planes.width(), planes.height())?;
            let mut tiles = Vec::with_capacity(catalog.len());
            for (index, entry) in catalog.iter().enumerate() {
                let Placement::Tile { x, y } = entry.placement else {
                    return Err(TileError::Precondition(format!("entry {index} is not a tile")));
                };
                tiles.push(Tile {
                    index,
                    x: x as u32,
                    y: y as u32,
                    pixels: Grid::new(tiler.edge(), tiler.edge(), reducer.parse(&entry.payload))?,
                });
            }
            tiler.reassemble(&tiles, planes.width(), planes.height())?
        }
        Layout::Region => {
            let entry = catalog.get(0)?;
            let Placement::Region(rect) = entry.placement else {
                return Err(TileError::Precondition("entry 0 is not a region".into()));
            };
            Grid::new(rect.width(), rect.height(), reducer.parse(&entry.payload))?
        }
    };

    if rebuilt != expected {
        return Err(TileError::Precondition(
            "catalog payloads do not reproduce the source image".into(),
        ));
    }
    Ok(())
}

/// Open the DXGI backend when live capture is configured.
fn open_capture(config: &HostConfig) -> Result<Option<CaptureSource>, TileError> {
    if !config.capture.enabled {
        return Ok(None);
    }
    if config.protocol.generation != Generation::Live {
        warn!("capture.enabled ignored: the classic protocol has no live-capture command");
        return Ok(None);
    }

    let grabber = DxgiGrabber::new(config.capture.monitor)?
        .with_acquire_timeout(config.capture.acquire_timeout_ms);
    info!(
        "capturing monitor {} ({}x{} desktop)",
        config.capture.monitor,
        grabber.width(),
        grabber.height()
    );
    let display = config.display()?;
    let source = CaptureSource::new(
        Box::new(grabber),
        config.capture_rect(),
        display.width as u32,
        display.height as u32,
    )?;
    Ok(Some(source))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_image_tile_needs_square() {
        let mut cfg = HostConfig::default();
        cfg.image.tile_size = 0;
        assert_eq!(tiler_for(&cfg, 32, 32).unwrap().edge(), 32);
        assert!(tiler_for(&cfg, 32, 16).is_err());
    }

    #[test]
    fn missing_image_fails_before_io() {
        let mut cfg = HostConfig::default();
        cfg.image.path = "/nonexistent/tilecast.png".into();
        assert!(matches!(build_catalog(&cfg), Err(TileError::Decode(_))));
    }

    fn checker(width: u32, height: u32) -> RgbPlanes {
        let rgb: Vec<u8> = (0..width * height)
            .flat_map(|i| if i % 3 == 0 { [0xFF, 0x20, 0x00] } else { [0x00, 0x40, 0xFF] })
            .collect();
        RgbPlanes::from_interleaved(width, height, &rgb).unwrap()
    }

    #[test]
    fn tile_catalog_verifies() {
        let mut cfg = HostConfig::default();
        cfg.image.swap_bytes = true;
        let planes = checker(24, 16);
        let catalog = catalog_for(&cfg, &planes).unwrap();
        assert_eq!(catalog.len(), 6);
        verify(&cfg, &catalog, &planes).unwrap();
    }

    #[test]
    fn region_catalog_verifies() {
        let mut cfg = HostConfig::default();
        cfg.image.layout = Layout::Region;
        let planes = checker(40, 30);
        let catalog = catalog_for(&cfg, &planes).unwrap();
        assert_eq!(catalog.len(), 1);
        verify(&cfg, &catalog, &planes).unwrap();
    }

    #[test]
    fn verify_catches_mismatch() {
        let cfg = HostConfig::default();
        let catalog = catalog_for(&cfg, &checker(16, 16)).unwrap();
        assert!(verify(&cfg, &catalog, &checker(16, 16)).is_ok());

        let other = RgbPlanes::from_interleaved(16, 16, &[0u8; 16 * 16 * 3]).unwrap();
        assert!(verify(&cfg, &catalog, &other).is_err());
    }

    #[test]
    fn capture_disabled_by_default() {
        assert!(open_capture(&HostConfig::default()).unwrap().is_none());
    }

    #[test]
    fn capture_ignored_on_classic() {
        let mut cfg = HostConfig::default();
        cfg.capture.enabled = true;
        assert!(open_capture(&cfg).unwrap().is_none());
    }
}

//! Integration tests: full device sessions, command round-trips, and
//! fault scenarios over an in-memory duplex link.
//!
//! The test plays the device: it writes frames and ACKs, and reads exactly
//! the bytes the host is expected to produce at each step.

use std::sync::Arc;
use std::time::Duration;

use tilecast_core::pixel::{PixelFormat, RawScreenFrame};
use tilecast_core::{
    ACK, ByteOrder, CaptureRect, CaptureSource, Catalog, ColorReducer, DisplaySurface,
    FRAME_DELIMITER, FrameGrabber, Generation, LIVE_PACKET_SIZE, NAK, RgbPlanes, Session,
    SessionConfig, SessionEnd, SessionSummary, StreamTransport, TileError, Tiler,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

const STEP: Duration = Duration::from_secs(5);

/// Device end of the link.
struct Device {
    io: DuplexStream,
}

impl Device {
    async fn send(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    async fn recv(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(STEP, self.io.read_exact(&mut buf))
            .await
            .expect("timeout waiting for host")
            .expect("link closed");
        buf
    }

    /// Assert the host writes nothing for `window`.
    async fn expect_silence(&mut self, window: Duration) {
        let mut byte = [0u8; 1];
        let r = tokio::time::timeout(window, self.io.read(&mut byte)).await;
        assert!(r.is_err(), "host wrote unexpectedly: {r:?}");
    }
}

type Link = StreamTransport<DuplexStream>;
type Running = JoinHandle<Result<SessionSummary, TileError>>;

fn start(session_of: impl FnOnce(Link) -> Session<Link>) -> (Device, Running) {
    let (device, host) = tokio::io::duplex(4096);
    let mut session = session_of(StreamTransport::new(host));
    let handle = tokio::spawn(async move { session.run().await });
    (Device { io: device }, handle)
}

/// A horizontal gradient so every tile has distinct content.
fn gradient(width: u32, height: u32) -> RgbPlanes {
    let rgb: Vec<u8> = (0..height)
        .flat_map(|y| (0..width).flat_map(move |x| [(x * 16) as u8, (y * 16) as u8, 0x80]))
        .collect();
    RgbPlanes::from_interleaved(width, height, &rgb).unwrap()
}

fn tile_catalog(width: u32, height: u32) -> Arc<Catalog> {
    let catalog = Catalog::from_tiles(
        &gradient(width, height),
        Tiler::new(8).unwrap(),
        ColorReducer::new(ByteOrder::LowFirst),
    )
    .unwrap();
    Arc::new(catalog)
}

fn classic(catalog: Arc<Catalog>) -> impl FnOnce(Link) -> Session<Link> {
    move |t| Session::new(t, catalog, SessionConfig::default()).unwrap()
}

async fn finish(handle: Running) -> SessionSummary {
    tokio::time::timeout(STEP, handle)
        .await
        .expect("session did not end")
        .expect("session task panicked")
        .expect("session failed")
}

/// Solid-color frame source.
struct Solid {
    width: u32,
    height: u32,
    rgb: [u8; 3],
}

impl FrameGrabber for Solid {
    fn grab(&mut self, _rect: CaptureRect) -> Result<RawScreenFrame, TileError> {
        Ok(RawScreenFrame {
            width: self.width,
            height: self.height,
            stride: self.width * 3,
            format: PixelFormat::Rgb8,
            data: self.rgb.repeat((self.width * self.height) as usize),
        })
    }
}

struct Broken;

impl FrameGrabber for Broken {
    fn grab(&mut self, _rect: CaptureRect) -> Result<RawScreenFrame, TileError> {
        Err(TileError::Capture("desktop lost".into()))
    }
}

fn live_config() -> SessionConfig {
    SessionConfig {
        generation: Generation::Live,
        packet_size: LIVE_PACKET_SIZE,
        display: DisplaySurface::new(16, 16).unwrap(),
        ..SessionConfig::default()
    }
}

fn capture_of(grabber: impl FrameGrabber + 'static) -> CaptureSource {
    let rect = CaptureRect {
        x: 0,
        y: 0,
        width: 8,
        height: 4,
    };
    CaptureSource::new(Box::new(grabber), rect, 16, 16).unwrap()
}

// ── Classic commands ─────────────────────────────────────────────

#[tokio::test]
async fn test_query_count_after_device_text() {
    let (mut device, handle) = start(classic(tile_catalog(16, 16)));

    device.send(b"boot ok\r\n").await;
    device.send(&[FRAME_DELIMITER, 0x01]).await;
    assert_eq!(device.recv(2).await, vec![4, 0]);

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.end, SessionEnd::Terminated);
    assert_eq!(summary.stats.commands, 2);
}

#[tokio::test]
async fn test_fetch_tile_is_ack_gated() {
    let catalog = tile_catalog(16, 8);
    let expected = catalog.get(1).unwrap().payload.clone();
    let (mut device, handle) = start(classic(catalog));

    device.send(&[FRAME_DELIMITER, 0x02, 0x01, 0x00]).await;

    // Placement bytes, one at a time.
    assert_eq!(device.recv(1).await, vec![8]);
    device.expect_silence(Duration::from_millis(50)).await;
    device.send(&[ACK]).await;
    assert_eq!(device.recv(1).await, vec![0]);
    device.send(&[ACK]).await;

    // 8x8 tile = 128 bytes = four 32-byte packets.
    let mut received = Vec::new();
    for _ in 0..4 {
        let packet = device.recv(32).await;
        device.expect_silence(Duration::from_millis(20)).await;
        received.extend(packet);
        device.send(&[ACK]).await;
    }
    assert_eq!(received, expected.to_vec());

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.stats.packets_sent, 4);
    assert_eq!(summary.stats.writes, 6);
    assert_eq!(summary.stats.units_served, 1);
}

#[tokio::test]
async fn test_ack_may_follow_device_text() {
    let (mut device, handle) = start(classic(tile_catalog(8, 8)));

    device.send(&[FRAME_DELIMITER, 0x02, 0x00, 0x00]).await;
    assert_eq!(device.recv(1).await, vec![0]);
    device.send(b"drew x\n").await;
    device.send(&[ACK]).await;
    assert_eq!(device.recv(1).await, vec![0]);
    device.send(&[ACK]).await;
    for _ in 0..4 {
        device.recv(32).await;
        device.send(&[ACK]).await;
    }

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    assert_eq!(finish(handle).await.stats.faults, 0);
}

#[tokio::test]
async fn test_terminate_is_silent() {
    let (mut device, handle) = start(classic(tile_catalog(8, 8)));

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.end, SessionEnd::Terminated);

    // Session dropped its end of the link without writing.
    let mut rest = Vec::new();
    device.io.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

// ── Faults ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_out_of_range_index_naks_and_continues() {
    let (mut device, handle) = start(classic(tile_catalog(16, 16)));

    device.send(&[FRAME_DELIMITER, 0x02, 0x09, 0x00]).await;
    assert_eq!(device.recv(1).await, vec![NAK]);

    device.send(&[FRAME_DELIMITER, 0x01]).await;
    assert_eq!(device.recv(2).await, vec![4, 0]);

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.stats.naks, 1);
    assert_eq!(summary.stats.faults, 1);
}

#[tokio::test]
async fn test_unknown_opcode_naks() {
    let (mut device, handle) = start(classic(tile_catalog(8, 8)));

    // 0xFE only terminates live sessions.
    device.send(&[FRAME_DELIMITER, 0xFE]).await;
    assert_eq!(device.recv(1).await, vec![NAK]);
    device.send(&[FRAME_DELIMITER, 0x7E]).await;
    assert_eq!(device.recv(1).await, vec![NAK]);

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.stats.naks, 2);
    assert_eq!(summary.stats.commands, 1);
}

#[tokio::test]
async fn test_stalled_transfer_times_out_and_recovers() {
    let catalog = tile_catalog(8, 8);
    let (mut device, handle) = start(move |t| {
        let config = SessionConfig {
            read_timeout: Some(Duration::from_millis(100)),
            ..SessionConfig::default()
        };
        Session::new(t, catalog, config).unwrap()
    });

    device.send(&[FRAME_DELIMITER, 0x02, 0x00, 0x00]).await;
    assert_eq!(device.recv(1).await, vec![0]);
    // Never ACK; the host abandons the transfer.
    device.expect_silence(Duration::from_millis(300)).await;

    // Idle timeouts do not count as faults.
    device.send(&[FRAME_DELIMITER, 0x01]).await;
    assert_eq!(device.recv(2).await, vec![1, 0]);

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.stats.faults, 1);
    assert_eq!(summary.stats.packets_sent, 0);
}

#[tokio::test]
async fn test_closed_link_is_fatal() {
    let (device, handle) = start(classic(tile_catalog(8, 8)));
    drop(device);

    let result = tokio::time::timeout(STEP, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(TileError::Transport(_))));
}

// ── Cancellation ─────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_while_idle() {
    let token = CancellationToken::new();
    let catalog = tile_catalog(8, 8);
    let (_device, handle) = start({
        let token = token.clone();
        move |t| {
            Session::new(t, catalog, SessionConfig::default())
                .unwrap()
                .with_cancellation(token)
        }
    });

    token.cancel();
    assert_eq!(finish(handle).await.end, SessionEnd::Cancelled);
}

#[tokio::test]
async fn test_cancel_between_packets() {
    let token = CancellationToken::new();
    let catalog = tile_catalog(8, 8);
    let (mut device, handle) = start({
        let token = token.clone();
        move |t| {
            Session::new(t, catalog, SessionConfig::default())
                .unwrap()
                .with_cancellation(token)
        }
    });

    device.send(&[FRAME_DELIMITER, 0x02, 0x00, 0x00]).await;
    assert_eq!(device.recv(1).await, vec![0]);
    token.cancel();
    device.send(&[ACK]).await;

    let summary = finish(handle).await;
    assert_eq!(summary.end, SessionEnd::Cancelled);
    assert_eq!(summary.stats.writes, 1);
    assert_eq!(summary.stats.units_served, 0);

    let mut rest = Vec::new();
    device.io.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

// ── Live generation ──────────────────────────────────────────────

#[tokio::test]
async fn test_live_capture_sends_centered_region() {
    let catalog = tile_catalog(8, 8);
    let capture = capture_of(Solid {
        width: 8,
        height: 4,
        rgb: [0xFF, 0x00, 0x00],
    });
    let (mut device, handle) = start(move |t| {
        Session::new(t, catalog, live_config())
            .unwrap()
            .with_capture(capture)
    });

    device.send(&[FRAME_DELIMITER, 0x03]).await;

    // 8x4 centered on 16x16, 64 payload bytes.
    assert_eq!(device.recv(6).await, vec![4, 6, 11, 9, 64, 0]);
    device.send(&[ACK]).await;
    // The ready ACK carries nothing from the host.
    device.expect_silence(Duration::from_millis(50)).await;
    device.send(&[ACK]).await;

    let payload = device.recv(64).await;
    assert!(payload.chunks(2).all(|px| px == [0x00, 0xF8]));
    device.send(&[ACK]).await;

    device.send(&[FRAME_DELIMITER, 0xFE]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.end, SessionEnd::Terminated);
    assert_eq!(summary.stats.packets_sent, 1);
}

#[tokio::test]
async fn test_fetch_region_entry_on_live() {
    let catalog = Catalog::from_region(
        &gradient(20, 20),
        DisplaySurface::new(32, 32).unwrap(),
        ColorReducer::new(ByteOrder::LowFirst),
    )
    .unwrap();
    let catalog = Arc::new(catalog);
    let expected = catalog.get(0).unwrap().payload.clone();
    let config = SessionConfig {
        display: DisplaySurface::new(32, 32).unwrap(),
        ..live_config()
    };
    let shared = Arc::clone(&catalog);
    let (mut device, handle) = start(move |t| Session::new(t, shared, config).unwrap());

    device.send(&[FRAME_DELIMITER, 0x02, 0x00, 0x00]).await;

    // 20x20 centered on 32x32, 800 payload bytes.
    assert_eq!(device.recv(6).await, vec![6, 6, 25, 25, 0x20, 0x03]);
    device.expect_silence(Duration::from_millis(20)).await;
    device.send(&[ACK]).await;
    device.expect_silence(Duration::from_millis(20)).await;
    device.send(&[ACK]).await;

    let mut received = Vec::new();
    for size in [LIVE_PACKET_SIZE, LIVE_PACKET_SIZE, LIVE_PACKET_SIZE, 32] {
        let packet = device.recv(size).await;
        device.expect_silence(Duration::from_millis(20)).await;
        received.extend(packet);
        device.send(&[ACK]).await;
    }
    assert_eq!(received, expected.to_vec());

    device.send(&[FRAME_DELIMITER, 0xFE]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.end, SessionEnd::Terminated);
    assert_eq!(summary.stats.packets_sent, 4);
    assert_eq!(summary.stats.units_served, 1);
}

#[tokio::test]
async fn test_full_display_capture_fits_length_header() {
    let catalog = tile_catalog(8, 8);
    let rect = CaptureRect {
        x: 0,
        y: 0,
        width: 640,
        height: 480,
    };
    let grabber = Solid {
        width: 640,
        height: 480,
        rgb: [0x00, 0x00, 0xFF],
    };
    let capture = CaptureSource::new(Box::new(grabber), rect, 256, 256).unwrap();
    let config = SessionConfig {
        display: DisplaySurface::new(256, 256).unwrap(),
        ..live_config()
    };
    let (mut device, handle) = start(move |t| {
        Session::new(t, catalog, config)
            .unwrap()
            .with_capture(capture)
    });

    device.send(&[FRAME_DELIMITER, 0x03]).await;

    // 640x480 fits 256x192, then shrinks to 209x156 for the u16 length.
    assert_eq!(device.recv(6).await, vec![23, 50, 231, 205, 0xB8, 0xFE]);
    device.send(&[ACK]).await;
    device.send(&[ACK]).await;

    let mut total = 0;
    let mut packets = 0;
    while total < 0xFEB8 {
        let size = LIVE_PACKET_SIZE.min(0xFEB8 - total);
        let packet = device.recv(size).await;
        assert!(packet.chunks(2).all(|px| px == [0x1F, 0x00]));
        total += size;
        packets += 1;
        device.send(&[ACK]).await;
    }
    assert_eq!(packets, 255);

    device.send(&[FRAME_DELIMITER, 0xFE]).await;
    let summary = finish(handle).await;
    assert_eq!(summary.end, SessionEnd::Terminated);
    assert_eq!(summary.stats.packets_sent, 255);
}

#[tokio::test]
async fn test_live_capture_failure_naks() {
    let catalog = tile_catalog(8, 8);
    let capture = capture_of(Broken);
    let (mut device, handle) = start(move |t| {
        Session::new(t, catalog, live_config())
            .unwrap()
            .with_capture(capture)
    });

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    assert_eq!(device.recv(1).await, vec![NAK]);

    device.send(&[FRAME_DELIMITER, 0xFE]).await;
    assert_eq!(finish(handle).await.stats.naks, 1);
}

#[tokio::test]
async fn test_live_capture_without_source_naks() {
    let catalog = tile_catalog(8, 8);
    let (mut device, handle) = start(move |t| Session::new(t, catalog, live_config()).unwrap());

    device.send(&[FRAME_DELIMITER, 0x03]).await;
    assert_eq!(device.recv(1).await, vec![NAK]);

    // Classic opcodes still work on the live generation.
    device.send(&[FRAME_DELIMITER, 0x01]).await;
    assert_eq!(device.recv(2).await, vec![1, 0]);

    device.send(&[FRAME_DELIMITER, 0xFE]).await;
    finish(handle).await;
}

// ── Scripted transport ───────────────────────────────────────────

#[tokio::test]
async fn test_scripted_query_count() {
    let mock = tokio_test::io::Builder::new()
        .read(&[FRAME_DELIMITER, 0x01])
        .write(&[4, 0])
        .read(&[FRAME_DELIMITER, 0x03])
        .build();

    let mut session =
        Session::new(StreamTransport::new(mock), tile_catalog(16, 16), SessionConfig::default())
            .unwrap();
    let summary = session.run().await.unwrap();
    assert_eq!(summary.end, SessionEnd::Terminated);
}

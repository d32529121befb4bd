//! Host-side protocol engine.
//!
//! The device drives the session; the host only answers:
//!
//! ```text
//!   AwaitFrame ──0xFF──► ReadCommand ──opcode──► Dispatch ──┬──► AwaitFrame
//!       ▲  │                                                 │
//!       │  └─ other bytes: device text, echoed to the log    └──► Terminated
//!       └──────────────── recovered faults (NAK / timeout) ◄──────┘
//! ```
//!
//! Faults the device can cause (bad opcode, bad index, capture failure, a
//! stalled transfer) are logged and the loop goes back to waiting for the
//! next frame. Transport failures end the session with an error.

pub mod text;
pub mod transfer;

pub use text::DeviceText;
pub use transfer::{AckedTransfer, TransferStep};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{Catalog, CatalogEntry, DisplaySurface, Placement};
use crate::color::{ByteOrder, ColorReducer};
use crate::error::TileError;
use crate::packet::{CLASSIC_PACKET_SIZE, Packetizer};
use crate::pixel::CaptureSource;
use crate::protocol::{ACK, Command, FRAME_DELIMITER, Generation, NAK};
use crate::transport::Transport;

// ── SessionConfig ────────────────────────────────────────────────

/// Per-deployment protocol settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub generation: Generation,
    /// Maximum packet length in bytes.
    pub packet_size: usize,
    /// Per-read deadline; `None` blocks forever.
    pub read_timeout: Option<Duration>,
    /// Surface live-capture regions are centered on.
    pub display: DisplaySurface,
    /// Byte order for colors produced during the session.
    pub byte_order: ByteOrder,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation: Generation::Classic,
            packet_size: CLASSIC_PACKET_SIZE,
            read_timeout: Some(Duration::from_secs(5)),
            display: DisplaySurface::default(),
            byte_order: ByteOrder::LowFirst,
        }
    }
}

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitFrame,
    ReadCommand,
    Dispatch(Command),
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitFrame => write!(f, "AwaitFrame"),
            SessionState::ReadCommand => write!(f, "ReadCommand"),
            SessionState::Dispatch(cmd) => write!(f, "Dispatch({cmd})"),
            SessionState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The device sent the terminate opcode.
    Terminated,
    /// The host cancelled between frames or packets.
    Cancelled,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub commands: u64,
    /// Catalog entries or captures transferred in full.
    pub units_served: u64,
    /// Individual writes: placement bytes, headers and packets.
    pub writes: u64,
    pub packets_sent: u64,
    pub naks: u64,
    pub faults: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub stats: SessionStats,
}

enum Flow {
    Continue,
    Terminate,
}

// ── Session ──────────────────────────────────────────────────────

/// One device session over a single-owner transport.
pub struct Session<T> {
    transport: T,
    catalog: Arc<Catalog>,
    capture: Option<CaptureSource>,
    config: SessionConfig,
    packetizer: Packetizer,
    cancel: CancellationToken,
    state: SessionState,
    stats: SessionStats,
    text: DeviceText,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, catalog: Arc<Catalog>, config: SessionConfig) -> Result<Self, TileError> {
        let packetizer = Packetizer::new(config.packet_size)?;
        // Classic firmware only understands tile placements.
        if config.generation == Generation::Classic
            && catalog
                .iter()
                .any(|e| matches!(e.placement, Placement::Region(_)))
        {
            return Err(TileError::Precondition(
                "region entries need the live protocol generation".into(),
            ));
        }
        Ok(Self {
            transport,
            catalog,
            capture: None,
            config,
            packetizer,
            cancel: CancellationToken::new(),
            state: SessionState::AwaitFrame,
            stats: SessionStats::default(),
            text: DeviceText::default(),
        })
    }

    /// Hand the session a capture source for the live-capture command.
    /// It is released when the session is dropped.
    pub fn with_capture(mut self, capture: CaptureSource) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Stop the session from outside. Observed between frames and
    /// between packets, never mid-packet.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Serve the device until it terminates, the host cancels, or the
    /// transport fails.
    pub async fn run(&mut self) -> Result<SessionSummary, TileError> {
        info!(
            "session started: {} protocol, {} catalog entries, {}-byte packets",
            self.config.generation,
            self.catalog.len(),
            self.packetizer.size()
        );

        let end = loop {
            match self.serve_frame().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Terminate) => break SessionEnd::Terminated,
                Err(TileError::Cancelled) => break SessionEnd::Cancelled,
                Err(e) if e.is_recoverable() => {
                    self.stats.faults += 1;
                    warn!("{}: {e}", self.state);
                }
                Err(e) => {
                    self.text.flush();
                    error!("session aborted in {}: {e}", self.state);
                    return Err(e);
                }
            }
        };

        self.text.flush();
        self.state = SessionState::Terminated;
        info!(
            "session ended ({end:?}): {} commands, {} units served, {} writes, {} packets, {} NAKs, {} faults",
            self.stats.commands,
            self.stats.units_served,
            self.stats.writes,
            self.stats.packets_sent,
            self.stats.naks,
            self.stats.faults
        );
        Ok(SessionSummary {
            end,
            stats: self.stats,
        })
    }

    /// One pass of the state machine: frame, command, handler.
    async fn serve_frame(&mut self) -> Result<Flow, TileError> {
        self.state = SessionState::AwaitFrame;
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TileError::Cancelled),
            r = self.await_frame() => r?,
        }

        self.state = SessionState::ReadCommand;
        let opcode = self.read_byte().await?;
        let command = match Command::decode(opcode, self.config.generation) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.nak().await?;
                return Err(e);
            }
        };

        self.state = SessionState::Dispatch(command);
        self.stats.commands += 1;
        match command {
            Command::QueryCount => self.query_count().await?,
            Command::FetchUnit => self.fetch_unit().await?,
            Command::LiveCapture => self.live_capture().await?,
            Command::Terminate => {
                info!("HOST: terminate");
                return Ok(Flow::Terminate);
            }
        }
        Ok(Flow::Continue)
    }

    /// Echo device text until the frame delimiter arrives.
    async fn await_frame(&mut self) -> Result<(), TileError> {
        loop {
            // Blocking transports may never return Pending.
            if self.cancel.is_cancelled() {
                return Err(TileError::Cancelled);
            }
            match self.read_byte().await {
                Ok(FRAME_DELIMITER) => {
                    self.text.flush();
                    return Ok(());
                }
                Ok(b) => self.text.push(b),
                Err(TileError::Timeout(_)) => {
                    // Idle device; nothing is outstanding.
                    self.text.flush();
                    trace!("no frame yet");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────────

    async fn query_count(&mut self) -> Result<(), TileError> {
        // Catalog construction caps the length at u16::MAX.
        let count = self.catalog.len() as u16;
        info!("HOST: QueryCount -> {count}");
        self.transport.write_all(&count.to_le_bytes()).await?;
        self.transport.flush().await
    }

    async fn fetch_unit(&mut self) -> Result<(), TileError> {
        let mut raw = [0u8; 2];
        self.read_exact(&mut raw).await?;
        let index = u16::from_le_bytes(raw);
        info!("HOST: FetchUnit index={index}");

        let entry = match self.catalog.get(index) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                self.nak().await?;
                return Err(e);
            }
        };
        let packets = self.send_entry(&entry).await?;
        info!("HOST: unit {index} ({}) complete, {packets} packets", entry.placement);
        Ok(())
    }

    async fn live_capture(&mut self) -> Result<(), TileError> {
        info!("HOST: LiveCapture");
        let entry = match self.capture_region().await {
            Ok(entry) => entry,
            Err(e) => {
                self.nak().await?;
                return Err(e);
            }
        };
        let packets = self.send_entry(&entry).await?;
        info!(
            "HOST: live {} complete, {} bytes in {packets} packets",
            entry.placement,
            entry.payload.len()
        );
        Ok(())
    }

    /// Grab a frame on the blocking pool and turn it into a region.
    async fn capture_region(&mut self) -> Result<CatalogEntry, TileError> {
        let mut capture = self
            .capture
            .take()
            .ok_or_else(|| TileError::Capture("no capture source configured".into()))?;
        let (capture, planes) = tokio::task::spawn_blocking(move || {
            let planes = capture.capture();
            (capture, planes)
        })
        .await
        .map_err(|e| TileError::Capture(format!("capture task failed: {e}")))?;
        self.capture = Some(capture);

        let planes = planes.map_err(|e| match e {
            TileError::Capture(_) => e,
            other => TileError::Capture(other.to_string()),
        })?;
        CatalogEntry::region(
            &planes,
            self.config.display,
            ColorReducer::new(self.config.byte_order),
        )
        .map_err(|e| TileError::Capture(e.to_string()))
    }

    // ── Transfer ─────────────────────────────────────────────────

    /// Send placement header and payload packets, each gated on an ACK.
    /// Returns the number of payload packets sent.
    async fn send_entry(&mut self, entry: &CatalogEntry) -> Result<usize, TileError> {
        let mut units = Vec::with_capacity(2 + self.packetizer.count(entry.payload.len()));
        match entry.placement {
            Placement::Tile { x, y } => {
                units.push(Bytes::copy_from_slice(&[x]));
                units.push(Bytes::copy_from_slice(&[y]));
            }
            Placement::Region(r) => {
                // Catalog construction caps region payloads at u16::MAX.
                let [lo, hi] = (entry.payload.len() as u16).to_le_bytes();
                units.push(Bytes::copy_from_slice(&[r.x0, r.y0, r.x1, r.y1, lo, hi]));
                // Second ACK: device ready for the payload.
                units.push(Bytes::new());
            }
        }
        let header_units = units.len();
        units.extend(self.packetizer.split(&entry.payload));

        let mut transfer = AckedTransfer::new(units);
        loop {
            match transfer.next_step() {
                TransferStep::Send(unit) => {
                    self.transport.write_all(&unit).await?;
                    self.transport.flush().await?;
                    self.stats.writes += 1;
                    trace!("sent unit {} ({} bytes)", transfer.acknowledged(), unit.len());
                }
                TransferStep::AwaitAck => {
                    self.await_ack().await?;
                    transfer.acknowledge()?;
                    if self.cancel.is_cancelled() && !transfer.is_done() {
                        debug!(
                            "transfer stopped after {}/{} units",
                            transfer.acknowledged(),
                            transfer.total()
                        );
                        return Err(TileError::Cancelled);
                    }
                }
                TransferStep::Done => break,
            }
        }

        let packets = transfer.total() - header_units;
        self.stats.packets_sent += packets as u64;
        self.stats.units_served += 1;
        Ok(packets)
    }

    async fn await_ack(&mut self) -> Result<(), TileError> {
        let skipped = within(self.config.read_timeout, self.transport.read_until(ACK)).await?;
        if !skipped.is_empty() {
            self.text.extend(&skipped);
            self.text.flush();
        }
        Ok(())
    }

    async fn nak(&mut self) -> Result<(), TileError> {
        self.stats.naks += 1;
        self.transport.write_all(&[NAK]).await?;
        self.transport.flush().await
    }

    // ── Timed reads ──────────────────────────────────────────────

    async fn read_byte(&mut self) -> Result<u8, TileError> {
        within(self.config.read_timeout, self.transport.read_byte()).await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TileError> {
        within(self.config.read_timeout, self.transport.read_exact(buf)).await
    }
}

/// Bound `op` by `limit`, mapping expiry to [`TileError::Timeout`].
async fn within<R>(
    limit: Option<Duration>,
    op: impl Future<Output = Result<R, TileError>>,
) -> Result<R, TileError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| TileError::Timeout(limit))?,
        None => op.await,
    }
}

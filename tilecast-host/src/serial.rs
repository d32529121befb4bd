//! Serial-port transport.
//!
//! `serialport` is blocking, so every call runs under
//! `tokio::task::block_in_place`. The port's own read timeout bounds each
//! read and surfaces as [`TileError::Timeout`].

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tilecast_core::{TileError, Transport};

/// Port wake-up interval when reads are unbounded.
const IDLE_POLL: Duration = Duration::from_secs(1);

// ── ReadPolicy ───────────────────────────────────────────────────

/// What a blocking read does when the port's timeout fires.
#[derive(Debug)]
struct ReadPolicy {
    timeout: Duration,
    /// Keep waiting across port timeouts.
    unbounded: bool,
    cancel: CancellationToken,
}

impl ReadPolicy {
    /// Fill `buf` from `reader`, checking the token on every port timeout.
    fn fill<R: Read + ?Sized>(&self, reader: &mut R, buf: &mut [u8]) -> Result<(), TileError> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(TileError::Transport(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "serial port closed",
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    if self.cancel.is_cancelled() {
                        debug!("serial read abandoned after {filled} of {} bytes", buf.len());
                        return Err(TileError::Cancelled);
                    }
                    if !self.unbounded {
                        return Err(TileError::Timeout(self.timeout));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

// ── SerialTransport ──────────────────────────────────────────────

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    policy: ReadPolicy,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8N1 without flow control.
    ///
    /// With `read_timeout == None` reads wake once per second and retry
    /// until data arrives or the cancellation token fires.
    pub fn open(path: &str, baud: u32, read_timeout: Option<Duration>) -> Result<Self, TileError> {
        let timeout = read_timeout.unwrap_or(IDLE_POLL);
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| TileError::Transport(std::io::Error::other(format!("{path}: {e}"))))?;
        info!("opened {path} at {baud} baud (8N1)");
        Ok(Self {
            port,
            policy: ReadPolicy {
                timeout,
                unbounded: read_timeout.is_none(),
                cancel: CancellationToken::new(),
            },
        })
    }

    /// Abandon blocked reads once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.policy.cancel = token;
        self
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read_byte(&mut self) -> Result<u8, TileError> {
        let mut byte = [0u8; 1];
        tokio::task::block_in_place(|| self.policy.fill(&mut *self.port, &mut byte))?;
        Ok(byte[0])
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TileError> {
        tokio::task::block_in_place(|| self.policy.fill(&mut *self.port, buf))
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TileError> {
        tokio::task::block_in_place(|| self.port.write_all(buf))?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TileError> {
        tokio::task::block_in_place(|| self.port.flush())?;
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port.name())
            .field("timeout", &self.policy.timeout)
            .field("unbounded", &self.policy.unbounded)
            .finish()
    }
}

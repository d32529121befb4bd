//! Byte transport consumed by the protocol engine.
//!
//! The engine only needs blocking-style primitives: read one byte, read an
//! exact count, write a whole buffer, and read until a delimiter. Any tokio
//! stream can be adapted with [`StreamTransport`]; the host binary provides
//! a serial-port implementation.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TileError;

#[async_trait]
pub trait Transport: Send {
    /// Read exactly one byte.
    async fn read_byte(&mut self) -> Result<u8, TileError>;

    /// Fill `buf` completely.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TileError>;

    /// Write all of `buf`.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TileError>;

    /// Push buffered output to the device.
    async fn flush(&mut self) -> Result<(), TileError>;

    /// Read bytes up to and including `delimiter`; returns the bytes that
    /// preceded it.
    async fn read_until(&mut self, delimiter: u8) -> Result<Vec<u8>, TileError> {
        let mut skipped = Vec::new();
        loop {
            let b = self.read_byte().await?;
            if b == delimiter {
                return Ok(skipped);
            }
            skipped.push(b);
        }
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn read_byte(&mut self) -> Result<u8, TileError> {
        (**self).read_byte().await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TileError> {
        (**self).read_exact(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TileError> {
        (**self).write_all(buf).await
    }

    async fn flush(&mut self) -> Result<(), TileError> {
        (**self).flush().await
    }
}

// ── StreamTransport ──────────────────────────────────────────────

/// Adapts any `AsyncRead + AsyncWrite` stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_byte(&mut self) -> Result<u8, TileError> {
        Ok(self.stream.read_u8().await?)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TileError> {
        AsyncReadExt::read_exact(&mut self.stream, buf).await?;
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TileError> {
        AsyncWriteExt::write_all(&mut self.stream, buf).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TileError> {
        AsyncWriteExt::flush(&mut self.stream).await?;
        Ok(())
    }
}

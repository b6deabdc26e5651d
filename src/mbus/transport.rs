//! # M-Bus Transport
//!
//! The [`Transport`] trait is the seam between the protocol logic (session,
//! secondary address resolver) and the physical link. It moves raw bytes out
//! and classifies whatever comes back within a deadline as a frame, silence or
//! a collision.
//!
//! [`MBusHandle`] implements the trait for any tokio byte stream. It feeds the
//! frame codec from an internal buffer, reading exactly as long as the codec
//! asks for more bytes.

use crate::error::MBusError;
use crate::mbus::frame::{pack_frame, parse_frame, DecodeOutcome, MBusFrame};
use crate::logging::log_frame;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// What arrived on the bus after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    /// A complete, checksum-valid frame.
    Frame(MBusFrame),
    /// Nothing arrived before the deadline.
    Timeout,
    /// Bytes arrived but do not form a valid frame, typically because
    /// several slaves answered at once.
    Collision,
}

/// Byte-level link to an M-Bus segment.
#[async_trait]
pub trait Transport: Send {
    /// Writes `bytes` to the bus.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), MBusError>;

    /// Waits up to `timeout` for one reply.
    async fn receive(&mut self, timeout: Duration) -> Result<Reception, MBusError>;

    /// Reply deadline configured for this link.
    fn timeout(&self) -> Duration;

    /// Packs and sends a frame.
    async fn send_frame(&mut self, frame: &MBusFrame) -> Result<(), MBusError> {
        let bytes = pack_frame(frame)?;
        log_frame("TX", &bytes);
        self.send(&bytes).await
    }

    /// Waits for one reply using the configured deadline.
    async fn receive_frame(&mut self) -> Result<Reception, MBusError> {
        let timeout = self.timeout();
        self.receive(timeout).await
    }
}

/// [`Transport`] over a tokio byte stream (serial port, TCP socket, ...).
pub struct MBusHandle<S> {
    stream: S,
    buffer: BytesMut,
    timeout: Duration,
}

impl<S> MBusHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        MBusHandle {
            stream,
            buffer: BytesMut::with_capacity(512),
            timeout,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> Transport for MBusHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        // bytes left over from an earlier exchange can't belong to the next reply
        self.buffer.clear();
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Reception, MBusError> {
        let deadline = Instant::now() + timeout;

        loop {
            match parse_frame(&self.buffer) {
                DecodeOutcome::Complete { frame, consumed } => {
                    log_frame("RX", &self.buffer[..consumed]);
                    self.buffer.advance(consumed);
                    return Ok(Reception::Frame(frame));
                }
                DecodeOutcome::Malformed(reason) => {
                    log::debug!(
                        "Discarding {} garbled bytes: {reason}",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                    return Ok(Reception::Collision);
                }
                DecodeOutcome::NeedMoreBytes(needed) => {
                    self.buffer.reserve(needed);
                    match tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.buffer))
                        .await
                    {
                        Err(_) if self.buffer.is_empty() => return Ok(Reception::Timeout),
                        Err(_) => {
                            log_frame("RX incomplete at deadline:", &self.buffer);
                            self.buffer.clear();
                            return Ok(Reception::Collision);
                        }
                        Ok(Ok(0)) => {
                            return Err(MBusError::Io(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "connection closed",
                            )))
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

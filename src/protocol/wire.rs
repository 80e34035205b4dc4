//! Wire protocol utilities
//!
//! [`WireStream`] owns the TCP socket together with the buffer that incoming
//! bytes accumulate in. Handshakes and messages are cut out of that buffer, so
//! a read interrupted by a timeout loses nothing already received.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, trace};

use super::handshake::{check_protocol_length, HANDSHAKE_LENGTH};
use super::message::LENGTH_PREFIX_LENGTH;
use super::{Handshake, Message};
use crate::error::{PeerWireError, Result};

/// Initial capacity reserved before each socket read
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Split one length-prefixed frame off the front of the buffer
///
/// Returns the frame body (type byte and payload, empty for a keep-alive), or
/// `None` if the buffer does not hold a complete frame yet. Frames declaring a
/// body longer than `max_length` are rejected before anything is allocated.
pub fn read_frame(buf: &mut BytesMut, max_length: usize) -> Result<Option<Bytes>> {
    if buf.len() < LENGTH_PREFIX_LENGTH {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > max_length {
        error!("Frame length {} exceeds limit {}", length, max_length);
        return Err(PeerWireError::protocol_error_with_source(
            "Frame too large",
            format!("length {} exceeds limit {}", length, max_length),
        ));
    }

    if buf.len() < LENGTH_PREFIX_LENGTH + length {
        buf.reserve(LENGTH_PREFIX_LENGTH + length - buf.len());
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LENGTH);
    Ok(Some(buf.split_to(length).freeze()))
}

/// A peer socket with its read buffer
#[derive(Debug)]
pub struct WireStream {
    stream: TcpStream,
    buffer: BytesMut,
    max_frame_length: usize,
}

impl WireStream {
    /// Wrap a connected socket
    pub fn new(stream: TcpStream, max_frame_length: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_frame_length,
        }
    }

    /// Number of received bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Check for unread input without waiting
    ///
    /// Pulls whatever the socket already holds into the buffer. Returns true
    /// if at least one unread byte is available; a complete message may still
    /// be outstanding.
    pub fn poll_buffered(&mut self) -> bool {
        if !self.buffer.is_empty() {
            return true;
        }

        self.buffer.reserve(READ_CHUNK_SIZE);
        match self.stream.try_read_buf(&mut self.buffer) {
            Ok(0) => false,
            Ok(n) => {
                trace!("Pulled {} pending bytes from socket", n);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                debug!("Non-blocking read failed: {}", e);
                false
            }
        }
    }

    /// Read more bytes from the socket into the buffer
    async fn fill(&mut self) -> Result<()> {
        self.buffer.reserve(READ_CHUNK_SIZE);
        let n = self.stream.read_buf(&mut self.buffer).await?;
        if n == 0 {
            if self.buffer.is_empty() {
                return Err(PeerWireError::io_error_with_source(
                    "Connection closed by peer",
                    io::ErrorKind::UnexpectedEof.to_string(),
                ));
            }
            return Err(PeerWireError::truncated(format!(
                "stream closed with {} bytes of an incomplete record buffered",
                self.buffer.len()
            )));
        }
        trace!("Read {} bytes from socket ({} buffered)", n, self.buffer.len());
        Ok(())
    }

    /// Read the peer's handshake
    ///
    /// A first byte other than the protocol identifier length fails at once
    /// instead of waiting for the remaining bytes.
    pub async fn read_handshake(&mut self) -> Result<Handshake> {
        while self.buffer.is_empty() {
            self.fill().await.map_err(|e| e.with_context("reading handshake"))?;
        }
        check_protocol_length(self.buffer[0])?;

        while self.buffer.len() < HANDSHAKE_LENGTH {
            self.fill().await.map_err(|e| e.with_context("reading handshake"))?;
        }

        let raw = self.buffer.split_to(HANDSHAKE_LENGTH);
        Handshake::deserialize(&raw)
    }

    /// Read one complete message
    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(body) = read_frame(&mut self.buffer, self.max_frame_length)? {
                trace!("Framed message body of {} bytes", body.len());
                return Message::from_body(body);
            }
            self.fill().await?;
        }
    }

    /// Write our handshake
    pub async fn write_handshake(&mut self, handshake: &Handshake) -> Result<()> {
        self.write_all(&handshake.serialize()).await
    }

    /// Write one message
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_all(&message.serialize()).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        trace!("Wrote {} bytes to socket", data.len());
        Ok(())
    }

    /// Shut down the write half, signalling EOF to the peer
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

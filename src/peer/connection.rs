//! Peer connection module
//!
//! One TCP session with one remote peer. [`PeerConnection::connect`] dials,
//! exchanges handshakes and waits for the peer's bitfield; only a connection
//! that got through all three phases is handed to the caller.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{PeerWireError, Result};
use crate::peer::{Bitfield, ConnectionState, PeerSnapshot};
use crate::protocol::{Handshake, Message, MessageId, WireStream};

/// An established connection to a peer
///
/// The connection exclusively owns its socket. Every I/O operation takes
/// `&mut self`, so one task drives one connection.
#[derive(Debug)]
pub struct PeerConnection {
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    remote_peer_id: [u8; 20],
    wire: Option<WireStream>,
    bitfield: Bitfield,
    choked: bool,
    state: ConnectionState,
}

impl PeerConnection {
    /// Connect to a peer using the default timeouts
    pub async fn connect(addr: SocketAddr, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<Self> {
        Self::connect_with_config(addr, info_hash, peer_id, &ConnectionConfig::default()).await
    }

    /// Connect to a peer, perform the handshake and receive its bitfield
    ///
    /// Each setup phase runs under its own deadline. On any failure the socket
    /// is closed before the error is returned.
    pub async fn connect_with_config(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        config: &ConnectionConfig,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);
        trace!("Peer {} state: {}", addr, ConnectionState::Connecting);

        let socket = timeout(config.dial_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|e| {
                warn!("Connection timeout to {}", addr);
                PeerWireError::dial_error_full("Connection timeout", addr.to_string(), e.to_string())
            })?
            .map_err(|e| {
                error!("Failed to connect to {}: {}", addr, e);
                PeerWireError::dial_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;
        debug!("Connected to peer: {}", addr);

        let mut wire = WireStream::new(socket, config.max_frame_length);

        let outcome = Self::complete_handshake(&mut wire, addr, info_hash, peer_id, config).await;
        let handshake = match outcome {
            Ok(handshake) => handshake,
            Err(e) => return Err(Self::abort(wire, addr, e)),
        };

        let outcome = Self::receive_bitfield(&mut wire, addr, config).await;
        let bitfield = match outcome {
            Ok(bitfield) => bitfield,
            Err(e) => return Err(Self::abort(wire, addr, e)),
        };

        info!(
            "Peer {} ready: {} of {} pieces advertised",
            addr,
            bitfield.piece_count(),
            bitfield.len_bits()
        );
        trace!("Peer {} state: {}", addr, ConnectionState::Ready);

        Ok(Self {
            addr,
            info_hash,
            peer_id,
            remote_peer_id: handshake.peer_id,
            wire: Some(wire),
            bitfield,
            choked: true,
            state: ConnectionState::Ready,
        })
    }

    /// Close the socket of a failed setup and pass the error through
    fn abort(wire: WireStream, addr: SocketAddr, err: PeerWireError) -> PeerWireError {
        error!("Setup with peer {} failed: {}", addr, err);
        trace!("Peer {} state: {}", addr, ConnectionState::Failed);
        drop(wire);
        err
    }

    async fn complete_handshake(
        wire: &mut WireStream,
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        config: &ConnectionConfig,
    ) -> Result<Handshake> {
        trace!("Peer {} state: {}", addr, ConnectionState::HandshakeInFlight);
        let ours = Handshake::new(info_hash, peer_id);

        let theirs = timeout(config.handshake_timeout(), Self::exchange_handshakes(wire, &ours))
            .await
            .map_err(|_| {
                warn!("Handshake timeout with {}", addr);
                PeerWireError::handshake_error_full(
                    "Handshake timed out",
                    addr.to_string(),
                    format!("no handshake within {:?}", config.handshake_timeout()),
                )
            })?
            .map_err(|e| {
                error!("Handshake with {} failed: {}", addr, e);
                PeerWireError::handshake_error_full("Failed to complete handshake", addr.to_string(), e.to_string())
            })?;

        if config.strict_info_hash && !theirs.validate(&info_hash) {
            return Err(PeerWireError::handshake_error_full(
                "Handshake validation failed: info hash mismatch",
                addr.to_string(),
                hex::encode(theirs.info_hash),
            ));
        }

        debug!("Handshake completed with {} (peer id {})", addr, hex::encode(theirs.peer_id));
        Ok(theirs)
    }

    async fn exchange_handshakes(wire: &mut WireStream, ours: &Handshake) -> Result<Handshake> {
        wire.write_handshake(ours).await?;
        wire.read_handshake().await
    }

    async fn receive_bitfield(
        wire: &mut WireStream,
        addr: SocketAddr,
        config: &ConnectionConfig,
    ) -> Result<Bitfield> {
        trace!("Peer {} state: {}", addr, ConnectionState::AwaitingBitfield);

        let first = timeout(config.bitfield_timeout(), Self::first_message(wire))
            .await
            .map_err(|e| {
                warn!("Timed out waiting for bitfield from {}", addr);
                PeerWireError::io_error_with_source("Timed out waiting for bitfield", e.to_string())
            })?;

        match first? {
            Message::Bitfield { bitfield } => {
                debug!("Received bitfield ({} bytes) from {}", bitfield.len(), addr);
                Ok(Bitfield::from_payload(bitfield))
            }
            other => {
                // keep-alives were skipped, so every message here has a type byte
                let received = other.type_byte().unwrap_or_default();
                error!("Expected bitfield from {} but got message id {}", addr, received);
                Err(PeerWireError::unexpected_message(addr.to_string(), MessageId::Bitfield, received))
            }
        }
    }

    async fn first_message(wire: &mut WireStream) -> Result<Message> {
        loop {
            match wire.read_message().await? {
                Message::KeepAlive => trace!("Skipping keep-alive before bitfield"),
                message => return Ok(message),
            }
        }
    }

    fn wire(&mut self) -> Result<&mut WireStream> {
        let addr = self.addr;
        self.wire
            .as_mut()
            .ok_or_else(|| PeerWireError::connection_closed(addr.to_string()))
    }

    /// Check if the peer advertised the piece
    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Check, without blocking, whether unread bytes are waiting
    ///
    /// True means at least one byte is available, not necessarily a full
    /// message. Always false once the connection is closed.
    pub fn has_next(&mut self) -> bool {
        match self.wire.as_mut() {
            Some(wire) => wire.poll_buffered(),
            None => false,
        }
    }

    /// Read the next message
    ///
    /// Blocks until a complete message arrives. Keep-alives are returned as
    /// [`Message::KeepAlive`]. The connection's choke state and bitfield are
    /// left untouched; see [`PeerConnection::apply_message`].
    pub async fn read(&mut self) -> Result<Message> {
        let addr = self.addr;
        let message = self.wire()?.read_message().await.map_err(|e| {
            debug!("Failed to read message from {}: {}", addr, e);
            e
        })?;
        debug!("Received {:?} message from peer: {}", message.message_id(), addr);
        Ok(message)
    }

    /// Update choke state and piece availability from a received message
    ///
    /// `choke`/`unchoke` set [`PeerConnection::choked`]; `have` marks the piece
    /// in the bitfield. Every other message is ignored.
    pub fn apply_message(&mut self, message: &Message) {
        match message {
            Message::Choke => {
                debug!("Peer {} choked us", self.addr);
                self.choked = true;
            }
            Message::Unchoke => {
                debug!("Peer {} unchoked us", self.addr);
                self.choked = false;
            }
            Message::Have { piece_index } => {
                trace!("Peer {} now has piece {}", self.addr, piece_index);
                self.bitfield.set_piece(*piece_index as usize);
            }
            _ => {}
        }
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        let addr = self.addr;
        debug!("Sending {:?} message to peer: {}", message.message_id(), addr);
        self.wire()?.write_message(message).await.map_err(|e| {
            error!("Failed to send message to {}: {}", addr, e);
            e
        })
    }

    /// Send interested message to the peer
    pub async fn send_interested(&mut self) -> Result<()> {
        self.send_message(&Message::Interested).await
    }

    /// Send not interested message to the peer
    pub async fn send_not_interested(&mut self) -> Result<()> {
        self.send_message(&Message::NotInterested).await
    }

    /// Send unchoke message to the peer
    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send_message(&Message::Unchoke).await
    }

    /// Send choke message to the peer
    pub async fn send_choke(&mut self) -> Result<()> {
        self.send_message(&Message::Choke).await
    }

    /// Send keep-alive message to the peer
    pub async fn send_keepalive(&mut self) -> Result<()> {
        self.send_message(&Message::KeepAlive).await
    }

    /// Announce that we now have a piece
    pub async fn send_have(&mut self, piece_index: u32) -> Result<()> {
        self.send_message(&Message::Have { piece_index }).await
    }

    /// Request a block of a piece
    ///
    /// Only a zero length is rejected here; whether the block lies inside the
    /// piece is up to the caller.
    pub async fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        if length == 0 {
            return Err(PeerWireError::validation_error_with_field(
                "Requested block length must be positive",
                "length",
            ));
        }
        trace!("Requesting piece {} block {} ({} bytes) from {}", index, begin, length, self.addr);
        self.send_message(&Message::Request { index, begin, length }).await
    }

    /// Withdraw an earlier block request
    pub async fn send_cancel(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        self.send_message(&Message::Cancel { index, begin, length }).await
    }

    /// Close the connection
    ///
    /// Closing twice is a no-op. Later operations fail with
    /// [`PeerWireError::ConnectionClosed`].
    pub async fn close(&mut self) {
        let Some(mut wire) = self.wire.take() else {
            trace!("Connection to {} already closed", self.addr);
            return;
        };

        info!("Closing connection to peer: {}", self.addr);
        self.state = ConnectionState::Closed;
        if wire.buffered() > 0 {
            debug!("Discarding {} unread bytes from {}", wire.buffered(), self.addr);
        }
        if let Err(e) = wire.shutdown().await {
            debug!("Shutdown of connection to {} failed: {}", self.addr, e);
        }
    }

    /// Check if the peer is choking us
    pub fn choked(&self) -> bool {
        self.choked
    }

    /// Get the peer's advertised pieces
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// Get the peer's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the peer ID the remote sent in its handshake
    pub fn remote_peer_id(&self) -> [u8; 20] {
        self.remote_peer_id
    }

    /// Get our own peer ID
    pub fn local_peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Get the info hash of the shared content
    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    /// Get the lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Copy the observable state for use on another task
    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            addr: self.addr,
            peer_id: self.remote_peer_id,
            choked: self.choked,
            bitfield: self.bitfield.clone(),
            state: self.state,
        }
    }
}

//! Peer state module
//!
//! Connection lifecycle states and point-in-time snapshots of a connection.

use std::fmt;
use std::net::SocketAddr;

use crate::peer::Bitfield;

/// Lifecycle of a peer connection
///
/// Setup runs `Connecting -> HandshakeInFlight -> AwaitingBitfield -> Ready`.
/// Any setup phase may end in `Failed`; a ready connection ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Dialing the peer
    #[default]
    Connecting,
    /// Our handshake is sent, waiting for theirs
    HandshakeInFlight,
    /// Handshake done, waiting for the bitfield
    AwaitingBitfield,
    /// Setup complete, messages may flow
    Ready,
    /// Setup failed, socket closed
    Failed,
    /// Closed by the owner
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::HandshakeInFlight => "handshake-in-flight",
            ConnectionState::AwaitingBitfield => "awaiting-bitfield",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A copy of a connection's observable state
///
/// Owned data only, so it can be sent to other tasks while the connection
/// itself stays with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    /// Peer address
    pub addr: SocketAddr,
    /// Peer identifier from its handshake
    pub peer_id: [u8; 20],
    /// Whether the peer is choking us
    pub choked: bool,
    /// Pieces the peer has advertised
    pub bitfield: Bitfield,
    /// Lifecycle state when the snapshot was taken
    pub state: ConnectionState,
}

impl PeerSnapshot {
    /// Get the peer ID as a hex string
    pub fn peer_id_hex(&self) -> String {
        hex::encode(self.peer_id)
    }

    /// Number of pieces the peer holds
    pub fn piece_count(&self) -> usize {
        self.bitfield.piece_count()
    }
}

//! BitTorrent handshake protocol
//!
//! The fixed 68-byte record both sides send before any length-prefixed message.

use bytes::{BufMut, BytesMut};
use tracing::{debug, error, info, trace, warn};

use crate::error::{PeerWireError, Result};

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Total length of a serialized handshake
pub const HANDSHAKE_LENGTH: usize = 68;

/// Client prefix used when generating peer IDs
const PEER_ID_PREFIX: &[u8; 8] = b"-PW0100-";

/// BitTorrent handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Reserved bytes, used by extensions to advertise support
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a new handshake with all reserved bits cleared
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        debug!("Creating new handshake for info_hash: {}", hex::encode(info_hash));
        Self::with_reserved(info_hash, peer_id, [0u8; 8])
    }

    /// Create a new handshake advertising the given reserved bits
    pub fn with_reserved(info_hash: [u8; 20], peer_id: [u8; 20], reserved: [u8; 8]) -> Self {
        Self {
            reserved,
            info_hash,
            peer_id,
        }
    }

    /// Generate a random peer ID with the "-PW0100-" client prefix
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());
        info!("Generated new peer ID: {}", hex::encode(peer_id));
        peer_id
    }

    /// Serialize the handshake to its 68-byte wire form
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing handshake");
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LENGTH);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(PROTOCOL_STRING.as_bytes());
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        trace!("Handshake serialized: {} bytes", buf.len());
        buf.to_vec()
    }

    /// Deserialize a handshake from its wire form
    ///
    /// Fails with a protocol error if the identifier length or content is not
    /// the BitTorrent literal, and with [`PeerWireError::Truncated`] if fewer
    /// than 68 bytes are supplied.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        trace!("Deserializing handshake from {} bytes", data.len());

        if let Some(&protocol_length) = data.first() {
            check_protocol_length(protocol_length)?;
        }

        if data.len() < HANDSHAKE_LENGTH {
            error!("Handshake data too short: expected {} bytes, got {}", HANDSHAKE_LENGTH, data.len());
            return Err(PeerWireError::truncated(format!(
                "handshake needs {} bytes, got {}",
                HANDSHAKE_LENGTH,
                data.len()
            )));
        }

        if &data[1..20] != PROTOCOL_STRING.as_bytes() {
            error!("Invalid protocol string");
            return Err(PeerWireError::protocol_error_with_source(
                "Invalid protocol string",
                String::from_utf8_lossy(&data[1..20]).into_owned(),
            ));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        debug!("Handshake reserved bytes: {}", hex::encode(reserved));

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        debug!("Handshake info_hash: {}", hex::encode(info_hash));

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);
        debug!("Handshake peer_id: {}", hex::encode(peer_id));

        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Check that the handshake carries the expected info hash
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> bool {
        debug!("Validating handshake against expected info_hash: {}", hex::encode(expected_info_hash));

        if self.info_hash != *expected_info_hash {
            warn!("Handshake validation failed: info hash mismatch");
            warn!("  Expected: {}", hex::encode(expected_info_hash));
            warn!("  Got:      {}", hex::encode(self.info_hash));
            return false;
        }

        debug!("Handshake validation successful");
        true
    }
}

/// Reject a handshake whose first byte is not the protocol identifier length
pub(crate) fn check_protocol_length(protocol_length: u8) -> Result<()> {
    if protocol_length != PROTOCOL_LENGTH {
        error!("Invalid protocol length: expected {}, got {}", PROTOCOL_LENGTH, protocol_length);
        return Err(PeerWireError::protocol_error_with_source(
            "Invalid protocol length",
            format!("expected {}, got {}", PROTOCOL_LENGTH, protocol_length),
        ));
    }
    Ok(())
}

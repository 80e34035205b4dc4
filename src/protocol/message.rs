//! BitTorrent protocol messages
//!
//! Length-prefixed messages exchanged after the handshake:
//! `[u32 length][u8 id][payload]`, where a length of zero is a keep-alive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, error, trace};

use crate::error::{PeerWireError, Result};

/// Size of the big-endian length prefix in front of every message
pub const LENGTH_PREFIX_LENGTH: usize = 4;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerWireError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => Err(PeerWireError::protocol_error_with_source(
                "Unknown message ID",
                format!("value: {}", value),
            )),
        }
    }
}

/// BitTorrent protocol message
///
/// Message types outside the core set are kept as [`Message::Other`] with
/// their payload untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Bytes },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Other { id: u8, payload: Bytes },
}

impl Message {
    /// Get the message ID (None for KeepAlive and unknown types)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::Other { .. } | Message::KeepAlive => None,
        }
    }

    /// Get the raw type byte as sent on the wire (None for KeepAlive)
    pub fn type_byte(&self) -> Option<u8> {
        match self {
            Message::Other { id, .. } => Some(*id),
            other => other.message_id().map(|id| id as u8),
        }
    }

    /// Get the message length (excluding the length prefix)
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
            Message::Other { payload, .. } => 1 + payload.len() as u32,
        }
    }

    /// Serialize the message to bytes (including length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing message: {:?}", self.message_id());
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LENGTH + self.length() as usize);

        buf.put_u32(self.length());
        if let Some(id) = self.type_byte() {
            buf.put_u8(id);
        }

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => {
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bitfield } => {
                buf.put_slice(bitfield);
            }
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Other { payload, .. } => {
                buf.put_slice(payload);
            }
        }

        trace!("Message serialized: {} bytes", buf.len());
        buf.to_vec()
    }

    /// Deserialize a complete message from bytes (including length prefix)
    ///
    /// Bytes after the declared frame are ignored.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        trace!("Deserializing message from {} bytes", data.len());

        if data.len() < LENGTH_PREFIX_LENGTH {
            error!("Message too short: missing length prefix");
            return Err(PeerWireError::truncated(format!(
                "length prefix needs {} bytes, got {}",
                LENGTH_PREFIX_LENGTH,
                data.len()
            )));
        }

        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let available = data.len() - LENGTH_PREFIX_LENGTH;
        if available < length {
            error!("Message truncated: expected {} bytes, got {}", length, available);
            return Err(PeerWireError::truncated(format!(
                "message declares {} bytes, got {}",
                length, available
            )));
        }

        let body = Bytes::copy_from_slice(&data[LENGTH_PREFIX_LENGTH..LENGTH_PREFIX_LENGTH + length]);
        Self::from_body(body)
    }

    /// Parse a message from its frame body: the type byte followed by the payload
    ///
    /// An empty body is a keep-alive.
    pub fn from_body(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            debug!("Received KeepAlive message");
            return Ok(Message::KeepAlive);
        }

        let id = body.get_u8();
        let message_id = match MessageId::try_from(id) {
            Ok(message_id) => message_id,
            Err(_) => {
                debug!("Received message with unknown ID {} ({} payload bytes)", id, body.len());
                return Ok(Message::Other { id, payload: body });
            }
        };

        let message = match message_id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                require_payload(&body, 4, "Have")?;
                Message::Have { piece_index: body.get_u32() }
            }
            MessageId::Bitfield => Message::Bitfield { bitfield: body },
            MessageId::Request => {
                require_payload(&body, 12, "Request")?;
                Message::Request {
                    index: body.get_u32(),
                    begin: body.get_u32(),
                    length: body.get_u32(),
                }
            }
            MessageId::Piece => {
                require_payload(&body, 8, "Piece")?;
                let index = body.get_u32();
                let begin = body.get_u32();
                Message::Piece { index, begin, block: body }
            }
            MessageId::Cancel => {
                require_payload(&body, 12, "Cancel")?;
                Message::Cancel {
                    index: body.get_u32(),
                    begin: body.get_u32(),
                    length: body.get_u32(),
                }
            }
        };

        debug!("Received {:?} message", message_id);
        Ok(message)
    }
}

fn require_payload(payload: &Bytes, expected: usize, kind: &str) -> Result<()> {
    if payload.len() < expected {
        error!("{} message too short: expected {} bytes, got {}", kind, expected, payload.len());
        return Err(PeerWireError::protocol_error_with_source(
            format!("{} message too short", kind),
            format!("expected {} bytes, got {}", expected, payload.len()),
        ));
    }
    Ok(())
}

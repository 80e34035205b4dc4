//! Peer piece availability
//!
//! Bit `i` lives in byte `i / 8` at bit position `7 - i % 8` (MSB first).
//! Indices past the end of the payload are treated as not held.

use bytes::Bytes;
use tracing::trace;

/// The set of pieces a remote peer has advertised
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// Creates a bitfield from the raw payload of a bitfield message
    pub fn from_payload(payload: impl Into<Bytes>) -> Self {
        Self {
            bits: payload.into().to_vec(),
        }
    }

    /// Returns true if the peer has the piece at the given index
    pub fn has_piece(&self, index: usize) -> bool {
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        match self.bits.get(byte_index) {
            Some(byte) => (byte >> bit_index) & 1 == 1,
            None => false,
        }
    }

    /// Marks the piece as held
    ///
    /// Indices beyond the advertised length are ignored; the payload size is
    /// fixed by the peer's bitfield message.
    pub fn set_piece(&mut self, index: usize) {
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        match self.bits.get_mut(byte_index) {
            Some(byte) => *byte |= 1 << bit_index,
            None => trace!("Ignoring out-of-range piece index {}", index),
        }
    }

    /// Number of pieces the peer holds
    pub fn piece_count(&self) -> usize {
        self.bits.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// Number of addressable piece indices
    pub fn len_bits(&self) -> usize {
        self.bits.len() * 8
    }

    /// Indices of all held pieces, ascending
    pub fn pieces(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len_bits()).filter(move |&index| self.has_piece(index))
    }

    /// Raw payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

//! Peer connection module
//!
//! Connection setup, per-connection state and piece availability.

pub mod bitfield;
pub mod connection;
pub mod state;

// Re-export main types
pub use bitfield::Bitfield;
pub use connection::PeerConnection;
pub use state::{ConnectionState, PeerSnapshot};

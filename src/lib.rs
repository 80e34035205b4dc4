//! peer-wire
//!
//! The peer-connection core of a BitTorrent client: dial a peer, exchange
//! handshakes, learn its bitfield and exchange typed wire messages.

pub mod cli;
pub mod config;
pub mod error;
pub mod peer;
pub mod protocol;

pub use error::{PeerWireError, Result};

pub use config::ConnectionConfig;
pub use peer::{Bitfield, ConnectionState, PeerConnection, PeerSnapshot};
pub use protocol::{Handshake, Message, MessageId};
pub use cli::{inspect_peer, CliArgs, Config, FailurePhase, PeerReport};

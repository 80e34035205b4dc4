//! CLI module
//!
//! Command-line interface for the peer inspector.

pub mod args;
pub mod config;
pub mod inspect;

pub use args::CliArgs;
pub use config::Config;
pub use inspect::{inspect_peer, FailurePhase, PeerReport};

//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI arguments for the peer inspector
#[derive(Debug, Parser)]
#[command(name = "peer-wire")]
#[command(about = "Connect to BitTorrent peers and report what they have", long_about = None)]
pub struct CliArgs {
    /// Peer addresses (IP:PORT)
    #[arg(value_name = "PEER", required = true)]
    pub peers: Vec<SocketAddr>,

    /// Info hash of the torrent (40 hex characters)
    #[arg(long, value_name = "HEX", value_parser = parse_id)]
    pub info_hash: [u8; 20],

    /// Our peer ID (40 hex characters); random if omitted
    #[arg(long, value_name = "HEX", value_parser = parse_id)]
    pub peer_id: Option<[u8; 20]>,

    /// JSON file with connection settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// TCP connect timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub dial_timeout: Option<u64>,

    /// Handshake timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub handshake_timeout: Option<u64>,

    /// Bitfield timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub bitfield_timeout: Option<u64>,

    /// Timeout for each message read after setup, in milliseconds
    #[arg(long, value_name = "MS")]
    pub read_timeout: Option<u64>,

    /// Reject peers that answer with a different info hash
    #[arg(long)]
    pub strict: bool,

    /// Declare interest and wait to be unchoked
    #[arg(long)]
    pub interested: bool,

    /// Maximum number of messages to read per peer after declaring interest
    #[arg(long, default_value_t = 16)]
    pub max_messages: usize,

    /// Print the per-peer summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

/// Parse a 20-byte identifier from 40 hex characters
fn parse_id(value: &str) -> Result<[u8; 20], String> {
    let bytes = hex::decode(value).map_err(|e| format!("invalid hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("expected 20 bytes, got {}", bytes.len()))
}

//! CLI configuration module
//!
//! Combines the connection settings file with command-line overrides.

use crate::cli::args::CliArgs;
use crate::config::ConnectionConfig;
use crate::protocol::Handshake;
use std::net::SocketAddr;
use anyhow::{Context, Result};

/// Configuration for one inspection run
#[derive(Debug, Clone)]
pub struct Config {
    /// Peers to connect to
    pub peers: Vec<SocketAddr>,
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Our peer ID
    pub peer_id: [u8; 20],
    /// Connection settings
    pub connection: ConnectionConfig,
    /// Declare interest after setup
    pub interested: bool,
    /// Messages to read per peer after declaring interest
    pub max_messages: usize,
    /// JSON output
    pub json: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let mut connection = match &args.config {
            Some(path) => ConnectionConfig::from_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ConnectionConfig::default(),
        };

        if let Some(ms) = args.dial_timeout {
            connection.dial_timeout_ms = ms;
        }
        if let Some(ms) = args.handshake_timeout {
            connection.handshake_timeout_ms = ms;
        }
        if let Some(ms) = args.bitfield_timeout {
            connection.bitfield_timeout_ms = ms;
        }
        if let Some(ms) = args.read_timeout {
            connection.read_timeout_ms = ms;
        }
        if args.strict {
            connection.strict_info_hash = true;
        }

        Ok(Self {
            peers: args.peers.clone(),
            info_hash: args.info_hash,
            peer_id: args.peer_id.unwrap_or_else(Handshake::generate_peer_id),
            connection,
            interested: args.interested,
            max_messages: args.max_messages,
            json: args.json,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(anyhow::anyhow!("at least one peer address is required"));
        }

        if self.interested && self.max_messages == 0 {
            return Err(anyhow::anyhow!("max_messages must be at least 1 when declaring interest"));
        }

        self.connection.validate().context("Invalid connection settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const INFO_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_config_from_args_overrides() {
        let args = CliArgs::try_parse_from([
            "peer-wire",
            "127.0.0.1:6881",
            "--info-hash",
            INFO_HASH,
            "--dial-timeout",
            "250",
            "--bitfield-timeout",
            "900",
            "--read-timeout",
            "400",
            "--strict",
        ])
        .unwrap();

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.connection.dial_timeout_ms, 250);
        assert_eq!(config.connection.handshake_timeout_ms, 3_000);
        assert_eq!(config.connection.bitfield_timeout_ms, 900);
        assert_eq!(config.connection.read_timeout_ms, 400);
        assert!(config.connection.strict_info_hash);
        assert_eq!(&config.peer_id[..8], b"-PW0100-");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_timeout() {
        let args = CliArgs::try_parse_from([
            "peer-wire",
            "127.0.0.1:6881",
            "--info-hash",
            INFO_HASH,
            "--handshake-timeout",
            "0",
        ])
        .unwrap();

        let config = Config::from_args(&args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_interested_needs_messages() {
        let args = CliArgs::try_parse_from([
            "peer-wire",
            "127.0.0.1:6881",
            "--info-hash",
            INFO_HASH,
            "--interested",
            "--max-messages",
            "0",
        ])
        .unwrap();

        let config = Config::from_args(&args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_missing_file() {
        let args = CliArgs::try_parse_from([
            "peer-wire",
            "127.0.0.1:6881",
            "--info-hash",
            INFO_HASH,
            "--config",
            "/nonexistent/peer-wire.json",
        ])
        .unwrap();

        assert!(Config::from_args(&args).is_err());
    }
}

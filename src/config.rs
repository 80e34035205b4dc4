//! Connection configuration
//!
//! Timeouts and limits applied while setting up and running a peer connection.
//! Values can come from an optional JSON file; any field the file omits keeps
//! its default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PeerWireError, Result};

/// Default TCP connect timeout
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 3_000;

/// Default deadline for the handshake exchange
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 3_000;

/// Default deadline for receiving the peer's bitfield
pub const DEFAULT_BITFIELD_TIMEOUT_MS: u64 = 5_000;

/// Default deadline callers put on a single steady-state read
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Default upper bound on a single message body
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1 << 21;

/// Smallest frame limit that still admits a request message
const MIN_FRAME_LENGTH: usize = 13;

/// Settings for establishing and running a peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// TCP connect timeout in milliseconds
    pub dial_timeout_ms: u64,
    /// Handshake deadline in milliseconds
    pub handshake_timeout_ms: u64,
    /// Bitfield deadline in milliseconds
    pub bitfield_timeout_ms: u64,
    /// Per-read deadline in milliseconds; `PeerConnection::read` does not apply it
    pub read_timeout_ms: u64,
    /// Reject peers whose handshake carries a different info hash
    pub strict_info_hash: bool,
    /// Largest accepted message body in bytes
    pub max_frame_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            bitfield_timeout_ms: DEFAULT_BITFIELD_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            strict_info_hash: false,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ConnectionConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading connection config from {}", path.display());
        let data = std::fs::read(path).map_err(|e| {
            PeerWireError::config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_slice(&data)?;
        debug!("Loaded connection config: {:?}", config);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("dial_timeout_ms", self.dial_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("bitfield_timeout_ms", self.bitfield_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
        ] {
            if value == 0 {
                return Err(PeerWireError::config_error_with_field("Timeout must be positive", field));
            }
        }

        if self.max_frame_length < MIN_FRAME_LENGTH {
            return Err(PeerWireError::config_error_with_field(
                format!("Frame limit must be at least {} bytes", MIN_FRAME_LENGTH),
                "max_frame_length",
            ));
        }

        Ok(())
    }

    /// TCP connect timeout
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Handshake deadline
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Bitfield deadline
    pub fn bitfield_timeout(&self) -> Duration {
        Duration::from_millis(self.bitfield_timeout_ms)
    }

    /// Steady-state read deadline
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

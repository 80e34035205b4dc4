//! Peer inspection
//!
//! Takes one peer through setup and, when asked, declares interest and reads
//! until the peer unchokes us. Every outcome ends up in a [`PeerReport`].

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cli::config::Config;
use crate::error::{PeerWireError, Result};
use crate::peer::{PeerConnection, PeerSnapshot};
use crate::protocol::Message;

/// Stage at which an inspection failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePhase {
    /// Dial, handshake or bitfield
    Setup,
    /// Anything after the connection became ready
    Session,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePhase::Setup => f.write_str("setup"),
            FailurePhase::Session => f.write_str("session"),
        }
    }
}

/// What one inspection learned about a peer
#[derive(Debug, Serialize)]
pub struct PeerReport {
    pub addr: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pieces_held: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pieces_advertised: Option<usize>,
    pub messages_read: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_during: Option<FailurePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PeerReport {
    fn from_snapshot(snapshot: &PeerSnapshot, messages_read: usize) -> Self {
        Self {
            addr: snapshot.addr,
            peer_id: Some(snapshot.peer_id_hex()),
            choked: Some(snapshot.choked),
            pieces_held: Some(snapshot.piece_count()),
            pieces_advertised: Some(snapshot.bitfield.len_bits()),
            messages_read,
            failed_during: None,
            error: None,
        }
    }

    fn failed(addr: SocketAddr, phase: FailurePhase, err: &PeerWireError, messages_read: usize) -> Self {
        Self {
            addr,
            peer_id: None,
            choked: None,
            pieces_held: None,
            pieces_advertised: None,
            messages_read,
            failed_during: Some(phase),
            error: Some(err.to_string()),
        }
    }
}

/// Inspect a single peer
///
/// Failures never escape; they are recorded in the report together with the
/// phase they happened in.
pub async fn inspect_peer(addr: SocketAddr, config: &Config) -> PeerReport {
    let mut conn =
        match PeerConnection::connect_with_config(addr, config.info_hash, config.peer_id, &config.connection).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Setup with {} failed: {}", addr, e);
                return PeerReport::failed(addr, FailurePhase::Setup, &e, 0);
            }
        };

    let mut messages_read = 0;
    if config.interested {
        if let Err(e) = wait_for_unchoke(&mut conn, config, &mut messages_read).await {
            warn!("Session with {} failed: {}", addr, e);
            conn.close().await;
            return PeerReport::failed(addr, FailurePhase::Session, &e, messages_read);
        }
    }

    let report = PeerReport::from_snapshot(&conn.snapshot(), messages_read);
    conn.close().await;
    report
}

async fn wait_for_unchoke(conn: &mut PeerConnection, config: &Config, messages_read: &mut usize) -> Result<()> {
    conn.send_interested().await?;
    let addr = conn.peer_addr();
    let deadline = config.connection.read_timeout();

    while *messages_read < config.max_messages {
        let message = timeout(deadline, conn.read()).await.map_err(|_| {
            warn!("No message from {} within {:?}", addr, deadline);
            PeerWireError::io_error_with_source("Timed out waiting for message", format!("no message within {:?}", deadline))
        })??;
        *messages_read += 1;
        conn.apply_message(&message);

        if matches!(message, Message::Unchoke) {
            info!("Peer {} unchoked us after {} message(s)", addr, messages_read);
            return Ok(());
        }
    }

    debug!("Peer {} still choking after {} message(s)", addr, config.max_messages);
    Ok(())
}

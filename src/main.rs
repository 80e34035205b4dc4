//! peer-wire - Main entry point
//!
//! Connects to each given peer on its own task, reports the pieces it holds
//! and optionally waits to be unchoked.

use anyhow::{Context, Result};
use peer_wire::{inspect_peer, CliArgs, Config, PeerReport};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args).context("Failed to build configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Probing {} peer(s) for info hash {}",
        config.peers.len(),
        hex::encode(config.info_hash)
    );

    let tasks: Vec<_> = config
        .peers
        .iter()
        .copied()
        .map(|addr| {
            let config = config.clone();
            tokio::spawn(async move { inspect_peer(addr, &config).await })
        })
        .collect();

    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(report) => reports.push(report),
            Err(e) => error!("Inspection task panicked: {}", e),
        }
    }

    print_reports(&reports, config.json)?;

    info!("peer-wire finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

fn print_reports(reports: &[PeerReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        match &report.error {
            Some(err) => println!(
                "{}  {} failed: {}",
                report.addr,
                report.failed_during.map_or_else(|| "inspection".to_string(), |phase| phase.to_string()),
                err
            ),
            None => {
                println!("{}", report.addr);
                if let Some(peer_id) = &report.peer_id {
                    println!("  Peer ID: {}", peer_id);
                }
                if let (Some(held), Some(advertised)) = (report.pieces_held, report.pieces_advertised) {
                    println!("  Pieces: {} of {} advertised", held, advertised);
                }
                if let Some(choked) = report.choked {
                    println!("  Choked: {}", if choked { "yes" } else { "no" });
                }
                println!("  Messages read: {}", report.messages_read);
            }
        }
    }
    Ok(())
}

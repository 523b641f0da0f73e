//! Command-line entry point for MiniBit: run a tracker, or run a peer that
//! shares or downloads a file.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use minibit::core::Config;
use minibit::peer::PeerNode;
use minibit::tracker::Tracker;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "minibit")]
#[command(about = "A simplified BitTorrent-style peer-to-peer file distribution system")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker: a membership and block-availability registry.
    Tracker {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Run a peer: share a local file, or download one already in the swarm.
    Peer {
        #[arg(long)]
        tracker_addr: String,
        #[arg(long, conflicts_with = "file_name")]
        file_path: Option<PathBuf>,
        #[arg(long, conflicts_with = "file_path")]
        file_name: Option<String>,
        #[arg(long, default_value_t = 0)]
        listen_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Tracker { host, port } => run_tracker(host, port).await,
        Commands::Peer { tracker_addr, file_path, file_name, listen_port } => {
            run_peer(tracker_addr, file_path, file_name, listen_port).await
        }
    }
}

async fn run_tracker(host: String, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let tracker = Arc::new(Tracker::new());
    log::info!("starting tracker on {addr}");
    tracker.run(&addr).await.context("tracker failed")?;
    Ok(())
}

async fn run_peer(tracker_addr: String, file_path: Option<PathBuf>, file_name: Option<String>, listen_port: u16) -> Result<()> {
    if tracker_addr.parse::<std::net::SocketAddr>().is_err() {
        bail!("--tracker-addr must be a HOST:PORT address, got {tracker_addr}");
    }

    let peer_id = format!("Peer-{:06x}", rand::thread_rng().gen_range(0..0xFFFFFF));
    let config = Config::default();
    let node = PeerNode::new(peer_id.clone(), config, tracker_addr);

    match (file_path, file_name) {
        (Some(path), None) => {
            if !path.exists() {
                bail!("--file-path {} does not exist", path.display());
            }
            node.share_file(&path).await.context("failed to load shared file")?;
        }
        (None, Some(name)) => {
            node.download_file(name).await.context("failed to start download")?;
        }
        _ => bail!("exactly one of --file-path or --file-name is required"),
    }

    let addr = node.start(listen_port).await.context("failed to start peer node")?;
    log::info!("{peer_id}: listening on {addr}");

    let mut was_complete = false;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let complete = node.is_complete().await;
        if complete && !was_complete {
            log::info!("{peer_id}: {}", node.status_string().await);
        }
        was_complete = complete;
    }
}

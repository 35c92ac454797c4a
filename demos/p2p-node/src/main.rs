use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use epochnet_configs::{config::partial, loaders, Config};
use epochnet_network::{manager::ManagerEvent, node::Node, protocol::CheckpointBeacon};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Runs an epochnet node that connects, syncs and logs what it sees")]
struct Args {
    /// TOML config file; defaults are used when missing
    #[arg(short, long, env = "EPOCHNET_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `connections.server_addr`
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Extra peers to dial, on top of the configured ones
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Ask every new peer for blocks after genesis
    #[arg(long)]
    sync: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let partial = match &args.config {
        Some(path) => loaders::toml::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => partial::Config::default(),
    };

    let mut config = Config::from_partial(&partial);

    if let Some(listen) = args.listen {
        config.connections.server_addr = listen;
    }

    config.connections.known_peers.extend(&args.peers);

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!(environment = ?config.environment, "starting node");

    let genesis = config.protocol.genesis;

    let (node, handle, mut events) = Node::bind(config.node_config())
        .await
        .context("binding listener")?;

    let runner = tokio::spawn(node.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };

                match event {
                    ManagerEvent::PeerReady { pid, version, .. } => {
                        info!(
                            %pid,
                            agent = %version.user_agent,
                            epoch = version.last_epoch,
                            "peer ready"
                        );

                        if args.sync {
                            let from = CheckpointBeacon {
                                checkpoint: 0,
                                hash_prev_block: genesis,
                            };

                            handle.sync(from).await?;
                        }
                    }
                    ManagerEvent::BlockReceived { pid, block, solicited } => {
                        info!(
                            %pid,
                            hash = %block.hash(),
                            checkpoint = block.header.beacon.checkpoint,
                            txns = block.txn_count(),
                            solicited,
                            "block received"
                        );

                        handle.mark_known(block.inv_vector()).await?;
                    }
                    ManagerEvent::BlocksRequested { pid, .. } => {
                        // nothing stored, nothing to offer
                        handle.send_inventory(pid, vec![]).await?;
                    }
                    ManagerEvent::PeerBanned { ip } => warn!(?ip, "peer banned"),
                    other => info!(event = ?other, "network event"),
                }
            }
        }
    }

    info!("shutting down");
    handle.shutdown().await.ok();
    runner.await?;

    Ok(())
}

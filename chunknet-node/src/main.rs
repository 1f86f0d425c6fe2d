use std::sync::Arc;

use anyhow::Context;
use chunknet_node::config::Config;
use chunknet_node::server::Server;
use chunknet_node::store::{IndexStore, PeerStore};
use chunknet_node::{client, gossip, indexer};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: chunknet-node [serve | fetch <peer> <filename> | --version]";

enum Mode {
    Serve,
    Fetch { peer: String, filename: String },
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mode = match args.next().as_deref() {
        None | Some("serve") => Mode::Serve,
        Some("fetch") => {
            let (Some(peer), Some(filename)) = (args.next(), args.next()) else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            Mode::Fetch { peer, filename }
        }
        Some("--version") | Some("-V") => {
            println!("chunknet-node {}", VERSION);
            return Ok(());
        }
        Some(_) => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::load()?;
    cfg.ensure_dirs()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match mode {
            Mode::Fetch { peer, filename } => {
                let path = client::download(&cfg, &peer, &filename).await?;
                tracing::info!(file = %path.display(), "download complete");
                Ok(())
            }
            Mode::Serve => serve(cfg).await,
        }
    })
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let index = Arc::new(IndexStore::new(cfg.index_file.clone()));
    let peers = Arc::new(PeerStore::new(cfg.peer_file.clone(), cfg.host_addr.clone()));

    peers
        .init()
        .await
        .context("failed to initialize peer directory")?;
    indexer::refresh_index(&cfg, &index).await?;

    let server = Server::bind(cfg.clone(), index.clone(), peers.clone()).await?;
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let server_task = tokio::spawn(server.run());
    let gossip_task = tokio::spawn(gossip::run_gossip(cfg.clone(), peers.clone(), stop_rx));

    shutdown_signal().await?;
    tracing::info!("shutdown requested");
    let _ = stop_tx.send(true);
    gossip_task.await?;
    // In-flight handlers finish or fail on their own once the listener drops.
    server_task.abort();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

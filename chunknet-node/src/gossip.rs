//! Peer-discovery gossip: periodic peer-list exchange with every known peer.
//!
//! Each cycle loads the directory, asks every peer other than ourselves for
//! its list, and merges the replies. Per-peer failures are expected (peers
//! go offline) and never stop the cycle. The interval wait is interruptible
//! so shutdown is prompt; in-flight exchanges are not interrupted.
//!
//! This loop is also the hook point for replication auditing: a future cycle
//! would compare `REPORT_AVAILABILITY` replies against replication factors.

use std::sync::Arc;
use std::time::Duration;

use chunknet_core::{Command, PayloadKind, PeerSet};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::config::Config;
use crate::net::{self, WireError};
use crate::store::PeerStore;

pub async fn run_gossip(
    cfg: Arc<Config>,
    peers: Arc<PeerStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(cfg.gossip_interval_secs);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let known = peers.load().await;
        for addr in known.others(peers.local_addr()) {
            match exchange_peers(&cfg, &addr).await {
                Ok(list) => match peers.merge(&list).await {
                    Ok(added) if added > 0 => {
                        tracing::info!(peer = %addr, added, "gossip learned new peers");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to persist gossiped peers");
                    }
                },
                // Expected when the peer is offline.
                Err(e) => tracing::debug!(peer = %addr, error = %e, "gossip exchange failed"),
            }
        }
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown; spinning without the
                // interval sleep would busy-loop the exchange.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!("gossip loop stopped");
}

/// One exchange: request the peer's directory and return it.
pub async fn exchange_peers(cfg: &Config, peer: &str) -> Result<PeerSet, WireError> {
    let mut stream = net::connect(peer, cfg.port).await?;
    stream
        .write_all(Command::PeerList.encode().as_bytes())
        .await?;
    let payload = net::recv_payload(&mut stream, PayloadKind::PeerList).await?;
    serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_stop_sender_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::with_host("127.0.0.1");
        cfg.peer_file = dir.path().join("peers.json");
        cfg.gossip_interval_secs = 3600;
        let peers = Arc::new(PeerStore::new(cfg.peer_file.clone(), "local".into()));

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_gossip(Arc::new(cfg), peers, stop_rx));
        drop(stop_tx);

        // The loop must exit instead of spinning through cycles unslept.
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("gossip loop kept running after its stop channel closed")
            .unwrap();
    }
}

//! Inbound request handling: accept loop, per-connection tasks, dispatch.
//!
//! Each accepted connection is handed to its own task so a slow peer cannot
//! stall acceptance; a semaphore bounds how many handlers run at once. A
//! handler processes exactly one command, responds, and closes. Handler
//! failures are answered with a best-effort `ERROR: INTERNAL_SERVER_ERROR`
//! and never crash the dispatcher.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chunknet_core::{
    hosted_hashes, ChunkHeader, Command, ErrorReason, PayloadKind, UNKNOWN_COMMAND_REPLY,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::{socket_addr, Config};
use crate::net;
use crate::store::{IndexStore, PeerStore};

pub struct Server {
    listener: TcpListener,
    cfg: Arc<Config>,
    index: Arc<IndexStore>,
    peers: Arc<PeerStore>,
}

impl Server {
    /// Bind the service socket on the configured address and port.
    pub async fn bind(
        cfg: Arc<Config>,
        index: Arc<IndexStore>,
        peers: Arc<PeerStore>,
    ) -> anyhow::Result<Server> {
        let addr = socket_addr(&cfg.host_addr, cfg.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(Server {
            listener,
            cfg,
            index,
            peers,
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let handlers = Arc::new(Semaphore::new(self.cfg.max_connections));
        loop {
            let (mut stream, remote) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed, stopping");
                    return Ok(());
                }
            };
            let permit = handlers
                .clone()
                .acquire_owned()
                .await
                .context("handler semaphore closed")?;
            let peer_ip = remote.ip().to_string();
            let cfg = self.cfg.clone();
            let index = self.index.clone();
            let peers = self.peers.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_connection(&mut stream, &peer_ip, &cfg, &index, &peers).await
                {
                    tracing::warn!(peer = %peer_ip, error = %e, "connection handler failed");
                    let _ = stream
                        .write_all(ErrorReason::InternalServerError.encode().as_bytes())
                        .await;
                }
            });
        }
    }
}

async fn handle_connection(
    stream: &mut TcpStream,
    peer_ip: &str,
    cfg: &Config,
    index: &IndexStore,
    peers: &PeerStore,
) -> anyhow::Result<()> {
    let line = net::read_frame(stream).await?;
    match Command::parse(&line) {
        Some(Command::FileList) => serve_file_list(stream, index).await,
        Some(Command::Chunk { filename, chunk_id }) => {
            serve_chunk(stream, cfg, index, &filename, chunk_id).await
        }
        Some(Command::PeerList) => serve_peer_list(stream, peers, peer_ip).await,
        Some(Command::Availability) => serve_availability(stream, index).await,
        None => {
            tracing::debug!(peer = %peer_ip, command = %line, "unknown command");
            stream.write_all(UNKNOWN_COMMAND_REPLY.as_bytes()).await?;
            Ok(())
        }
    }
}

/// `REQUEST_FILE_LIST`: the whole index as JSON. An absent index file is an
/// empty object, not an error.
async fn serve_file_list(stream: &mut TcpStream, index: &IndexStore) -> anyhow::Result<()> {
    let snapshot = index.read().await.unwrap_or_default();
    let json = serde_json::to_vec(&snapshot)?;
    net::send_payload(stream, PayloadKind::FileList, &json).await?;
    tracing::debug!(files = snapshot.len(), "served file list");
    Ok(())
}

/// `REQUEST_CHUNK`: look up the descriptor, read exactly its byte range from
/// the backing file, stream it after the `CHUNK_READY` handshake.
async fn serve_chunk(
    stream: &mut TcpStream,
    cfg: &Config,
    index: &IndexStore,
    filename: &str,
    chunk_id: u32,
) -> anyhow::Result<()> {
    let Some(snapshot) = index.read().await else {
        return refuse(stream, ErrorReason::IndexNotFound).await;
    };
    let Some(entry) = snapshot.get(filename) else {
        return refuse(stream, ErrorReason::FilenameNotInIndex).await;
    };
    let Some(descriptor) = entry.chunk(chunk_id) else {
        return refuse(stream, ErrorReason::ChunkIdNotFound).await;
    };

    let path = cfg.shared_dir.join(filename);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => {
            // Index/filesystem consistency fault: indexed but gone from disk.
            tracing::warn!(file = %path.display(), "indexed file missing on disk");
            return refuse(stream, ErrorReason::FileMissingOnDisk).await;
        }
    };
    file.seek(SeekFrom::Start(descriptor.offset)).await?;
    let mut data = vec![0u8; descriptor.size as usize];
    file.read_exact(&mut data).await?;

    let header = ChunkHeader {
        id: descriptor.id,
        size: descriptor.size,
        hash: descriptor.hash.clone(),
    };
    stream.write_all(header.encode().as_bytes()).await?;
    net::read_frame(stream).await?; // client READY
    stream.write_all(&data).await?;
    stream.flush().await?;
    tracing::debug!(file = %filename, chunk = chunk_id, size = descriptor.size, "served chunk");
    Ok(())
}

/// `REQUEST_PEER_LIST`: record the caller (passive discovery), then send the
/// whole directory.
async fn serve_peer_list(
    stream: &mut TcpStream,
    peers: &PeerStore,
    peer_ip: &str,
) -> anyhow::Result<()> {
    let (set, added) = peers.record(peer_ip).await?;
    if added {
        tracing::info!(peer = %peer_ip, "learned new peer");
    }
    let json = serde_json::to_vec(&set)?;
    net::send_payload(stream, PayloadKind::PeerList, &json).await?;
    Ok(())
}

/// `REPORT_AVAILABILITY`: the flat set of hosted chunk hashes.
async fn serve_availability(stream: &mut TcpStream, index: &IndexStore) -> anyhow::Result<()> {
    let snapshot = index.read().await.unwrap_or_default();
    let hashes = hosted_hashes(&snapshot);
    let json = serde_json::to_vec(&hashes)?;
    net::send_payload(stream, PayloadKind::HashList, &json).await?;
    tracing::debug!(hashes = hashes.len(), "served availability report");
    Ok(())
}

async fn refuse(stream: &mut TcpStream, reason: ErrorReason) -> anyhow::Result<()> {
    stream.write_all(reason.encode().as_bytes()).await?;
    Ok(())
}

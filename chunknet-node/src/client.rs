//! Download side: file-list fetch, resumable chunk fetch, and reassembly.
//!
//! Every exchange opens a fresh connection. Chunks are fetched strictly
//! sequentially; the first failure aborts the whole download before any
//! reassembly happens. Part files (`{filename}.part{id}`) survive across
//! runs and are trusted only after re-hashing.

use std::path::{Path, PathBuf};

use chunknet_core::{
    ChunkDescriptor, ChunkHasher, Command, ContentIndex, PayloadKind, ResponseHeader,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::Config;
use crate::net::{self, WireError, ACK, RECV_CHUNK};

/// Why a fetch or download failed. Distinguishes "peer has no files" (an
/// empty, successful list) from every failure mode.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("invalid payload from peer: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("peer does not host file {0:?}")]
    NotHosted(String),
    #[error("chunk {id} hash mismatch")]
    HashMismatch { id: u32 },
    #[error("chunk {id} missing, cannot reassemble")]
    MissingPart { id: u32 },
}

/// Ask a peer for its full content index.
pub async fn fetch_file_list(cfg: &Config, peer: &str) -> Result<ContentIndex, DownloadError> {
    let mut stream = net::connect(peer, cfg.port).await?;
    stream
        .write_all(Command::FileList.encode().as_bytes())
        .await?;
    let payload = net::recv_payload(&mut stream, PayloadKind::FileList).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Fetch one chunk into its part file, verifying the hash incrementally.
///
/// Resume check first: a part file whose content already hashes to the
/// descriptor's hash is accepted without any network activity, so calling
/// this repeatedly is idempotent.
pub async fn fetch_chunk(
    cfg: &Config,
    peer: &str,
    filename: &str,
    descriptor: &ChunkDescriptor,
) -> Result<(), DownloadError> {
    let part = part_path(cfg, filename, descriptor.id);
    if part.exists() && hash_file(&part).await? == descriptor.hash {
        tracing::debug!(chunk = descriptor.id, "part file already valid, skipping");
        return Ok(());
    }

    let mut stream = net::connect(peer, cfg.port).await?;
    let cmd = Command::Chunk {
        filename: filename.to_string(),
        chunk_id: descriptor.id,
    };
    stream.write_all(cmd.encode().as_bytes()).await?;

    let line = net::read_frame(&mut stream).await?;
    let header = match ResponseHeader::parse(&line) {
        Ok(ResponseHeader::Chunk(header)) => header,
        Ok(ResponseHeader::Error(reason)) => return Err(WireError::Peer(reason).into()),
        _ => return Err(WireError::UnexpectedHeader(line).into()),
    };
    stream.write_all(ACK).await?;

    // Stream into the part file, hashing as bytes arrive and never reading
    // past the announced size. An early close leaves the part file in an
    // indeterminate state; the next resume attempt re-verifies it by hash.
    let mut file = tokio::fs::File::create(&part).await?;
    let mut hasher = ChunkHasher::new();
    let mut remaining = header.size as usize;
    let mut buf = [0u8; RECV_CHUNK];
    while remaining > 0 {
        let want = remaining.min(RECV_CHUNK);
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(WireError::Truncated {
                expected: header.size as usize,
                received: header.size as usize - remaining,
            }
            .into());
        }
        file.write_all(&buf[..n]).await?;
        hasher.update(&buf[..n]);
        remaining -= n;
    }
    file.flush().await?;
    drop(file);

    if hasher.finish() == descriptor.hash {
        tracing::debug!(chunk = descriptor.id, size = header.size, "chunk verified");
        Ok(())
    } else {
        tracing::warn!(chunk = descriptor.id, "hash mismatch, discarding part file");
        tokio::fs::remove_file(&part).await?;
        Err(DownloadError::HashMismatch { id: descriptor.id })
    }
}

/// Concatenate verified part files into the final output, in id order.
///
/// All parts are checked for existence before any output is written; part
/// files are deleted as they are consumed.
pub async fn reassemble(
    cfg: &Config,
    filename: &str,
    descriptors: &[ChunkDescriptor],
) -> Result<PathBuf, DownloadError> {
    // Arrival order from the index is not trusted.
    let mut ordered: Vec<&ChunkDescriptor> = descriptors.iter().collect();
    ordered.sort_by_key(|d| d.id);

    for descriptor in &ordered {
        if !part_path(cfg, filename, descriptor.id).exists() {
            return Err(DownloadError::MissingPart { id: descriptor.id });
        }
    }

    let final_path = cfg.download_dir.join(filename);
    let mut output = tokio::fs::File::create(&final_path).await?;
    for descriptor in &ordered {
        let part = part_path(cfg, filename, descriptor.id);
        let data = tokio::fs::read(&part).await?;
        output.write_all(&data).await?;
        tokio::fs::remove_file(&part).await?;
    }
    output.flush().await?;
    tracing::info!(file = %final_path.display(), chunks = ordered.len(), "file reassembled");
    Ok(final_path)
}

/// Full download: descriptor list, sequential chunk fetch (one connection
/// per chunk), then reassembly. Aborts on the first chunk failure.
pub async fn download(cfg: &Config, peer: &str, filename: &str) -> Result<PathBuf, DownloadError> {
    let index = fetch_file_list(cfg, peer).await?;
    let entry = index
        .get(filename)
        .ok_or_else(|| DownloadError::NotHosted(filename.to_string()))?;
    tracing::info!(
        peer = %peer,
        file = %filename,
        chunks = entry.chunks.len(),
        total_size = entry.total_size,
        "starting download"
    );
    for descriptor in &entry.chunks {
        fetch_chunk(cfg, peer, filename, descriptor).await?;
    }
    reassemble(cfg, filename, &entry.chunks).await
}

fn part_path(cfg: &Config, filename: &str, id: u32) -> PathBuf {
    cfg.download_dir.join(format!("{filename}.part{id}"))
}

/// Hash a file's full contents in socket-sized pieces.
async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ChunkHasher::new();
    let mut buf = [0u8; RECV_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(hasher.finish());
        }
        hasher.update(&buf[..n]);
    }
}

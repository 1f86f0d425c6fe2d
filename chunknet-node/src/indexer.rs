//! Shared-file indexing: fixed-size chunking with per-chunk SHA-256.
//!
//! Runs once at startup: files in the shared directory that are new or whose
//! size changed get (re-)indexed; everything else keeps its existing entry.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chunknet_core::{integrity, ChunkDescriptor, FileEntry};

use crate::config::Config;
use crate::store::IndexStore;

/// Default replication target recorded in new entries. Not enforced.
pub const DEFAULT_REPLICATION_FACTOR: u32 = 2;

/// Chunk and hash one file into an index entry.
pub fn index_file(path: &Path, chunk_size: u32) -> anyhow::Result<(String, FileEntry)> {
    let filename = path
        .file_name()
        .with_context(|| format!("path has no filename: {}", path.display()))?
        .to_string_lossy()
        .into_owned();
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut chunks = Vec::new();
    let mut offset = 0u64;
    let mut buf = vec![0u8; chunk_size as usize];
    loop {
        let n = read_up_to(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        chunks.push(ChunkDescriptor {
            id: chunks.len() as u32,
            offset,
            size: n as u32,
            hash: integrity::hash_bytes(&buf[..n]),
        });
        offset += n as u64;
    }

    let entry = FileEntry {
        total_size: offset,
        replication_factor: DEFAULT_REPLICATION_FACTOR,
        chunks,
    };
    Ok((filename, entry))
}

/// Scan the shared directory and refresh the index. Returns how many files
/// were (re-)indexed.
pub async fn refresh_index(cfg: &Config, store: &IndexStore) -> anyhow::Result<usize> {
    let mut index = store.read().await.unwrap_or_default();
    let mut updated = 0usize;

    let entries = std::fs::read_dir(&cfg.shared_dir)
        .with_context(|| format!("failed to scan {}", cfg.shared_dir.display()))?;
    for dir_entry in entries {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if !path.is_file() || name.starts_with('.') {
            continue;
        }
        let on_disk_size = dir_entry.metadata()?.len();
        let needs_indexing = match index.get(&name) {
            None => {
                tracing::info!(file = %name, "new file found");
                true
            }
            Some(entry) if entry.total_size != on_disk_size => {
                tracing::info!(file = %name, "file changed, re-indexing");
                true
            }
            Some(_) => false,
        };
        if needs_indexing {
            let (filename, entry) = index_file(&path, cfg.chunk_size)?;
            index.insert(filename, entry);
            updated += 1;
        }
    }

    if updated > 0 {
        store
            .replace(&index)
            .await
            .context("failed to write index")?;
        tracing::info!(updated, total = index.len(), "index refreshed");
    } else if store.read().await.is_none() {
        // First run with an empty shared dir: still materialize the file so
        // chunk requests report FILENAME_NOT_IN_INDEX, not INDEX_NOT_FOUND.
        store.replace(&index).await.context("failed to write index")?;
    } else {
        tracing::debug!("index is up to date");
    }
    Ok(updated)
}

// Read until the buffer is full or EOF; a plain `read` may return short.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

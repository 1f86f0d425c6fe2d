//! Shared on-disk state: the content index and the peer directory.
//!
//! Both files are read-modify-write targets for concurrent connection
//! handlers and the gossip loop, so each store serializes access behind its
//! own async mutex. Corrupt JSON recovers to an empty collection with a
//! warning rather than failing the node.

use std::io;
use std::path::PathBuf;

use chunknet_core::{ContentIndex, PeerSet};
use tokio::sync::Mutex;

/// The content index file. Writers are the indexer only; handlers read.
pub struct IndexStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Read the index. `None` when the file does not exist (the server
    /// reports that as `INDEX_NOT_FOUND` for chunk requests); corrupt JSON
    /// degrades to an empty index.
    pub async fn read(&self) -> Option<ContentIndex> {
        let _guard = self.lock.lock().await;
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read index");
                return Some(ContentIndex::new());
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt index, treating as empty");
                Some(ContentIndex::new())
            }
        }
    }

    /// Replace the index on disk.
    pub async fn replace(&self, index: &ContentIndex) -> io::Result<()> {
        let _guard = self.lock.lock().await;
        let json = serde_json::to_vec_pretty(index)?;
        tokio::fs::write(&self.path, json).await
    }
}

/// The peer directory file. Every save deduplicates and re-adds the local
/// address, so the "local address always present, no duplicates" invariant
/// holds after any sequence of merges.
pub struct PeerStore {
    path: PathBuf,
    local_addr: String,
    lock: Mutex<()>,
}

impl PeerStore {
    pub fn new(path: PathBuf, local_addr: String) -> Self {
        Self {
            path,
            local_addr,
            lock: Mutex::new(()),
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Read the directory as stored. Absent or corrupt file yields an empty
    /// set (with a warning for the corrupt case).
    pub async fn load(&self) -> PeerSet {
        let _guard = self.lock.lock().await;
        self.load_locked().await
    }

    /// Record one peer address (passive discovery). Returns the directory
    /// after the update and whether the address was new.
    pub async fn record(&self, addr: &str) -> io::Result<(PeerSet, bool)> {
        let _guard = self.lock.lock().await;
        let mut set = self.load_locked().await;
        let added = set.insert(addr);
        self.save_locked(&mut set).await?;
        Ok((set, added))
    }

    /// Merge a batch of addresses learned from gossip; returns how many
    /// were new.
    pub async fn merge(&self, addrs: &PeerSet) -> io::Result<usize> {
        let _guard = self.lock.lock().await;
        let mut set = self.load_locked().await;
        let added = set.merge(addrs.iter());
        self.save_locked(&mut set).await?;
        Ok(added)
    }

    /// Rewrite the file so it exists and contains the local address. Run
    /// once at startup, before anything else can read it.
    pub async fn init(&self) -> io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut set = self.load_locked().await;
        self.save_locked(&mut set).await
    }

    async fn load_locked(&self) -> PeerSet {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return PeerSet::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read peer file");
                return PeerSet::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt peer file, starting fresh");
                PeerSet::new()
            }
        }
    }

    async fn save_locked(&self, set: &mut PeerSet) -> io::Result<()> {
        set.ensure_local(&self.local_addr);
        let json = serde_json::to_vec_pretty(set)?;
        tokio::fs::write(&self.path, json).await
    }
}

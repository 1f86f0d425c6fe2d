//! Content index: filename -> file entry with ordered chunk descriptors.
//!
//! The index is the JSON object served for `REQUEST_FILE_LIST` and persisted
//! by the node as `local_index.json`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One content-hashed byte range of a shared file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// 0-based position within the file; defines reassembly order.
    pub id: u32,
    /// Byte offset into the source file.
    pub offset: u64,
    /// Bytes in this chunk; only the last chunk may be short.
    pub size: u32,
    /// Hex SHA-256 of exactly these bytes.
    pub hash: String,
}

/// Per-file metadata. Immutable once written except by re-indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub total_size: u64,
    /// Target redundancy across peers; recorded, never enforced here.
    pub replication_factor: u32,
    pub chunks: Vec<ChunkDescriptor>,
}

/// The full index. `BTreeMap` keeps serialized output deterministic.
pub type ContentIndex = BTreeMap<String, FileEntry>;

/// Violation of the chunk-list invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("chunk at position {position} has id {id}, expected {expected}")]
    IdOutOfOrder { position: usize, id: u32, expected: u32 },
    #[error("chunk {id} starts at offset {offset}, expected {expected}")]
    OffsetGap { id: u32, offset: u64, expected: u64 },
    #[error("chunk sizes sum to {actual}, total_size is {expected}")]
    SizeMismatch { actual: u64, expected: u64 },
}

impl FileEntry {
    /// Check the descriptor invariants: ids are 0..n in order, offsets are
    /// contiguous from 0, and sizes sum to `total_size`.
    pub fn validate(&self) -> Result<(), IndexError> {
        let mut expected_offset = 0u64;
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.id as usize != position {
                return Err(IndexError::IdOutOfOrder {
                    position,
                    id: chunk.id,
                    expected: position as u32,
                });
            }
            if chunk.offset != expected_offset {
                return Err(IndexError::OffsetGap {
                    id: chunk.id,
                    offset: chunk.offset,
                    expected: expected_offset,
                });
            }
            expected_offset += chunk.size as u64;
        }
        if expected_offset != self.total_size {
            return Err(IndexError::SizeMismatch {
                actual: expected_offset,
                expected: self.total_size,
            });
        }
        Ok(())
    }

    /// Descriptor for a chunk id, if present.
    pub fn chunk(&self, id: u32) -> Option<&ChunkDescriptor> {
        self.chunks.iter().find(|c| c.id == id)
    }
}

/// Every chunk hash the index hosts, sorted and deduplicated. Answers the
/// `REPORT_AVAILABILITY` audit query.
pub fn hosted_hashes(index: &ContentIndex) -> Vec<String> {
    let set: BTreeSet<&str> = index
        .values()
        .flat_map(|entry| entry.chunks.iter().map(|c| c.hash.as_str()))
        .collect();
    set.into_iter().map(String::from).collect()
}

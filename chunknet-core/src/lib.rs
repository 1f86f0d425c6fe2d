//! Chunknet protocol reference types.
//! Pure data and codec layer; socket and file I/O live in the node crate.

pub mod index;
pub mod integrity;
pub mod peers;
pub mod protocol;

pub use index::{hosted_hashes, ChunkDescriptor, ContentIndex, FileEntry, IndexError};
pub use integrity::ChunkHasher;
pub use peers::PeerSet;
pub use protocol::{
    ChunkHeader, Command, ErrorReason, PayloadKind, ResponseHeader, UNKNOWN_COMMAND_REPLY,
};

//! Chunknet peer node: chunk serving, resumable downloads, peer gossip.
//! Protocol types live in `chunknet-core`; this crate is all the I/O.

pub mod client;
pub mod config;
pub mod gossip;
pub mod indexer;
pub mod net;
pub mod server;
pub mod store;

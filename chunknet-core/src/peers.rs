//! Known-peer set: deduplicated overlay addresses.
//!
//! Persisted as a flat JSON array. The node guarantees its own address is a
//! member before every save (`ensure_local`).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Deduplicated set of peer addresses. Addresses are opaque overlay-network
/// host strings; the service port is fixed and not part of the address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerSet {
    addrs: BTreeSet<String>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one address. Returns true if it was not already present.
    pub fn insert(&mut self, addr: &str) -> bool {
        self.addrs.insert(addr.to_string())
    }

    /// Merge another batch of addresses; returns how many were new.
    pub fn merge<I, S>(&mut self, addrs: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        addrs
            .into_iter()
            .filter(|a| self.insert(a.as_ref()))
            .count()
    }

    /// Re-add the local address; a no-op when already present.
    pub fn ensure_local(&mut self, local: &str) {
        self.insert(local);
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.contains(addr)
    }

    /// Every known peer except the given local address.
    pub fn others(&self, local: &str) -> Vec<String> {
        self.addrs.iter().filter(|a| *a != local).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.addrs.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

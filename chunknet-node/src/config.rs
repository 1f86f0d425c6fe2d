//! Node configuration: file plus environment overrides.
//!
//! File: ./chunknet.toml, ~/.config/chunknet/config.toml, or
//! /etc/chunknet/config.toml (first match wins).
//! Env overrides: CHUNKNET_HOST_ADDR, CHUNKNET_PORT, CHUNKNET_GOSSIP_INTERVAL_SECS.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// This node's overlay-network address. Peers learn it from the peer
    /// directory, so it must be the address they can reach us on.
    pub host_addr: String,
    /// Fixed service port shared by every peer (default 8888).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory of files offered to other peers.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    /// Directory for part files and reassembled downloads.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Content index file (JSON object, filename -> entry).
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,
    /// Peer directory file (JSON array of addresses).
    #[serde(default = "default_peer_file")]
    pub peer_file: PathBuf,
    /// Chunk size used when indexing shared files (default 1 MiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Seconds between gossip cycles (default 180).
    #[serde(default = "default_gossip_interval_secs")]
    pub gossip_interval_secs: u64,
    /// Upper bound on concurrently handled inbound connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_port() -> u16 {
    8888
}
fn default_shared_dir() -> PathBuf {
    PathBuf::from("shared_files")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloaded_files")
}
fn default_index_file() -> PathBuf {
    PathBuf::from("local_index.json")
}
fn default_peer_file() -> PathBuf {
    PathBuf::from("known_peers.json")
}
fn default_chunk_size() -> u32 {
    1024 * 1024
}
fn default_gossip_interval_secs() -> u64 {
    180
}
fn default_max_connections() -> usize {
    64
}

impl Config {
    /// All defaults for the given local address.
    pub fn with_host(host_addr: impl Into<String>) -> Config {
        Config {
            host_addr: host_addr.into(),
            port: default_port(),
            shared_dir: default_shared_dir(),
            download_dir: default_download_dir(),
            index_file: default_index_file(),
            peer_file: default_peer_file(),
            chunk_size: default_chunk_size(),
            gossip_interval_secs: default_gossip_interval_secs(),
            max_connections: default_max_connections(),
        }
    }

    /// Load config: file (if present), then env overrides. Fails only when no
    /// host address is configured anywhere; everything else has a default.
    pub fn load() -> anyhow::Result<Config> {
        let cfg = load_file().context("failed to read config file")?;
        let cfg = match (cfg, std::env::var("CHUNKNET_HOST_ADDR").ok()) {
            (Some(mut c), Some(addr)) => {
                c.host_addr = addr;
                Some(c)
            }
            (None, Some(addr)) => Some(Config::with_host(addr)),
            (c, None) => c,
        };
        let mut cfg = cfg.context(
            "no host address configured: set host_addr in chunknet.toml or CHUNKNET_HOST_ADDR",
        )?;
        if let Ok(s) = std::env::var("CHUNKNET_PORT") {
            if let Some(p) = env_override("CHUNKNET_PORT", &s) {
                cfg.port = p;
            }
        }
        if let Ok(s) = std::env::var("CHUNKNET_GOSSIP_INTERVAL_SECS") {
            if let Some(v) = env_override("CHUNKNET_GOSSIP_INTERVAL_SECS", &s) {
                cfg.gossip_interval_secs = v;
            }
        }
        Ok(cfg)
    }

    /// Create the shared and download directories if absent.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.shared_dir).with_context(|| {
            format!("failed to create shared dir {}", self.shared_dir.display())
        })?;
        std::fs::create_dir_all(&self.download_dir).with_context(|| {
            format!("failed to create download dir {}", self.download_dir.display())
        })?;
        Ok(())
    }
}

/// Format a host + the fixed port for connect/bind, bracketing IPv6 hosts.
pub fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// A typo'd override must not fall back to the default silently.
fn env_override<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(name, value, "ignoring unparseable environment override");
            None
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = vec![PathBuf::from("chunknet.toml")];
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(home.join(".config/chunknet/config.toml"));
    }
    out.push(PathBuf::from("/etc/chunknet/config.toml"));
    out
}

fn load_file() -> anyhow::Result<Option<Config>> {
    for path in config_paths() {
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let cfg = parse_config(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            return Ok(Some(cfg));
        }
    }
    Ok(None)
}

fn parse_config(text: &str) -> anyhow::Result<Config> {
    toml::from_str(text).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = parse_config("host_addr = \"200:aa::1\"").unwrap();
        assert_eq!(cfg.port, 8888);
        assert_eq!(cfg.chunk_size, 1024 * 1024);
        assert_eq!(cfg.gossip_interval_secs, 180);
        assert_eq!(cfg.peer_file, PathBuf::from("known_peers.json"));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(parse_config("host_addr = \"x\"\nbogus = 1").is_err());
    }

    #[test]
    fn unparseable_override_is_dropped() {
        assert_eq!(env_override::<u16>("CHUNKNET_PORT", "8899"), Some(8899));
        assert_eq!(env_override::<u16>("CHUNKNET_PORT", "eight"), None);
        assert_eq!(env_override::<u64>("CHUNKNET_GOSSIP_INTERVAL_SECS", "-5"), None);
    }

    #[test]
    fn socket_addr_brackets_ipv6() {
        assert_eq!(socket_addr("200:aa::1", 8888), "[200:aa::1]:8888");
        assert_eq!(socket_addr("10.0.0.2", 8888), "10.0.0.2:8888");
    }
}

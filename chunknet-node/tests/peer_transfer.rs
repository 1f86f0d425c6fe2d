//! End-to-end exercises over loopback: a real server task, real sockets,
//! real part files.

use std::sync::Arc;

use chunknet_core::{hosted_hashes, ChunkDescriptor, UNKNOWN_COMMAND_REPLY};
use chunknet_node::config::Config;
use chunknet_node::net::{self, WireError};
use chunknet_node::server::Server;
use chunknet_node::store::{IndexStore, PeerStore};
use chunknet_node::{client, gossip, indexer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct Peer {
    _dir: tempfile::TempDir,
    cfg: Arc<Config>,
    index: Arc<IndexStore>,
    peers: Arc<PeerStore>,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
    port: u16,
}

/// Start a serving peer on an ephemeral loopback port with the given shared
/// files, indexed at `chunk_size`. `local_label` is the address the peer
/// advertises in its own directory.
async fn spawn_peer(local_label: &str, chunk_size: u32, files: &[(&str, &[u8])]) -> Peer {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::with_host("127.0.0.1");
    cfg.port = 0;
    cfg.chunk_size = chunk_size;
    cfg.shared_dir = dir.path().join("shared");
    cfg.download_dir = dir.path().join("downloads");
    cfg.index_file = dir.path().join("local_index.json");
    cfg.peer_file = dir.path().join("known_peers.json");
    cfg.ensure_dirs().unwrap();

    for (name, data) in files {
        std::fs::write(cfg.shared_dir.join(name), data).unwrap();
    }

    let cfg = Arc::new(cfg);
    let index = Arc::new(IndexStore::new(cfg.index_file.clone()));
    let peers = Arc::new(PeerStore::new(cfg.peer_file.clone(), local_label.to_string()));
    peers.init().await.unwrap();
    indexer::refresh_index(&cfg, &index).await.unwrap();

    let server = Server::bind(cfg.clone(), index.clone(), peers.clone())
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let server = tokio::spawn(server.run());
    Peer {
        _dir: dir,
        cfg,
        index,
        peers,
        server,
        port,
    }
}

/// A downloader config pointed at the peer's ephemeral port.
fn client_config(peer: &Peer) -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::with_host("127.0.0.1");
    cfg.port = peer.port;
    cfg.download_dir = dir.path().to_path_buf();
    (dir, cfg)
}

const CONTENT: &[u8] = b"0123456789abcdefghijXYZVW"; // 25 bytes, 3 chunks at size 10

#[tokio::test]
async fn download_reassembles_byte_for_byte() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (dir, cfg) = client_config(&peer);

    let path = client::download(&cfg, "127.0.0.1", "doc.bin").await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), CONTENT);
    // Part files are consumed during reassembly.
    for id in 0..3 {
        assert!(!dir.path().join(format!("doc.bin.part{id}")).exists());
    }
}

#[tokio::test]
async fn file_list_matches_index_shape() {
    let data = vec![7u8; 1536];
    let peer = spawn_peer("srv", 1024, &[("big.bin", &data)]).await;
    let (_dir, cfg) = client_config(&peer);

    let index = client::fetch_file_list(&cfg, "127.0.0.1").await.unwrap();
    assert_eq!(index.len(), 1);
    let entry = &index["big.bin"];
    assert_eq!(entry.total_size, 1536);
    assert_eq!(entry.chunks.len(), 2);
    entry.validate().unwrap();
}

#[tokio::test]
async fn file_list_failure_is_an_error_not_an_empty_map() {
    // Grab a port that is then closed again.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut cfg = Config::with_host("127.0.0.1");
    cfg.port = port;
    assert!(client::fetch_file_list(&cfg, "127.0.0.1").await.is_err());
}

#[tokio::test]
async fn second_fetch_resumes_without_the_server() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (_dir, cfg) = client_config(&peer);

    let index = client::fetch_file_list(&cfg, "127.0.0.1").await.unwrap();
    let descriptor = index["doc.bin"].chunks[0].clone();
    client::fetch_chunk(&cfg, "127.0.0.1", "doc.bin", &descriptor)
        .await
        .unwrap();

    // Kill the server; the valid part file alone must satisfy the retry.
    peer.server.abort();
    client::fetch_chunk(&cfg, "127.0.0.1", "doc.bin", &descriptor)
        .await
        .unwrap();
}

#[tokio::test]
async fn corrupted_bytes_are_rejected_and_part_deleted() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (dir, cfg) = client_config(&peer);

    let index = client::fetch_file_list(&cfg, "127.0.0.1").await.unwrap();
    let descriptor = index["doc.bin"].chunks[1].clone();

    // Same size, different bytes: the server streams the new content under
    // the old descriptor hash.
    std::fs::write(peer.cfg.shared_dir.join("doc.bin"), b"0123456789TAMPEREDijXYZVW").unwrap();

    let err = client::fetch_chunk(&cfg, "127.0.0.1", "doc.bin", &descriptor)
        .await
        .unwrap_err();
    assert!(matches!(err, client::DownloadError::HashMismatch { id: 1 }));
    assert!(!dir.path().join("doc.bin.part1").exists());
}

#[tokio::test]
async fn unknown_command_gets_exact_reply_and_close() {
    let peer = spawn_peer("srv", 10, &[]).await;
    let mut stream = net::connect("127.0.0.1", peer.port).await.unwrap();
    stream.write_all(b"MAKE_ME_A_SANDWICH").await.unwrap();

    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], UNKNOWN_COMMAND_REPLY.as_bytes());
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn absent_chunk_id_is_refused() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (_dir, cfg) = client_config(&peer);

    let descriptor = ChunkDescriptor {
        id: 99,
        offset: 0,
        size: 10,
        hash: "bogus".into(),
    };
    let err = client::fetch_chunk(&cfg, "127.0.0.1", "doc.bin", &descriptor)
        .await
        .unwrap_err();
    match err {
        client::DownloadError::Wire(WireError::Peer(reason)) => {
            assert_eq!(reason, "CHUNK_ID_NOT_FOUND");
        }
        other => panic!("expected peer refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn unindexed_filename_is_refused() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (_dir, cfg) = client_config(&peer);

    let descriptor = ChunkDescriptor {
        id: 0,
        offset: 0,
        size: 10,
        hash: "bogus".into(),
    };
    let err = client::fetch_chunk(&cfg, "127.0.0.1", "nope.bin", &descriptor)
        .await
        .unwrap_err();
    match err {
        client::DownloadError::Wire(WireError::Peer(reason)) => {
            assert_eq!(reason, "FILENAME_NOT_IN_INDEX");
        }
        other => panic!("expected peer refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn indexed_but_deleted_file_reports_consistency_fault() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (_dir, cfg) = client_config(&peer);

    let index = client::fetch_file_list(&cfg, "127.0.0.1").await.unwrap();
    let descriptor = index["doc.bin"].chunks[0].clone();
    std::fs::remove_file(peer.cfg.shared_dir.join("doc.bin")).unwrap();

    let err = client::fetch_chunk(&cfg, "127.0.0.1", "doc.bin", &descriptor)
        .await
        .unwrap_err();
    match err {
        client::DownloadError::Wire(WireError::Peer(reason)) => {
            assert_eq!(reason, "FILE_MISSING_ON_DISK");
        }
        other => panic!("expected consistency fault, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_index_file_is_distinct_from_missing_filename() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;
    let (_dir, cfg) = client_config(&peer);
    std::fs::remove_file(&peer.cfg.index_file).unwrap();

    let descriptor = ChunkDescriptor {
        id: 0,
        offset: 0,
        size: 10,
        hash: "bogus".into(),
    };
    let err = client::fetch_chunk(&cfg, "127.0.0.1", "doc.bin", &descriptor)
        .await
        .unwrap_err();
    match err {
        client::DownloadError::Wire(WireError::Peer(reason)) => {
            assert_eq!(reason, "INDEX_NOT_FOUND");
        }
        other => panic!("expected index-not-found, got {other:?}"),
    }
}

#[tokio::test]
async fn peer_list_exchange_teaches_both_sides() {
    // The peer advertises an overlay label distinct from its loopback bind.
    let peer = spawn_peer("200:aa::1", 10, &[]).await;
    let (_dir, cfg) = client_config(&peer);

    let list = gossip::exchange_peers(&cfg, "127.0.0.1").await.unwrap();
    // The reply includes the server's own address and the caller it just
    // learned (passive discovery).
    assert!(list.contains("200:aa::1"));
    assert!(list.contains("127.0.0.1"));

    // The server persisted the caller, deduplicated, local still present.
    let stored = peer.peers.load().await;
    assert_eq!(stored.len(), 2);
    assert!(stored.contains("200:aa::1"));
    assert!(stored.contains("127.0.0.1"));
}

#[tokio::test]
async fn gossip_loop_merges_and_stops_promptly() {
    let peer = spawn_peer("200:aa::1", 10, &[]).await;

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::with_host("127.0.0.1");
    cfg.port = peer.port;
    cfg.peer_file = dir.path().join("known_peers.json");
    // Long enough that only the stop signal can end the interval wait.
    cfg.gossip_interval_secs = 3600;
    let cfg = Arc::new(cfg);

    let local = Arc::new(PeerStore::new(cfg.peer_file.clone(), "200:bb::2".to_string()));
    local.init().await.unwrap();
    local.record("127.0.0.1").await.unwrap();

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(gossip::run_gossip(cfg.clone(), local.clone(), stop_rx));

    // The first cycle runs immediately; the server's advertised address must
    // land in our directory.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !local.load().await.contains("200:aa::1") {
        assert!(
            tokio::time::Instant::now() < deadline,
            "gossip never merged the peer's list"
        );
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }

    // Stopping must interrupt the interval wait, not ride it out.
    stop_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), task)
        .await
        .expect("gossip loop ignored the stop signal")
        .unwrap();

    // Directory invariants survived the merge: local present, no duplicates.
    let stored = local.load().await;
    assert!(stored.contains("200:bb::2"));
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn availability_report_lists_hosted_hashes() {
    let peer = spawn_peer("srv", 10, &[("doc.bin", CONTENT)]).await;

    let mut stream = net::connect("127.0.0.1", peer.port).await.unwrap();
    stream.write_all(b"REPORT_AVAILABILITY").await.unwrap();
    let payload = net::recv_payload(&mut stream, chunknet_core::PayloadKind::HashList)
        .await
        .unwrap();
    let reported: Vec<String> = serde_json::from_slice(&payload).unwrap();

    let index = peer.index.read().await.unwrap();
    assert_eq!(reported, hosted_hashes(&index));
    assert_eq!(reported.len(), 3);
}

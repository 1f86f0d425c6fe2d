//! Socket helpers for the one-command-per-connection exchange.
//!
//! Commands, headers, and acknowledgements are single small writes separated
//! by a request/response turn, so each is read with one `read` into a
//! header-sized buffer. Payloads are streamed and must be accumulated until
//! the announced length is reached; a short read mid-payload is normal, an
//! early close is a transfer failure.

use std::io;

use chunknet_core::{PayloadKind, ResponseHeader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config;

/// Max bytes of a command or header line.
const FRAME_BUF: usize = 1024;
/// Socket read granularity while streaming payloads.
pub const RECV_CHUNK: usize = 4096;
/// Acknowledgement payload; receivers accept any non-empty read.
pub const ACK: &[u8] = b"READY";

/// Failure talking to a peer.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("peer reported error: {0}")]
    Peer(String),
    #[error("unexpected response header: {0}")]
    UnexpectedHeader(String),
    #[error("connection closed {received} bytes into a {expected}-byte payload")]
    Truncated { expected: usize, received: usize },
}

/// Connect to a peer's fixed service port.
pub async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    TcpStream::connect(config::socket_addr(host, port)).await
}

/// Read one command/header/ack frame: a single read, decoded as trimmed
/// UTF-8. An empty read (peer closed) is `UnexpectedEof`.
pub async fn read_frame(stream: &mut TcpStream) -> io::Result<String> {
    let mut buf = [0u8; FRAME_BUF];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before frame",
        ));
    }
    let text = std::str::from_utf8(&buf[..n])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(text.trim().to_string())
}

/// Server side of the length-prefixed payload pattern: announce the size,
/// wait for the client's acknowledgement, then send the bytes.
pub async fn send_payload(
    stream: &mut TcpStream,
    kind: PayloadKind,
    payload: &[u8],
) -> io::Result<()> {
    stream
        .write_all(kind.header(payload.len()).as_bytes())
        .await?;
    read_frame(stream).await?; // any non-empty read counts as ready
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Client side: read the size header, acknowledge, then accumulate exactly
/// the announced number of bytes.
pub async fn recv_payload(
    stream: &mut TcpStream,
    expected: PayloadKind,
) -> Result<Vec<u8>, WireError> {
    let line = read_frame(stream).await?;
    let header = ResponseHeader::parse(&line)
        .map_err(|_| WireError::UnexpectedHeader(line.clone()))?;
    let len = match header {
        ResponseHeader::Payload { kind, len } if kind == expected => len,
        ResponseHeader::Error(reason) => return Err(WireError::Peer(reason)),
        _ => return Err(WireError::UnexpectedHeader(line)),
    };
    stream.write_all(ACK).await?;

    let mut payload = Vec::with_capacity(len);
    let mut buf = [0u8; RECV_CHUNK];
    while payload.len() < len {
        let want = (len - payload.len()).min(RECV_CHUNK);
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(WireError::Truncated {
                expected: len,
                received: payload.len(),
            });
        }
        payload.extend_from_slice(&buf[..n]);
    }
    Ok(payload)
}

//! Wire grammar: text commands, response headers, and error reasons.
//!
//! Every exchange is one command per connection. Responses are either a
//! length-prefixed JSON payload (`<KIND>_SIZE:<len>` header, acknowledgement,
//! then exactly `<len>` bytes), a chunk stream (`CHUNK_READY:<id>:<size>:<hash>`
//! header, acknowledgement, then exactly `<size>` raw bytes), or an
//! `ERROR: <REASON>` line with no payload.

/// Reply sent for any command the server does not recognize.
pub const UNKNOWN_COMMAND_REPLY: &str = "ERROR: Unknown command.";

/// A client request, one per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FileList,
    Chunk { filename: String, chunk_id: u32 },
    PeerList,
    Availability,
}

impl Command {
    /// Parse a received command line. `None` means the unknown-command reply
    /// should be sent; a `REQUEST_CHUNK` with a malformed id falls in here too.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        match line {
            "REQUEST_FILE_LIST" => Some(Command::FileList),
            "REQUEST_PEER_LIST" => Some(Command::PeerList),
            "REPORT_AVAILABILITY" => Some(Command::Availability),
            _ => {
                let rest = line.strip_prefix("REQUEST_CHUNK:")?;
                // Id is after the last colon so filenames containing ':' parse.
                let (filename, id) = rest.rsplit_once(':')?;
                let chunk_id = id.parse().ok()?;
                if filename.is_empty() {
                    return None;
                }
                Some(Command::Chunk {
                    filename: filename.to_string(),
                    chunk_id,
                })
            }
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::FileList => "REQUEST_FILE_LIST".to_string(),
            Command::Chunk { filename, chunk_id } => {
                format!("REQUEST_CHUNK:{filename}:{chunk_id}")
            }
            Command::PeerList => "REQUEST_PEER_LIST".to_string(),
            Command::Availability => "REPORT_AVAILABILITY".to_string(),
        }
    }
}

/// Which JSON payload a `<KIND>_SIZE` header announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    FileList,
    PeerList,
    HashList,
}

impl PayloadKind {
    fn prefix(self) -> &'static str {
        match self {
            PayloadKind::FileList => "LIST",
            PayloadKind::PeerList => "PEER_LIST",
            PayloadKind::HashList => "HASH_LIST",
        }
    }

    /// Header announcing a payload of `len` bytes, e.g. `LIST_SIZE:42`.
    pub fn header(self, len: usize) -> String {
        format!("{}_SIZE:{len}", self.prefix())
    }
}

/// Header announcing a raw chunk stream of exactly `size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: u32,
    pub size: u32,
    pub hash: String,
}

impl ChunkHeader {
    pub fn encode(&self) -> String {
        format!("CHUNK_READY:{}:{}:{}", self.id, self.size, self.hash)
    }
}

/// Typed server error reasons, sent as `ERROR: <REASON>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    FileNotFound,
    IndexNotFound,
    FilenameNotInIndex,
    ChunkIdNotFound,
    /// Index references a file absent from disk: a consistency fault,
    /// deliberately distinct from the not-found reasons.
    FileMissingOnDisk,
    InternalServerError,
}

impl ErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::FileNotFound => "FILE_NOT_FOUND",
            ErrorReason::IndexNotFound => "INDEX_NOT_FOUND",
            ErrorReason::FilenameNotInIndex => "FILENAME_NOT_IN_INDEX",
            ErrorReason::ChunkIdNotFound => "CHUNK_ID_NOT_FOUND",
            ErrorReason::FileMissingOnDisk => "FILE_MISSING_ON_DISK",
            ErrorReason::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn encode(self) -> String {
        format!("ERROR: {}", self.as_str())
    }
}

/// First line the client reads back after sending a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHeader {
    Payload { kind: PayloadKind, len: usize },
    Chunk(ChunkHeader),
    /// `ERROR: <reason>`; the reason text is kept verbatim for reporting.
    Error(String),
}

/// Error parsing a server response header.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unrecognized response header: {0:?}")]
pub struct HeaderParseError(pub String);

impl ResponseHeader {
    pub fn parse(line: &str) -> Result<ResponseHeader, HeaderParseError> {
        let line = line.trim();
        if let Some(reason) = line.strip_prefix("ERROR: ") {
            return Ok(ResponseHeader::Error(reason.to_string()));
        }
        if let Some(rest) = line.strip_prefix("CHUNK_READY:") {
            let mut parts = rest.splitn(3, ':');
            let id = parts.next().and_then(|s| s.parse().ok());
            let size = parts.next().and_then(|s| s.parse().ok());
            let hash = parts.next();
            if let (Some(id), Some(size), Some(hash)) = (id, size, hash) {
                return Ok(ResponseHeader::Chunk(ChunkHeader {
                    id,
                    size,
                    hash: hash.to_string(),
                }));
            }
            return Err(HeaderParseError(line.to_string()));
        }
        for kind in [
            PayloadKind::PeerList,
            PayloadKind::HashList,
            PayloadKind::FileList,
        ] {
            let prefix = format!("{}_SIZE:", kind.prefix());
            if let Some(len) = line.strip_prefix(&prefix) {
                let len = len
                    .parse()
                    .map_err(|_| HeaderParseError(line.to_string()))?;
                return Ok(ResponseHeader::Payload { kind, len });
            }
        }
        Err(HeaderParseError(line.to_string()))
    }
}

//! Chunk integrity: SHA-256 digests, hex-encoded as stored in the index.

use sha2::{Digest, Sha256};

/// Hash a complete chunk payload.
pub fn hash_bytes(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Verify a payload against the hex digest recorded in a descriptor.
pub fn verify(payload: &[u8], expected: &str) -> bool {
    hash_bytes(payload) == expected
}

/// Incremental hasher for payloads that arrive in socket-sized pieces.
#[derive(Default)]
pub struct ChunkHasher(Sha256);

impl ChunkHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256() {
        // SHA-256 of the empty string.
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_roundtrip() {
        let payload = b"hello chunk";
        assert!(verify(payload, &hash_bytes(payload)));
    }

    #[test]
    fn verify_rejects_tampered() {
        let hash = hash_bytes(b"hello chunk");
        assert!(!verify(b"hello chunk!", &hash));
    }

    #[test]
    fn incremental_matches_one_shot() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let mut hasher = ChunkHasher::new();
        for piece in payload.chunks(7) {
            hasher.update(piece);
        }
        assert_eq!(hasher.finish(), hash_bytes(&payload));
    }
}

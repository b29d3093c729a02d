use sha2::{Digest, Sha256};

/// Lower-case hex SHA-256 of a payload; the deduplication key of a snapshot.
pub fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"[]").len(), 64);
        assert_ne!(content_hash(b"[1]"), content_hash(b"[2]"));
    }
}

//! Content-addressed cache keys.
//!
//! A key is `hex(SHA-256(raw_bytes || decimal(top_k)))`. The raw upload is
//! hashed rather than the decoded pixels, so a cache hit never pays for a
//! decode. Re-encoded copies of the same picture are distinct keys.

use std::fmt;

use sha2::{Digest, Sha256};

/// Fixed-length (64 lowercase hex characters) digest identifying a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// The full 64-character lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the cache key for an upload and its `top_k` parameter.
pub fn fingerprint(raw_bytes: &[u8], top_k: usize) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(raw_bytes);
    hasher.update(top_k.to_string().as_bytes());
    CacheKey(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_key() {
        let bytes = b"\xff\xd8\xff\xe0 some jpeg";
        assert_eq!(fingerprint(bytes, 5), fingerprint(bytes, 5));
    }

    #[test]
    fn key_is_fixed_width_lowercase_hex() {
        for input in [&b""[..], b"a", &[0u8; 4096][..]] {
            let key = fingerprint(input, 3);
            assert_eq!(key.as_str().len(), 64);
            assert!(
                key.as_str()
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            );
        }
    }

    #[test]
    fn different_bytes_produce_different_keys() {
        assert_ne!(fingerprint(b"image-a", 5), fingerprint(b"image-b", 5));
    }

    #[test]
    fn different_top_k_produce_different_keys() {
        assert_ne!(fingerprint(b"image", 1), fingerprint(b"image", 2));
        assert_ne!(fingerprint(b"image", 5), fingerprint(b"image", 10));
    }

    #[test]
    fn matches_sha256_of_concatenation() {
        // sha256("abc5")
        assert_eq!(
            fingerprint(b"abc", 5).as_str(),
            format!("{:x}", Sha256::digest(b"abc5"))
        );
    }

    #[test]
    fn short_prefix() {
        let key = fingerprint(b"x", 1);
        assert_eq!(key.short(), &key.as_str()[..8]);
    }
}

//! Chunk planning and hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A chunk hash (SHA-256 of the compressed chunk bytes).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkHash(String);

impl ChunkHash {
    /// Compute the hash of chunk data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Encode as a hex string.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Verify that `data` hashes to this value.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.0[..16])
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that an artifact name is safe to embed in file names and queries.
///
/// Names are restricted to ASCII alphanumerics plus `.`, `_`, and `-`, so a
/// name can never smuggle in a path separator.
pub fn validate_artifact_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.len() > 200 {
        return Err(crate::Error::InvalidArtifactName(name.to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(crate::Error::InvalidArtifactName(name.to_string()));
    }
    Ok(())
}

/// One planned window of an artifact file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Zero-based position within the artifact.
    pub index: u32,
    /// Byte offset into the artifact file.
    pub offset: u64,
    /// Exact number of bytes this window covers.
    pub len: u64,
}

/// Plan the fixed-size windows covering an artifact of `total_len` bytes.
///
/// Every window is exactly `window_size` bytes except the last, which covers
/// the remainder. A zero-byte artifact yields a single empty window so that
/// metadata rows exist for it and restore round-trips.
pub fn plan_chunks(total_len: u64, window_size: u64) -> Vec<ChunkPlan> {
    assert!(window_size > 0, "window size must be positive");
    if total_len == 0 {
        return vec![ChunkPlan {
            index: 0,
            offset: 0,
            len: 0,
        }];
    }
    let count = total_len.div_ceil(window_size);
    (0..count)
        .map(|i| {
            let offset = i * window_size;
            ChunkPlan {
                index: i as u32,
                offset,
                len: window_size.min(total_len - offset),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_hash_roundtrip() {
        let hash = ChunkHash::compute(b"test");
        let parsed = ChunkHash::from_hex(hash.as_hex()).unwrap();
        assert_eq!(hash, parsed);
        assert!(hash.verify(b"test"));
        assert!(!hash.verify(b"other"));
        assert!(ChunkHash::from_hex("not-a-hash").is_err());
    }

    #[test]
    fn test_artifact_name_validation() {
        assert!(validate_artifact_name("wikipedia-2024.db").is_ok());
        assert!(validate_artifact_name("").is_err());
        assert!(validate_artifact_name("../escape").is_err());
        assert!(validate_artifact_name("a/b").is_err());
        assert!(validate_artifact_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_plan_exact_multiple() {
        let plans = plan_chunks(100, 25);
        assert_eq!(plans.len(), 4);
        assert!(plans.iter().all(|p| p.len == 25));
        assert_eq!(plans[3].offset, 75);
    }

    #[test]
    fn test_plan_short_tail() {
        let plans = plan_chunks(25 * 1024 * 1024, 10 * 1024 * 1024);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].len, 10 * 1024 * 1024);
        assert_eq!(plans[1].len, 10 * 1024 * 1024);
        assert_eq!(plans[2].len, 5 * 1024 * 1024);
    }

    #[test]
    fn test_plan_empty_artifact_single_window() {
        let plans = plan_chunks(0, 1024);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].len, 0);
    }

    #[test]
    fn test_plan_single_byte() {
        let plans = plan_chunks(1, 1024);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].len, 1);
    }
}

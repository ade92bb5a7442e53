//! Database models mapping to the chunk schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Sentinel `total_chunks` value written while an upload is in flight.
///
/// Every row carries this until the writer finalizes the true count; a
/// crash before finalization therefore leaves the artifact visibly
/// incomplete rather than silently usable.
pub const TOTAL_CHUNKS_PENDING: i32 = -1;

/// One chunk row: an independently compressed slice of one artifact.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub artifact_name: String,
    /// Zero-based position within the artifact.
    pub chunk_index: i32,
    /// One complete zstd frame; decompressible without any other row.
    pub chunk_data: Vec<u8>,
    /// SHA-256 hex of `chunk_data`.
    pub chunk_hash: String,
    /// Decompressed length of this chunk.
    pub uncompressed_size: i64,
    /// Final chunk count, or [`TOTAL_CHUNKS_PENDING`] while uploading.
    pub total_chunks: i32,
    pub created_at: OffsetDateTime,
}

/// Artifact-level metadata derived from the chunk rows.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    /// Number of rows currently present.
    pub chunks_present: u64,
    /// Recorded total count; [`TOTAL_CHUNKS_PENDING`] if any row is unfinalized.
    pub total_chunks: i32,
    /// Sum of compressed sizes in bytes (reporting only, not the artifact size).
    pub total_size: u64,
    /// Sum of recorded decompressed sizes; the artifact's true byte size.
    pub artifact_size: u64,
    /// Most recent row timestamp; drives artifact-level freshness.
    pub updated_at: OffsetDateTime,
}

impl ArtifactMeta {
    /// Whether the row set matches the recorded total.
    ///
    /// Necessary but not sufficient for validity; content corruption is
    /// checked separately after restore.
    pub fn is_complete(&self) -> bool {
        self.total_chunks >= 0 && self.chunks_present == self.total_chunks as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(present: u64, total: i32) -> ArtifactMeta {
        ArtifactMeta {
            chunks_present: present,
            total_chunks: total,
            total_size: 0,
            artifact_size: 0,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_completeness() {
        assert!(meta(3, 3).is_complete());
        assert!(!meta(2, 3).is_complete());
        assert!(!meta(3, TOTAL_CHUNKS_PENDING).is_complete());
        // More rows than recorded is also not complete (duplicated/stale mix).
        assert!(!meta(4, 3).is_complete());
    }
}

//! Per-chunk zstd compression.
//!
//! Each chunk is a self-contained zstd frame, so any chunk can be
//! decompressed without its neighbours.

use async_compression::tokio::write::{ZstdDecoder, ZstdEncoder};
use tokio::io::AsyncWriteExt;

/// Compress a single chunk into an independent zstd frame.
pub async fn compress_chunk(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZstdEncoder::new(Vec::new());
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(encoder.into_inner())
}

/// Decompress a single zstd frame back into chunk bytes.
pub async fn decompress_chunk(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZstdDecoder::new(Vec::new());
    decoder.write_all(data).await?;
    decoder.shutdown().await?;
    Ok(decoder.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let data = b"hello hello hello hello hello".repeat(100);
        let compressed = compress_chunk(&data).await.unwrap();
        assert!(compressed.len() < data.len());
        let restored = decompress_chunk(&compressed).await.unwrap();
        assert_eq!(restored, data);
    }

    #[tokio::test]
    async fn test_empty_chunk_roundtrip() {
        let compressed = compress_chunk(b"").await.unwrap();
        let restored = decompress_chunk(&compressed).await.unwrap();
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn test_frames_are_independent() {
        let a = compress_chunk(b"first chunk").await.unwrap();
        let b = compress_chunk(b"second chunk").await.unwrap();
        // Decompressing b alone must not depend on having seen a.
        assert_eq!(decompress_chunk(&b).await.unwrap(), b"second chunk");
        assert_eq!(decompress_chunk(&a).await.unwrap(), b"first chunk");
    }
}

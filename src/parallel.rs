//! Parallel chunk orchestration for `HUF_PAR` containers
//!
//! Input is split into fixed-size chunks, each compressed on its own into a
//! complete `HUF2` frame with its own tree. Rayon's indexed collect is the
//! gather point: results land in chunk order regardless of completion order,
//! and the first failing chunk aborts the whole container.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::debug;

use crate::error::CompressError;
use crate::frame::{self, Frame, FrameKind, MAGIC_PARALLEL};

/// Run `op` on a pool of `threads` workers, or on the global pool when `threads == 0`.
fn with_pool<T, F>(threads: usize, op: F) -> Result<T, CompressError>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    if threads == 0 {
        return Ok(op());
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| CompressError::CompressionFailed(format!("thread pool: {e}")))?;
    Ok(pool.install(op))
}

pub fn compress(data: &[u8], chunk_size: usize, threads: usize) -> Result<Vec<u8>, CompressError> {
    if chunk_size == 0 {
        return Err(CompressError::InvalidInput("chunk size must be non-zero".into()));
    }
    if data.is_empty() {
        return Ok(frame::encode_empty());
    }

    let chunk_count = data.len().div_ceil(chunk_size);
    debug!(input = data.len(), chunk_size, chunk_count, threads, "compressing chunks");
    let blobs = with_pool(threads, || {
        data.par_chunks(chunk_size)
            .map(frame::encode_huffman)
            .collect::<Result<Vec<_>, _>>()
    })??;

    write_container(&blobs)
}

/// Assemble the container: magic, chunk count, per-chunk sizes, chunk bytes.
pub fn write_container(chunks: &[Vec<u8>]) -> Result<Vec<u8>, CompressError> {
    let count = u32::try_from(chunks.len())
        .map_err(|_| {
            CompressError::CompressionFailed(format!("{} chunks exceed u32", chunks.len()))
        })?;
    let body: usize = chunks.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(MAGIC_PARALLEL.len() + 4 + chunks.len() * 4 + body);
    out.extend_from_slice(MAGIC_PARALLEL);
    out.extend_from_slice(&count.to_le_bytes());
    for (i, chunk) in chunks.iter().enumerate() {
        let size = u32::try_from(chunk.len()).map_err(|_| {
            CompressError::CompressionFailed(format!(
                "chunk {i} of {} bytes exceeds u32",
                chunk.len()
            ))
        })?;
        out.extend_from_slice(&size.to_le_bytes());
    }
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    Ok(out)
}

/// Decode container chunks concurrently and concatenate them in index order.
pub(crate) fn decode_chunks(chunks: &[&[u8]], threads: usize) -> Result<Vec<u8>, CompressError> {
    let decoded = with_pool(threads, || {
        chunks
            .par_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let parsed = Frame::parse(chunk)?;
                match parsed.kind() {
                    Some(FrameKind::Huffman) | None => parsed.decode(0),
                    Some(kind) => Err(CompressError::CorruptHeader(format!(
                        "chunk {i} is a {kind:?} frame, expected HUF2"
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()
    })??;

    let total = decoded.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for part in decoded {
        out.extend_from_slice(&part);
    }
    debug!(chunks = chunks.len(), output = out.len(), "decoded chunks");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_many_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8 ^ (i / 97) as u8).collect();
        let container = compress(&data, 1024, 4).unwrap();
        assert!(container.starts_with(MAGIC_PARALLEL));
        assert_eq!(u32::from_le_bytes(container[7..11].try_into().unwrap()), 10);
        assert_eq!(frame::decode(&container).unwrap(), data);
    }

    #[test]
    fn test_chunk_sizes_demarcate_frames() {
        let data = b"chunk one! chunk two? chunk three.".to_vec();
        let container = compress(&data, 11, 0).unwrap();
        let Frame::Parallel(chunks) = Frame::parse(&container).unwrap() else {
            panic!("expected parallel frame");
        };
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.starts_with(b"HUF2")));
        assert_eq!(frame::decode(chunks[3]).unwrap(), b".");
    }

    #[test]
    fn test_single_chunk_and_empty() {
        let data = b"small input".to_vec();
        let container = compress(&data, 1 << 20, 0).unwrap();
        assert_eq!(frame::decode(&container).unwrap(), data);
        assert_eq!(compress(b"", 16, 0).unwrap(), frame::encode_empty());
        assert!(compress(&data, 0, 0).is_err());
    }

    #[test]
    fn test_corrupt_chunk_aborts() {
        let data = vec![b'z'; 4096];
        let mut container = compress(&data, 1024, 2).unwrap();
        let last = container.len() - 1;
        container[last] ^= 0x80;
        assert!(matches!(
            frame::decode(&container),
            Err(CompressError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_nested_container_rejected() {
        let inner = compress(b"nested", 2, 0).unwrap();
        let outer = write_container(&[inner]).unwrap();
        assert!(matches!(frame::decode(&outer), Err(CompressError::CorruptHeader(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut container = compress(b"trailing", 4, 0).unwrap();
        container.push(0);
        assert!(matches!(frame::decode(&container), Err(CompressError::CorruptHeader(_))));
    }
}

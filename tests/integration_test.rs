//! Integration tests for huffpack

use huffpack::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const ALL_METHODS: [CompressionMethod; 5] = [
    CompressionMethod::Huffman,
    CompressionMethod::Hybrid,
    CompressionMethod::Parallel,
    CompressionMethod::Legacy,
    CompressionMethod::Auto,
];

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Skewed text-like data: mostly a few letters, occasionally anything.
fn skewed_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| match rng.gen_range(0..10) {
            0..=5 => b'e',
            6..=7 => b't',
            8 => b' ',
            _ => rng.gen(),
        })
        .collect()
}

#[test]
fn test_full_lifecycle() -> anyhow::Result<()> {
    let compressor = Compressor::default();
    let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
    let compressed = compressor.compress(&data, CompressionMethod::Auto)?;
    assert!(compressed.len() < data.len());
    assert_eq!(compressor.decompress(&compressed)?, data);
    Ok(())
}

#[test]
fn test_all_methods_roundtrip() -> anyhow::Result<()> {
    let settings = CompressionSettings {
        chunk_size: 4096,
        ..CompressionSettings::default()
    };
    let compressor = Compressor::new(settings);
    let inputs: Vec<Vec<u8>> = vec![
        Vec::new(),
        vec![b'A'],
        (0..=255).collect(),
        b"abababababababababababab".repeat(40),
        random_bytes(7, 10_000),
        skewed_bytes(11, 20_000),
    ];

    for method in ALL_METHODS {
        for data in &inputs {
            let compressed = compressor.compress(data, method)?;
            let decompressed = compressor.decompress(&compressed)?;
            assert_eq!(
                &decompressed,
                data,
                "roundtrip failed for {method:?} on {} bytes",
                data.len()
            );
        }
    }
    Ok(())
}

#[test]
fn test_encode_without_fallback_roundtrips() -> anyhow::Result<()> {
    let compressor = Compressor::default();
    for data in [vec![b'A'], random_bytes(3, 2_000), vec![0u8; 5_000]] {
        for method in ALL_METHODS {
            let frame = compressor.encode(&data, method)?;
            assert_ne!(FrameKind::sniff(&frame), Some(FrameKind::Stored));
            assert_eq!(compressor.decompress(&frame)?, data);
        }
    }
    Ok(())
}

#[test]
fn test_single_byte_frame() -> anyhow::Result<()> {
    let frame = frame::encode_huffman(b"A")?;
    assert_eq!(FrameKind::sniff(&frame), Some(FrameKind::Huffman));
    // magic + lengths + symbol count + crc + one padded byte
    assert_eq!(frame.len(), 4 + 256 + 8 + 4 + 1);
    assert_eq!(frame[4 + b'A' as usize], 1);
    assert_eq!(frame::decode(&frame)?, b"A");
    Ok(())
}

#[test]
fn test_large_data() -> anyhow::Result<()> {
    let compressor = Compressor::default();
    let data = vec![0xABu8; 100_000];
    let out = compressor.compress_bytes(&data, CompressionMethod::Auto);
    assert!(out.report.success);
    assert!(out.report.ratio < 0.5, "large uniform data should compress well");
    assert_eq!(compressor.decompress(&out.data)?, data);
    Ok(())
}

#[test]
fn test_incompressible_data_is_stored() -> anyhow::Result<()> {
    let compressor = Compressor::default();
    let data = random_bytes(42, 50_000);
    let compressed = compressor.compress(&data, CompressionMethod::Huffman)?;
    assert_eq!(FrameKind::sniff(&compressed), Some(FrameKind::Stored));
    assert_eq!(compressed.len(), data.len() + 12);
    assert_eq!(compressor.decompress(&compressed)?, data);
    Ok(())
}

#[test]
fn test_parallel_matches_sequential_content() -> anyhow::Result<()> {
    let data = skewed_bytes(5, 300_000);
    let one_thread = parallel::compress(&data, 64 * 1024, 1)?;
    let four_threads = parallel::compress(&data, 64 * 1024, 4)?;
    assert_eq!(one_thread, four_threads, "container must not depend on scheduling");
    assert_eq!(frame::decode(&four_threads)?, data);
    Ok(())
}

#[test]
fn test_payload_bit_flip_detected() -> anyhow::Result<()> {
    let data = skewed_bytes(9, 10_000);
    let mut compressed = frame::encode_huffman(&data)?;
    let mid = 272 + (compressed.len() - 272) / 2;
    compressed[mid] ^= 0x10;
    let err = frame::decode(&compressed).unwrap_err();
    assert!(matches!(err, CompressError::ChecksumMismatch { .. }), "got {err}");
    Ok(())
}

#[test]
fn test_garbage_and_truncated_input() -> anyhow::Result<()> {
    let compressor = Compressor::default();
    assert!(matches!(
        compressor.decompress(b"NOPE, not a frame"),
        Err(CompressError::InvalidMagic(_))
    ));
    let compressed = frame::encode_huffman(&skewed_bytes(1, 1_000))?;
    for cut in [3, 100, 270] {
        assert!(compressor.decompress(&compressed[..cut]).is_err(), "cut at {cut}");
    }
    Ok(())
}

#[test]
fn test_settings_from_json() -> anyhow::Result<()> {
    let settings =
        CompressionSettings::from_json(r#"{"level": 9, "chunk_size": 2048, "verbose": true}"#)?;
    assert_eq!(settings.chunk_size, 2048);
    assert!(settings.verbose);
    let compressor = Compressor::new(settings);
    let data = skewed_bytes(2, 10_000);
    let compressed = compressor.compress(&data, CompressionMethod::Parallel)?;
    assert_eq!(compressor.decompress(&compressed)?, data);

    assert!(CompressionSettings::from_json(r#"{"store_threshold": 1.5}"#).is_err());
    Ok(())
}

#[test]
fn test_file_roundtrip() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.txt");
    let packed = dir.path().join("input.huf");
    let restored = dir.path().join("restored.txt");
    let data = b"file level round trip with some repeated text ".repeat(100);
    std::fs::write(&input, &data)?;

    let compressor = Compressor::default();
    let report = compressor.compress_file(&input, &packed, CompressionMethod::Auto);
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.original_size, data.len() as u64);
    assert_eq!(compressed_file_size(&packed)?, report.compressed_size);
    assert!(is_valid_compressed_file(&packed));
    assert!(!is_valid_compressed_file(&input));

    let report = compressor.decompress_file(&packed, &restored);
    assert!(report.success, "{:?}", report.error);
    assert_eq!(std::fs::read(&restored)?, data);
    assert_eq!(report.original_checksum, checksum::calculate(&data));
    Ok(())
}

#[test]
fn test_missing_file_reports_failure() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let missing = dir.path().join("missing.bin");
    let compressor = Compressor::default();

    let report =
        compressor.compress_file(&missing, dir.path().join("out"), CompressionMethod::Huffman);
    assert!(!report.success);
    assert!(report.error.unwrap_or_default().contains("not found"));
    assert!(matches!(compressed_file_size(&missing), Err(CompressError::NotFound(_))));
    assert!(!is_valid_compressed_file(&missing));
    Ok(())
}

#[test]
fn test_version() {
    assert_eq!(version(), env!("CARGO_PKG_VERSION"));
}

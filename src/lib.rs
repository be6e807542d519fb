//! huffpack: canonical Huffman compression with an optional LZ77 pre-pass.
//!
//! Layers, leaf first:
//! - `bitstream` / `checksum` for bit-exact I/O and CRC-32 integrity
//! - `lz77` and `huffman` for tokenization and code construction
//! - `frame` for the on-disk byte layouts and `parallel` for chunked containers
//! - `archive` for multi-file HFAR archives
//!
//! `Compressor` is the buffer, stream and file entry point. Its `*_bytes`,
//! `*_stream` and `*_file` methods never fail outright; they return a
//! `CompressionReport` so batch callers can carry on after a bad input.

pub mod archive;
pub mod bitstream;
pub mod checksum;
pub mod config;
pub mod error;
pub mod frame;
pub mod huffman;
pub mod lz77;
pub mod parallel;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

pub use crate::archive::{ArchiveHeader, ArchiveMetadata, Archiver, FileEntry};
pub use crate::config::{CompressionSettings, Mode};
pub use crate::error::CompressError;
pub use crate::frame::FrameKind;

/// Compression method selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompressionMethod {
    Huffman,
    Hybrid,
    Parallel,
    Legacy,
    Auto,
}

/// Outcome of a boundary-level compress or decompress call.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CompressionReport {
    pub success: bool,
    pub error: Option<String>,
    pub original_size: u64,
    pub compressed_size: u64,
    /// compressed / original, 0 for empty input
    pub ratio: f64,
    pub elapsed_ms: f64,
    pub original_checksum: u32,
    pub compressed_checksum: u32,
    pub format: Option<FrameKind>,
    pub entropy_bits: f64,
}

impl CompressionReport {
    fn completed(original: &[u8], compressed: &[u8], start: Instant) -> Self {
        let ratio = if original.is_empty() {
            0.0
        } else {
            compressed.len() as f64 / original.len() as f64
        };
        Self {
            success: true,
            error: None,
            original_size: original.len() as u64,
            compressed_size: compressed.len() as u64,
            ratio,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            original_checksum: checksum::calculate(original),
            compressed_checksum: checksum::calculate(compressed),
            format: FrameKind::sniff(compressed),
            entropy_bits: shannon_entropy(original),
        }
    }

    fn failed(op: &str, error: CompressError, start: Instant) -> Self {
        warn!(%error, "{op} failed");
        Self {
            success: false,
            error: Some(error.to_string()),
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            ..Self::default()
        }
    }
}

/// Bytes plus the report describing how they were produced.
#[derive(Debug, Clone)]
pub struct CodecOutput {
    pub data: Vec<u8>,
    pub report: CompressionReport,
}

/// The main compressor engine
#[derive(Debug, Clone, Default)]
pub struct Compressor {
    settings: CompressionSettings,
}

impl Compressor {
    /// Create a new compressor with the given settings
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    pub fn from_level(level: u32) -> Self {
        Self::new(CompressionSettings::from_level(level))
    }

    pub fn settings(&self) -> &CompressionSettings {
        &self.settings
    }

    /// Produce a frame with the given method, without the store fallback.
    pub fn encode(&self, data: &[u8], method: CompressionMethod) -> Result<Vec<u8>, CompressError> {
        let s = &self.settings;
        match method {
            CompressionMethod::Huffman => frame::encode_huffman(data),
            CompressionMethod::Hybrid => {
                frame::encode_hybrid(data, s.lz77_window, s.lz77_lookahead)
            }
            CompressionMethod::Legacy => frame::encode_legacy(data),
            CompressionMethod::Parallel => parallel::compress(data, s.chunk_size, s.threads),
            CompressionMethod::Auto => {
                if s.block_size > 0 && data.len() > s.block_size {
                    return parallel::compress(data, s.block_size, s.threads);
                }
                let plain = frame::encode_huffman(data)?;
                if s.extra_passes == 0 {
                    return Ok(plain);
                }
                let hybrid = frame::encode_hybrid(data, s.lz77_window, s.lz77_lookahead)?;
                debug!(
                    plain = plain.len(),
                    hybrid = hybrid.len(),
                    "extra pass compared hybrid frame"
                );
                Ok(if hybrid.len() < plain.len() { hybrid } else { plain })
            }
        }
    }

    /// Compress data, falling back to a `STOR` frame when compression does not pay off.
    pub fn compress(
        &self,
        data: &[u8],
        method: CompressionMethod,
    ) -> Result<Vec<u8>, CompressError> {
        self.settings.validate()?;
        let encoded = self.encode(data, method)?;

        let stored = self.settings.store_fallback
            && !data.is_empty()
            && !self.settings.pays_off(encoded.len(), data.len());
        let out = if stored { frame::encode_stored(data) } else { encoded };

        if self.settings.verbose {
            info!(
                level = self.settings.level,
                mode = ?self.settings.mode,
                ?method,
                input = data.len(),
                output = out.len(),
                distinct = huffman::frequencies(data).iter().filter(|&&f| f > 0).count(),
                stored,
                "compressed"
            );
        } else {
            debug!(?method, input = data.len(), output = out.len(), stored, "compressed");
        }
        Ok(out)
    }

    /// Decompress any supported frame.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        let parsed = frame::Frame::parse(data)?;
        let out = parsed.decode(self.settings.threads)?;
        debug!(format = ?parsed.kind(), input = data.len(), output = out.len(), "decompressed");
        Ok(out)
    }

    pub fn compress_bytes(&self, data: &[u8], method: CompressionMethod) -> CodecOutput {
        let start = Instant::now();
        match self.compress(data, method) {
            Ok(out) => CodecOutput {
                report: CompressionReport::completed(data, &out, start),
                data: out,
            },
            Err(e) => CodecOutput {
                data: Vec::new(),
                report: CompressionReport::failed("compression", e, start),
            },
        }
    }

    pub fn decompress_bytes(&self, data: &[u8]) -> CodecOutput {
        let start = Instant::now();
        match self.decompress(data) {
            Ok(out) => CodecOutput {
                report: CompressionReport::completed(&out, data, start),
                data: out,
            },
            Err(e) => CodecOutput {
                data: Vec::new(),
                report: CompressionReport::failed("decompression", e, start),
            },
        }
    }

    pub fn compress_stream<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        method: CompressionMethod,
    ) -> CompressionReport {
        let start = Instant::now();
        let result = read_stream(input).and_then(|data| {
            let out = self.compress(&data, method)?;
            write_stream(output, &out)?;
            Ok((data, out))
        });
        match result {
            Ok((data, out)) => CompressionReport::completed(&data, &out, start),
            Err(e) => CompressionReport::failed("stream compression", e, start),
        }
    }

    pub fn decompress_stream<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> CompressionReport {
        let start = Instant::now();
        let result = read_stream(input).and_then(|data| {
            let out = self.decompress(&data)?;
            write_stream(output, &out)?;
            Ok((data, out))
        });
        match result {
            Ok((data, out)) => CompressionReport::completed(&out, &data, start),
            Err(e) => CompressionReport::failed("stream decompression", e, start),
        }
    }

    pub fn compress_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        method: CompressionMethod,
    ) -> CompressionReport {
        let start = Instant::now();
        let (input, output) = (input.as_ref(), output.as_ref());
        let result = fs::read(input)
            .map_err(|e| CompressError::read(input, e))
            .and_then(|data| {
                let out = self.compress(&data, method)?;
                fs::write(output, &out).map_err(|e| CompressError::write(output, e))?;
                Ok((data, out))
            });
        match result {
            Ok((data, out)) => CompressionReport::completed(&data, &out, start),
            Err(e) => {
                CompressionReport::failed(&format!("compressing {}", input.display()), e, start)
            }
        }
    }

    pub fn decompress_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> CompressionReport {
        let start = Instant::now();
        let (input, output) = (input.as_ref(), output.as_ref());
        let result = fs::read(input)
            .map_err(|e| CompressError::read(input, e))
            .and_then(|data| {
                let out = self.decompress(&data)?;
                fs::write(output, &out).map_err(|e| CompressError::write(output, e))?;
                Ok((data, out))
            });
        match result {
            Ok((data, out)) => CompressionReport::completed(&out, &data, start),
            Err(e) => {
                CompressionReport::failed(&format!("decompressing {}", input.display()), e, start)
            }
        }
    }
}

fn read_stream<R: Read>(input: &mut R) -> Result<Vec<u8>, CompressError> {
    let mut data = Vec::new();
    input
        .read_to_end(&mut data)
        .map_err(|e| CompressError::read("<input stream>", e))?;
    Ok(data)
}

fn write_stream<W: Write>(output: &mut W, data: &[u8]) -> Result<(), CompressError> {
    output
        .write_all(data)
        .and_then(|_| output.flush())
        .map_err(|e| CompressError::write("<output stream>", e))
}

/// Shannon entropy of data in bits per byte
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let len = data.len() as f64;
    huffman::frequencies(data)
        .iter()
        .filter(|&&f| f > 0)
        .map(|&f| {
            let p = f as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// True when the file starts with any known frame magic.
pub fn is_valid_compressed_file(path: impl AsRef<Path>) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(8);
    if file.take(8).read_to_end(&mut head).is_err() {
        return false;
    }
    FrameKind::sniff(&head).is_some()
}

pub fn compressed_file_size(path: impl AsRef<Path>) -> Result<u64, CompressError> {
    let path = path.as_ref();
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| CompressError::read(path, e))
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_huffman() {
        let compressor = Compressor::default();
        let data = b"hello world hello world hello world".repeat(20);
        let result = compressor.compress(&data, CompressionMethod::Huffman).unwrap();
        assert_eq!(FrameKind::sniff(&result), Some(FrameKind::Huffman));
        assert!(result.len() < data.len());
    }

    #[test]
    fn test_small_input_is_stored() {
        let compressor = Compressor::default();
        let data = b"tiny";
        let result = compressor.compress(data, CompressionMethod::Huffman).unwrap();
        assert_eq!(FrameKind::sniff(&result), Some(FrameKind::Stored));
        assert_eq!(compressor.decompress(&result).unwrap(), data);
    }

    #[test]
    fn test_store_fallback_disabled() {
        let settings = CompressionSettings {
            store_fallback: false,
            ..CompressionSettings::default()
        };
        let compressor = Compressor::new(settings);
        let result = compressor.compress(b"tiny", CompressionMethod::Huffman).unwrap();
        assert_eq!(FrameKind::sniff(&result), Some(FrameKind::Huffman));
    }

    #[test]
    fn test_compress_empty() {
        let compressor = Compressor::default();
        let result = compressor.compress(b"", CompressionMethod::Huffman).unwrap();
        assert_eq!(result, frame::encode_empty());
        assert!(compressor.decompress(&result).unwrap().is_empty());
    }

    #[test]
    fn test_auto_uses_chunks_above_block_size() {
        let compressor = Compressor::from_level(1);
        let data = vec![b'q'; 200 * 1024];
        let result = compressor.compress(&data, CompressionMethod::Auto).unwrap();
        assert_eq!(FrameKind::sniff(&result), Some(FrameKind::Parallel));
        assert_eq!(compressor.decompress(&result).unwrap(), data);
    }

    #[test]
    fn test_auto_extra_pass_prefers_hybrid_on_repeats() {
        let compressor = Compressor::from_level(9);
        let data = b"0123456789abcdefghij".repeat(200);
        let result = compressor.compress(&data, CompressionMethod::Auto).unwrap();
        assert_eq!(FrameKind::sniff(&result), Some(FrameKind::Hybrid));
        assert_eq!(compressor.decompress(&result).unwrap(), data);
    }

    #[test]
    fn test_entropy_computation() {
        let uniform = vec![42u8; 100];
        assert!(shannon_entropy(&uniform) < 0.01, "uniform data should have ~0 entropy");
        let all: Vec<u8> = (0..=255).collect();
        assert!((shannon_entropy(&all) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_bytes_report() {
        let compressor = Compressor::default();
        let data = "aaaaaaaaaa".repeat(100);
        let out = compressor.compress_bytes(data.as_bytes(), CompressionMethod::Huffman);
        assert!(out.report.success);
        assert!(out.report.ratio < 1.0, "repetitive data should compress well");
        assert_eq!(out.report.original_checksum, checksum::calculate(data.as_bytes()));
        assert_eq!(out.report.format, Some(FrameKind::Huffman));

        let back = compressor.decompress_bytes(&out.data);
        assert!(back.report.success);
        assert_eq!(back.data, data.as_bytes());
    }

    #[test]
    fn test_bytes_report_on_failure() {
        let compressor = Compressor::default();
        let out = compressor.decompress_bytes(b"garbage!");
        assert!(!out.report.success);
        assert!(out.report.error.unwrap().contains("magic"));
        assert!(out.data.is_empty());
    }

    #[test]
    fn test_stream_roundtrip() {
        let compressor = Compressor::default();
        let data = b"streams are read whole and written whole".repeat(30);
        let mut compressed = Vec::new();
        let report = compressor.compress_stream(
            &mut data.as_slice(),
            &mut compressed,
            CompressionMethod::Hybrid,
        );
        assert!(report.success);
        assert_eq!(report.compressed_size, compressed.len() as u64);

        let mut restored = Vec::new();
        let report = compressor.decompress_stream(&mut compressed.as_slice(), &mut restored);
        assert!(report.success);
        assert_eq!(restored, data);
    }
}

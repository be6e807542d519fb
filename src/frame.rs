//! On-disk frame layouts
//!
//! ```text
//! HUF1      magic | table_size u16 | (symbol u8, freq u64) * table_size | payload
//! HUF2      magic | lengths[256] | symbol_count u64 | crc32 u32 | payload
//! HUF_LZ77  same as HUF2, payload symbols are 5-byte LZ77 token records
//! HUF_PAR   magic | chunk_count u32 | chunk_size u32 * chunk_count | HUF2 chunks
//! STOR      magic | original_size u64 | raw bytes
//! ```
//!
//! Integers are little-endian. The CRC covers the compressed payload only and
//! is checked before any Huffman decoding. `HUF1` with `table_size == 0` is
//! the empty-input marker.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitstream::{BitReader, BitWriter};
use crate::checksum;
use crate::error::CompressError;
use crate::huffman::{self, CodeTable, Decoder, FrequencyTable, HuffmanTree, MAX_CODE_LENGTH};
use crate::lz77;
use crate::parallel;

pub const MAGIC_LEGACY: &[u8] = b"HUF1";
pub const MAGIC_HUFFMAN: &[u8] = b"HUF2";
pub const MAGIC_HYBRID: &[u8] = b"HUF_LZ77";
pub const MAGIC_PARALLEL: &[u8] = b"HUF_PAR";
pub const MAGIC_STORED: &[u8] = b"STOR";

/// Size of the `HUF1` empty-input marker.
pub const EMPTY_FRAME_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Legacy,
    Huffman,
    Hybrid,
    Parallel,
    Stored,
}

impl FrameKind {
    pub fn magic(self) -> &'static [u8] {
        match self {
            FrameKind::Legacy => MAGIC_LEGACY,
            FrameKind::Huffman => MAGIC_HUFFMAN,
            FrameKind::Hybrid => MAGIC_HYBRID,
            FrameKind::Parallel => MAGIC_PARALLEL,
            FrameKind::Stored => MAGIC_STORED,
        }
    }

    /// Classify a buffer by its leading magic, longest magic first.
    pub fn sniff(bytes: &[u8]) -> Option<FrameKind> {
        [
            FrameKind::Hybrid,
            FrameKind::Parallel,
            FrameKind::Legacy,
            FrameKind::Huffman,
            FrameKind::Stored,
        ]
        .into_iter()
        .find(|kind| bytes.starts_with(kind.magic()))
    }
}

/// Fields shared by `HUF2` and `HUF_LZ77` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedFrame<'a> {
    pub lengths: [u8; 256],
    pub symbol_count: u64,
    pub crc: u32,
    pub payload: &'a [u8],
}

/// A parsed frame borrowing its payload from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    Empty,
    Legacy { freq: FrequencyTable, payload: &'a [u8] },
    Huffman(CodedFrame<'a>),
    Hybrid(CodedFrame<'a>),
    Parallel(Vec<&'a [u8]>),
    Stored(&'a [u8]),
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], CompressError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| CompressError::CorruptHeader(format!("truncated {what}")))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], CompressError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8, CompressError> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, CompressError> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32, CompressError> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &str) -> Result<u64, CompressError> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }
}

impl<'a> Frame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, CompressError> {
        let kind = FrameKind::sniff(bytes).ok_or_else(|| {
            let shown = &bytes[..bytes.len().min(8)];
            CompressError::InvalidMagic(format!("{:?}", String::from_utf8_lossy(shown)))
        })?;
        let mut reader = ByteReader::new(bytes, kind.magic().len());

        match kind {
            FrameKind::Legacy => {
                let table_size = reader.u16("frequency table size")?;
                if table_size == 0 {
                    return Ok(Frame::Empty);
                }
                let mut freq = [0u64; 256];
                for _ in 0..table_size {
                    let symbol = reader.u8("frequency table symbol")?;
                    freq[symbol as usize] = reader.u64("frequency table count")?;
                }
                Ok(Frame::Legacy { freq, payload: reader.rest() })
            }
            FrameKind::Huffman | FrameKind::Hybrid => {
                let lengths: [u8; 256] = reader.array("code length table")?;
                if lengths.iter().all(|&l| l == 0) {
                    return Ok(Frame::Empty);
                }
                let coded = CodedFrame {
                    lengths,
                    symbol_count: reader.u64("symbol count")?,
                    crc: reader.u32("crc32")?,
                    payload: reader.rest(),
                };
                Ok(if kind == FrameKind::Huffman {
                    Frame::Huffman(coded)
                } else {
                    Frame::Hybrid(coded)
                })
            }
            FrameKind::Parallel => {
                let count = reader.u32("chunk count")? as usize;
                let mut sizes = Vec::with_capacity(count.min(bytes.len() / 4));
                for _ in 0..count {
                    sizes.push(reader.u32("chunk size table")? as usize);
                }
                let mut chunks = Vec::with_capacity(sizes.len());
                for (i, size) in sizes.into_iter().enumerate() {
                    chunks.push(reader.take(size, &format!("chunk {i}"))?);
                }
                let trailing = reader.rest().len();
                if trailing != 0 {
                    return Err(CompressError::CorruptHeader(format!(
                        "{trailing} bytes after last chunk"
                    )));
                }
                Ok(Frame::Parallel(chunks))
            }
            FrameKind::Stored => {
                let size = reader.u64("stored size")?;
                let data = reader.rest();
                if data.len() as u64 != size {
                    return Err(CompressError::CorruptHeader(format!(
                        "stored size {size} but {} bytes present",
                        data.len()
                    )));
                }
                Ok(Frame::Stored(data))
            }
        }
    }

    /// Variant tag; `None` for the empty-input marker.
    pub fn kind(&self) -> Option<FrameKind> {
        match self {
            Frame::Empty => None,
            Frame::Legacy { .. } => Some(FrameKind::Legacy),
            Frame::Huffman(_) => Some(FrameKind::Huffman),
            Frame::Hybrid(_) => Some(FrameKind::Hybrid),
            Frame::Parallel(_) => Some(FrameKind::Parallel),
            Frame::Stored(_) => Some(FrameKind::Stored),
        }
    }

    /// Reconstruct the original bytes. `threads` bounds chunk decoding (0 = rayon default).
    pub fn decode(&self, threads: usize) -> Result<Vec<u8>, CompressError> {
        match self {
            Frame::Empty => Ok(Vec::new()),
            Frame::Legacy { freq, payload } => decode_legacy(freq, payload),
            Frame::Huffman(coded) => coded.decode(),
            Frame::Hybrid(coded) => {
                let token_bytes = coded.decode()?;
                let tokens = lz77::bytes_to_tokens(&token_bytes)?;
                lz77::decompress(&tokens)
            }
            Frame::Parallel(chunks) => parallel::decode_chunks(chunks, threads),
            Frame::Stored(data) => Ok(data.to_vec()),
        }
    }
}

impl CodedFrame<'_> {
    fn decode(&self) -> Result<Vec<u8>, CompressError> {
        checksum::verify(self.payload, self.crc)?;
        let max_symbols = (self.payload.len() as u64).saturating_mul(8);
        if self.symbol_count > max_symbols {
            return Err(CompressError::CorruptHeader(format!(
                "{} symbols cannot fit in {} payload bytes",
                self.symbol_count,
                self.payload.len()
            )));
        }
        let table = huffman::canonical_codes(&self.lengths)?;
        let mut reader = BitReader::new(self.payload);
        let out =
            Decoder::new(&table).decode(&mut reader, self.symbol_count, max_symbols as usize)?;
        debug!(symbols = out.len(), payload = self.payload.len(), "decoded coded frame");
        Ok(out)
    }
}

fn decode_legacy(freq: &FrequencyTable, payload: &[u8]) -> Result<Vec<u8>, CompressError> {
    let total = freq
        .iter()
        .try_fold(0u64, |acc, &f| acc.checked_add(f))
        .ok_or_else(|| CompressError::CorruptHeader("frequency total overflows".into()))?;
    let max_symbols = (payload.len() as u64).saturating_mul(8);
    if total > max_symbols {
        return Err(CompressError::CorruptHeader(format!(
            "{total} symbols cannot fit in {} payload bytes",
            payload.len()
        )));
    }
    let tree = HuffmanTree::build(freq)
        .ok_or_else(|| CompressError::CorruptHeader("frequency table has no symbols".into()))?;
    let codes = tree.codes();
    if codes.max_len() > MAX_CODE_LENGTH {
        return Err(CompressError::CorruptHeader("frequency table yields over-long codes".into()));
    }
    let mut reader = BitReader::new(payload);
    Decoder::new(&codes).decode(&mut reader, total, max_symbols as usize)
}

/// Parse and decode any frame.
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>, CompressError> {
    Frame::parse(bytes)?.decode(0)
}

pub fn encode_empty() -> Vec<u8> {
    let mut out = Vec::with_capacity(EMPTY_FRAME_SIZE);
    out.extend_from_slice(MAGIC_LEGACY);
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Plain canonical Huffman frame (`HUF2`).
pub fn encode_huffman(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    if data.is_empty() {
        return Ok(encode_empty());
    }
    encode_coded(FrameKind::Huffman, data)
}

/// LZ77 tokens, serialized and then Huffman coded (`HUF_LZ77`).
pub fn encode_hybrid(
    data: &[u8],
    window: usize,
    lookahead: usize,
) -> Result<Vec<u8>, CompressError> {
    if data.is_empty() {
        return Ok(encode_empty());
    }
    let tokens = lz77::compress(data, window, lookahead)?;
    debug!(input = data.len(), tokens = tokens.len(), "lz77 pre-pass");
    encode_coded(FrameKind::Hybrid, &lz77::tokens_to_bytes(&tokens))
}

/// Raw fallback frame (`STOR`).
pub fn encode_stored(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC_STORED.len() + 8 + data.len());
    out.extend_from_slice(MAGIC_STORED);
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Legacy frame with an explicit frequency table and tree-order codes (`HUF1`).
pub fn encode_legacy(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    let freq = huffman::frequencies(data);
    let Some(tree) = HuffmanTree::build(&freq) else {
        return Ok(encode_empty());
    };
    let codes = tree.codes();
    check_code_lengths(&codes)?;

    let present: Vec<(u8, u64)> = freq
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .map(|(sym, &f)| (sym as u8, f))
        .collect();
    let mut out = Vec::with_capacity(MAGIC_LEGACY.len() + 2 + present.len() * 9 + data.len());
    out.extend_from_slice(MAGIC_LEGACY);
    out.extend_from_slice(&(present.len() as u16).to_le_bytes());
    for (sym, f) in present {
        out.push(sym);
        out.extend_from_slice(&f.to_le_bytes());
    }
    out.extend_from_slice(&encode_payload(data, &codes)?);
    Ok(out)
}

fn check_code_lengths(codes: &CodeTable) -> Result<(), CompressError> {
    let longest = codes.max_len();
    if longest > MAX_CODE_LENGTH {
        return Err(CompressError::CompressionFailed(format!(
            "code length {longest} exceeds {MAX_CODE_LENGTH}"
        )));
    }
    Ok(())
}

fn encode_payload(stream: &[u8], codes: &CodeTable) -> Result<Vec<u8>, CompressError> {
    let mut writer = BitWriter::with_capacity(stream.len() / 2 + 1);
    for &b in stream {
        let code = codes.get(b).ok_or_else(|| {
            CompressError::CompressionFailed(format!("no code assigned to byte {b:#04x}"))
        })?;
        writer.write_bits(code.bits, u32::from(code.len))?;
    }
    writer.into_bytes()
}

fn encode_coded(kind: FrameKind, stream: &[u8]) -> Result<Vec<u8>, CompressError> {
    let tree = HuffmanTree::build(&huffman::frequencies(stream))
        .ok_or_else(|| CompressError::CompressionFailed("no symbols to encode".into()))?;
    check_code_lengths(&tree.codes())?;
    let lengths = tree.code_lengths();
    let codes = huffman::canonical_codes(&lengths)?;
    let payload = encode_payload(stream, &codes)?;
    let crc = checksum::calculate(&payload);

    let magic = kind.magic();
    let mut out = Vec::with_capacity(magic.len() + 256 + 12 + payload.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&lengths);
    out.extend_from_slice(&(stream.len() as u64).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    debug!(
        ?kind,
        symbols = stream.len(),
        distinct = codes.len(),
        payload = payload.len(),
        "encoded coded frame"
    );
    Ok(out)
}

//! Huffman tree construction and code assignment
//!
//! Trees live in an index arena owned by `HuffmanTree`. Ties in the priority
//! queue are broken by the smallest symbol under each node, which makes tree
//! shape (and so tree-order codes) deterministic. Canonical codes depend on
//! the code lengths alone and are what frames persist.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::bitstream::BitReader;
use crate::error::CompressError;

/// Longest code the frame codec can carry in a `u64` code register.
pub const MAX_CODE_LENGTH: u8 = 64;

/// Occurrence count per byte value.
pub type FrequencyTable = [u64; 256];

pub fn frequencies(data: &[u8]) -> FrequencyTable {
    let mut freq = [0u64; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    freq
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf { symbol: u8, freq: u64 },
    Internal { freq: u64, left: usize, right: usize },
}

impl Node {
    fn freq(&self) -> u64 {
        match *self {
            Node::Leaf { freq, .. } | Node::Internal { freq, .. } => freq,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    freq: u64,
    tie: u8,
    index: usize,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on (freq, tie)
        other
            .freq
            .cmp(&self.freq)
            .then_with(|| other.tie.cmp(&self.tie))
    }
}

/// A prefix code: the low `len` bits of `bits`, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code {
    pub bits: u64,
    pub len: u8,
}

impl Code {
    pub fn is_prefix_of(&self, other: &Code) -> bool {
        self.len <= other.len && other.bits >> (other.len - self.len) == self.bits
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.len).rev() {
            f.write_str(if (self.bits >> i) & 1 == 1 { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// Symbol to code mapping for the 256 byte values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    codes: [Option<Code>; 256],
}

impl CodeTable {
    fn empty() -> Self {
        Self { codes: [None; 256] }
    }

    pub fn get(&self, symbol: u8) -> Option<Code> {
        self.codes[symbol as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, Code)> + '_ {
        self.codes
            .iter()
            .enumerate()
            .filter_map(|(sym, code)| code.map(|c| (sym as u8, c)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.iter().all(Option::is_none)
    }

    pub fn lengths(&self) -> [u8; 256] {
        let mut lengths = [0u8; 256];
        for (sym, code) in self.iter() {
            lengths[sym as usize] = code.len;
        }
        lengths
    }

    pub fn max_len(&self) -> u8 {
        self.iter().map(|(_, c)| c.len).max().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct HuffmanTree {
    nodes: Vec<Node>,
    root: usize,
}

impl HuffmanTree {
    /// Build a tree from a frequency table. Returns `None` when every count is zero.
    pub fn build(freq: &FrequencyTable) -> Option<Self> {
        let mut nodes = Vec::with_capacity(511);
        let mut heap = BinaryHeap::new();
        for (symbol, &f) in freq.iter().enumerate() {
            if f > 0 {
                heap.push(HeapEntry {
                    freq: f,
                    tie: symbol as u8,
                    index: nodes.len(),
                });
                nodes.push(Node::Leaf { symbol: symbol as u8, freq: f });
            }
        }

        while heap.len() > 1 {
            let (Some(left), Some(right)) = (heap.pop(), heap.pop()) else {
                break;
            };
            let freq = nodes[left.index].freq().saturating_add(nodes[right.index].freq());
            heap.push(HeapEntry {
                freq,
                tie: left.tie.min(right.tie),
                index: nodes.len(),
            });
            nodes.push(Node::Internal {
                freq,
                left: left.index,
                right: right.index,
            });
        }

        let root = heap.pop()?.index;
        Some(Self { nodes, root })
    }

    /// Codes read off root-to-leaf paths, `0` for left and `1` for right.
    /// A tree consisting of a single leaf gives that symbol the code `0`.
    pub fn codes(&self) -> CodeTable {
        let mut table = CodeTable::empty();
        if let Node::Leaf { symbol, .. } = self.nodes[self.root] {
            table.codes[symbol as usize] = Some(Code { bits: 0, len: 1 });
            return table;
        }

        let mut stack = vec![(self.root, 0u64, 0u32)];
        while let Some((index, bits, depth)) = stack.pop() {
            match self.nodes[index] {
                Node::Leaf { symbol, .. } => {
                    // depth beyond 255 is unreachable for byte alphabets
                    table.codes[symbol as usize] = Some(Code {
                        bits,
                        len: depth.min(u8::MAX as u32) as u8,
                    });
                }
                Node::Internal { left, right, .. } => {
                    stack.push((right, bits.wrapping_shl(1) | 1, depth + 1));
                    stack.push((left, bits.wrapping_shl(1), depth + 1));
                }
            }
        }
        table
    }

    pub fn code_lengths(&self) -> [u8; 256] {
        self.codes().lengths()
    }

    pub fn canonical_codes(&self) -> Result<CodeTable, CompressError> {
        canonical_codes(&self.code_lengths())
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Assign canonical codes from per-symbol lengths (0 = unused).
///
/// Symbols are ordered by (length, symbol); the first gets code 0 and each
/// next code is the previous plus one, shifted left by the length increase.
pub fn canonical_codes(lengths: &[u8; 256]) -> Result<CodeTable, CompressError> {
    let mut order: Vec<(u8, u8)> = lengths
        .iter()
        .enumerate()
        .filter(|(_, &len)| len > 0)
        .map(|(sym, &len)| (len, sym as u8))
        .collect();
    order.sort_unstable();

    let mut table = CodeTable::empty();
    let mut code: u128 = 0;
    let mut prev_len = 0u8;
    for (i, &(len, sym)) in order.iter().enumerate() {
        if len > MAX_CODE_LENGTH {
            return Err(CompressError::CorruptHeader(format!(
                "code length {len} for symbol {sym} exceeds {MAX_CODE_LENGTH}"
            )));
        }
        if i == 0 {
            code = 0;
        } else {
            code = (code + 1) << (len - prev_len);
        }
        if code >> len != 0 {
            return Err(CompressError::CorruptHeader(
                "code lengths over-subscribe the code space".into(),
            ));
        }
        table.codes[sym as usize] = Some(Code { bits: code as u64, len });
        prev_len = len;
    }
    Ok(table)
}

/// Bit-at-a-time decoder over any prefix-free code table.
pub struct Decoder {
    lookup: HashMap<Code, u8>,
    max_len: u8,
}

impl Decoder {
    pub fn new(table: &CodeTable) -> Self {
        Self {
            lookup: table.iter().map(|(sym, code)| (code, sym)).collect(),
            max_len: table.max_len(),
        }
    }

    /// Decode exactly `count` symbols from `reader`.
    ///
    /// Running out of bits before `count` symbols, or accumulating more bits
    /// than the longest code without a match, is corruption.
    pub fn decode(
        &self,
        reader: &mut BitReader<'_>,
        count: u64,
        capacity_hint: usize,
    ) -> Result<Vec<u8>, CompressError> {
        let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(capacity_hint);
        let mut out = Vec::with_capacity(capacity);
        for emitted in 0..count {
            let mut code = Code { bits: 0, len: 0 };
            let symbol = loop {
                let bit = match reader.read_bit() {
                    Ok(bit) => bit,
                    Err(CompressError::StreamExhausted) => {
                        return Err(CompressError::DecompressionFailed(format!(
                            "bit stream ended after {emitted} of {count} symbols"
                        )))
                    }
                    Err(e) => return Err(e),
                };
                code.bits = (code.bits << 1) | u64::from(bit);
                code.len += 1;
                if let Some(&sym) = self.lookup.get(&code) {
                    break sym;
                }
                if code.len >= self.max_len {
                    let (byte, bit) = reader.position();
                    return Err(CompressError::DecompressionFailed(format!(
                        "no code matches bits ending at byte {byte} bit {bit}"
                    )));
                }
            };
            out.push(symbol);
        }
        Ok(out)
    }
}

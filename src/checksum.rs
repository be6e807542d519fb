//! CRC-32 (IEEE, reflected polynomial 0xEDB88320) helpers.

use crate::error::CompressError;

pub fn calculate(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Incremental CRC for data that arrives in pieces.
#[derive(Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

pub fn to_hex(crc: u32) -> String {
    format!("{crc:08x}")
}

pub fn from_hex(hex: &str) -> Result<u32, CompressError> {
    u32::from_str_radix(hex.trim(), 16)
        .map_err(|e| CompressError::InvalidInput(format!("bad checksum {hex:?}: {e}")))
}

/// Fail with `ChecksumMismatch` unless `data` hashes to `expected`.
pub fn verify(data: &[u8], expected: u32) -> Result<(), CompressError> {
    let actual = calculate(data);
    if actual != expected {
        return Err(CompressError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

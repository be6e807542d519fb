//! Configuration for huffpack

use serde::{Deserialize, Serialize};

use crate::error::CompressError;

/// Compression profile derived from the numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Fast,
    Default,
    Best,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub level: u32,
    pub mode: Mode,
    /// Chunk size used by `CompressionMethod::Auto`; 0 = whole input in one frame.
    pub block_size: usize,
    pub canonicalize: bool,
    /// Extra passes let `Auto` also try the LZ77 hybrid and keep the smaller frame.
    pub extra_passes: u32,
    pub sampling: bool,
    pub prefer_speed: bool,
    pub verbose: bool,
    pub preserve_timestamps: bool,
    pub comment: String,
    /// Keep raw bytes when the compressed form is not below this fraction of the original.
    pub store_threshold: f64,
    /// Emit `STOR` frames from the buffer API when compression does not pay off.
    pub store_fallback: bool,
    pub chunk_size: usize,
    /// Worker threads for chunk compression, 0 = rayon default.
    pub threads: usize,
    pub lz77_window: usize,
    pub lz77_lookahead: usize,
    /// Check each extracted archive entry against its stored CRC32.
    pub verify_checksums: bool,
}

impl CompressionSettings {
    pub fn from_level(level: u32) -> Self {
        let level = match level {
            0 => 5,
            l if l > 9 => 9,
            l => l,
        };
        let base = Self {
            level,
            mode: Mode::Default,
            block_size: 0,
            canonicalize: true,
            extra_passes: 0,
            sampling: false,
            prefer_speed: false,
            verbose: false,
            preserve_timestamps: false,
            comment: String::new(),
            store_threshold: 0.9,
            store_fallback: true,
            chunk_size: 1024 * 1024, // 1 MiB
            threads: 0,
            lz77_window: 4096,
            lz77_lookahead: 18,
            verify_checksums: false,
        };
        match level {
            1..=3 => Self {
                mode: Mode::Fast,
                block_size: 64 * 1024, // 64 KiB
                canonicalize: false,
                sampling: true,
                prefer_speed: true,
                ..base
            },
            4..=6 => base,
            _ => Self {
                mode: Mode::Best,
                extra_passes: 1,
                ..base
            },
        }
    }

    /// Parse settings held as JSON; missing fields fall back to level 5 defaults.
    pub fn from_json(json: &str) -> Result<Self, CompressError> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| CompressError::InvalidInput(format!("settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CompressError> {
        if !(self.store_threshold > 0.0 && self.store_threshold <= 1.0) {
            return Err(CompressError::InvalidInput(format!(
                "store_threshold must be in (0, 1], got {}",
                self.store_threshold
            )));
        }
        if self.chunk_size == 0 {
            return Err(CompressError::InvalidInput("chunk_size must be non-zero".into()));
        }
        if self.chunk_size > u32::MAX as usize || self.block_size > u32::MAX as usize {
            return Err(CompressError::InvalidInput("chunk size exceeds u32 range".into()));
        }
        Ok(())
    }

    /// True when `compressed` bytes are worth keeping over `original` raw bytes.
    pub fn pays_off(&self, compressed: usize, original: usize) -> bool {
        (compressed as f64) < (original as f64) * self.store_threshold
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self::from_level(5)
    }
}

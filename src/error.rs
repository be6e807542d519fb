//! Error types for huffpack

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("error reading {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error writing {path}: {source}")]
    WriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid magic number: {0}")]
    InvalidMagic(String),

    #[error("corrupted header: {0}")]
    CorruptHeader(String),

    #[error(
        "checksum mismatch (data corruption detected): expected {expected:08x}, got {actual:08x}"
    )]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("memory allocation error: {0}")]
    MemoryError(String),

    #[error("bit stream exhausted")]
    StreamExhausted,

    #[error("corrupt lz77 token: {0}")]
    CorruptToken(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure while extracting one archive entry; `source` keeps the original kind.
    #[error("{path}: {source}")]
    Entry {
        path: String,
        #[source]
        source: Box<CompressError>,
    },
}

impl CompressError {
    pub(crate) fn read(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if source.kind() == std::io::ErrorKind::NotFound {
            return CompressError::NotFound(path);
        }
        CompressError::ReadError { path, source }
    }

    pub(crate) fn write(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        CompressError::WriteError {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Attach the archive entry being processed.
    pub(crate) fn in_entry(self, path: &str) -> Self {
        CompressError::Entry {
            path: path.to_string(),
            source: Box::new(self),
        }
    }

    /// Give a bare I/O error the path it happened on.
    pub(crate) fn at_path(self, path: impl AsRef<std::path::Path>) -> Self {
        match self {
            CompressError::IoError(source) => CompressError::read(path, source),
            other => other,
        }
    }

    /// The underlying error, looking through entry context.
    pub fn root_cause(&self) -> &CompressError {
        match self {
            CompressError::Entry { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Reserve room for `len` bytes whose size came from an untrusted header field.
pub(crate) fn try_alloc(len: usize, what: &str) -> Result<Vec<u8>, CompressError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| CompressError::MemoryError(format!("{what} ({len} bytes): {e}")))?;
    Ok(buf)
}

//! HFAR multi-file archives
//!
//! Layout, all integers little-endian:
//! - fixed header (34 bytes): magic, version, file count, total original size,
//!   total stored size, header size
//! - one entry per file: path length + UTF-8 path, original size, stored size,
//!   absolute data offset, mtime seconds, CRC-32 of the original bytes,
//!   compressed flag
//! - file payloads back to back, in entry order
//!
//! Headers go through bincode with fixed-width integers, which yields exactly
//! this layout. The header is written as a zeroed placeholder first and
//! rewritten once every payload size is known.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checksum::{self, Crc32};
use crate::config::CompressionSettings;
use crate::error::{try_alloc, CompressError};
use crate::{CompressionMethod, Compressor};

pub const ARCHIVE_MAGIC: u32 = 0x5241_4648; // "HFAR" read as little-endian u32
pub const ARCHIVE_VERSION: u16 = 1;
pub const FIXED_HEADER_SIZE: u64 = 34;
/// Serialized entry size excluding the path bytes.
pub const ENTRY_OVERHEAD: u64 = 45;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub magic: u32,
    pub version: u16,
    pub file_count: u32,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub header_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// '/'-separated, starting with the archived folder's own name
    pub relative_path: String,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Absolute byte offset of the payload within the archive
    pub data_offset: u64,
    pub timestamp: u64,
    pub checksum: u32,
    pub is_compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub header: ArchiveHeader,
    pub files: Vec<FileEntry>,
}

impl ArchiveMetadata {
    fn new(files: Vec<FileEntry>) -> Result<Self, CompressError> {
        let file_count = u32::try_from(files.len()).map_err(|_| {
            CompressError::InvalidInput(format!("{} files exceed archive limit", files.len()))
        })?;
        let mut meta = Self {
            header: ArchiveHeader {
                magic: ARCHIVE_MAGIC,
                version: ARCHIVE_VERSION,
                file_count,
                ..ArchiveHeader::default()
            },
            files,
        };
        meta.header.header_size = meta.header_size();
        Ok(meta)
    }

    /// Bytes occupied by the fixed header plus every entry.
    pub fn header_size(&self) -> u64 {
        FIXED_HEADER_SIZE
            + self
                .files
                .iter()
                .map(|f| ENTRY_OVERHEAD + f.relative_path.len() as u64)
                .sum::<u64>()
    }

    /// Stored bytes over original bytes, 0 for an archive of empty files.
    pub fn ratio(&self) -> f64 {
        if self.header.total_original_size == 0 {
            return 0.0;
        }
        self.header.total_compressed_size as f64 / self.header.total_original_size as f64
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CompressError> {
        let encode_err =
            |e: bincode::Error| CompressError::CompressionFailed(format!("archive header: {e}"));
        let mut out = codec().serialize(&self.header).map_err(encode_err)?;
        for entry in &self.files {
            out.extend(codec().serialize(entry).map_err(encode_err)?);
        }
        Ok(out)
    }

    /// Parse the header and entry table from the start of an archive.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CompressError> {
        let mut fixed = Vec::with_capacity(FIXED_HEADER_SIZE as usize);
        reader.by_ref().take(FIXED_HEADER_SIZE).read_to_end(&mut fixed)?;
        if fixed.len() < 4 || fixed[..4] != ARCHIVE_MAGIC.to_le_bytes() {
            return Err(CompressError::InvalidMagic(format!(
                "expected HFAR, found {:02x?}",
                &fixed[..fixed.len().min(4)]
            )));
        }
        if (fixed.len() as u64) < FIXED_HEADER_SIZE {
            return Err(CompressError::CorruptHeader(format!(
                "archive header truncated at {} bytes",
                fixed.len()
            )));
        }

        let header: ArchiveHeader = codec()
            .deserialize(&fixed)
            .map_err(|e| CompressError::CorruptHeader(format!("archive header: {e}")))?;
        if header.version != ARCHIVE_VERSION {
            return Err(CompressError::CorruptHeader(format!(
                "unsupported archive version {}",
                header.version
            )));
        }
        if header.header_size < FIXED_HEADER_SIZE {
            return Err(CompressError::CorruptHeader(format!(
                "header size {} below fixed size",
                header.header_size
            )));
        }

        // read_to_end grows with the bytes actually present, not with the claimed size
        let table_len = header.header_size - FIXED_HEADER_SIZE;
        let mut table = Vec::new();
        reader.by_ref().take(table_len).read_to_end(&mut table)?;
        if (table.len() as u64) < table_len {
            return Err(CompressError::CorruptHeader(format!(
                "entry table truncated: {} of {table_len} bytes",
                table.len()
            )));
        }

        let mut rest = table.as_slice();
        let capacity = (header.file_count as usize).min(table.len() / ENTRY_OVERHEAD as usize);
        let mut files = Vec::with_capacity(capacity);
        for i in 0..header.file_count {
            let entry: FileEntry = codec()
                .with_limit(rest.len() as u64)
                .deserialize_from(&mut rest)
                .map_err(|e| CompressError::CorruptHeader(format!("entry {i}: {e}")))?;
            files.push(entry);
        }
        if !rest.is_empty() {
            return Err(CompressError::CorruptHeader(format!(
                "{} unexpected bytes after entry table",
                rest.len()
            )));
        }
        Ok(Self { header, files })
    }
}

pub type ProgressCallback = Box<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Packs folders into HFAR archives and unpacks them again.
pub struct Archiver {
    compressor: Compressor,
    progress: Option<ProgressCallback>,
}

impl Archiver {
    pub fn new(settings: CompressionSettings) -> Self {
        Self {
            compressor: Compressor::new(settings),
            progress: None,
        }
    }

    /// Called with (index, total, relative path) before each file is processed.
    pub fn with_progress(
        mut self,
        callback: impl Fn(usize, usize, &str) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn settings(&self) -> &CompressionSettings {
        self.compressor.settings()
    }

    fn report(&self, index: usize, total: usize, path: &str) {
        if let Some(progress) = &self.progress {
            progress(index, total, path);
        }
    }

    /// Archive every regular file below `src` into `archive`.
    ///
    /// Files are taken in sorted path order. Each one is compressed on its own
    /// and kept raw when the result does not beat the store threshold. On
    /// failure the partial archive is removed.
    pub fn compress_folder(
        &self,
        src: impl AsRef<Path>,
        archive: impl AsRef<Path>,
    ) -> Result<ArchiveMetadata, CompressError> {
        let (src, archive) = (src.as_ref(), archive.as_ref());
        self.compressor.settings().validate()?;
        let files = collect_files(src)?;
        if files.is_empty() {
            return Err(CompressError::InvalidInput(format!("no files found in {}", src.display())));
        }

        let result = self.write_archive(&files, archive);
        if result.is_err() {
            if let Err(e) = fs::remove_file(archive) {
                debug!(error = %e, "could not remove partial archive");
            }
        }
        result
    }

    fn write_archive(
        &self,
        files: &[(PathBuf, String)],
        archive: &Path,
    ) -> Result<ArchiveMetadata, CompressError> {
        let entries = files
            .iter()
            .map(|(_, rel)| FileEntry {
                relative_path: rel.clone(),
                ..FileEntry::default()
            })
            .collect();
        let mut meta = ArchiveMetadata::new(entries)?;
        let header_size = meta.header.header_size;

        let write_err = |e: io::Error| CompressError::write(archive, e);
        let mut out = BufWriter::new(File::create(archive).map_err(write_err)?);
        io::copy(&mut io::repeat(0).take(header_size), &mut out).map_err(write_err)?;

        let settings = self.compressor.settings();
        let total = files.len();
        let mut offset = header_size;
        for (index, ((path, rel), entry)) in files.iter().zip(meta.files.iter_mut()).enumerate() {
            self.report(index, total, rel);

            let (data, crc) = read_hashed(path)?;
            let encoded = self.compressor.encode(&data, CompressionMethod::Auto)?;
            let is_compressed = settings.pays_off(encoded.len(), data.len());
            let stored: &[u8] = if is_compressed { &encoded } else { &data };
            out.write_all(stored).map_err(write_err)?;

            *entry = FileEntry {
                relative_path: rel.clone(),
                original_size: data.len() as u64,
                compressed_size: stored.len() as u64,
                data_offset: offset,
                timestamp: modified_secs(path),
                checksum: crc,
                is_compressed,
            };
            debug!(
                path = %rel,
                original = data.len(),
                stored = stored.len(),
                is_compressed,
                "archived file"
            );

            offset += stored.len() as u64;
            meta.header.total_original_size += data.len() as u64;
            meta.header.total_compressed_size += stored.len() as u64;
        }

        let header = meta.to_bytes()?;
        if header.len() as u64 != header_size {
            return Err(CompressError::CompressionFailed(format!(
                "header serialized to {} bytes, reserved {header_size}",
                header.len()
            )));
        }
        out.seek(SeekFrom::Start(0)).map_err(write_err)?;
        out.write_all(&header).map_err(write_err)?;
        out.flush().map_err(write_err)?;

        info!(
            archive = %archive.display(),
            files = total,
            original = meta.header.total_original_size,
            stored = meta.header.total_compressed_size,
            ratio = meta.ratio(),
            "archive written"
        );
        Ok(meta)
    }

    /// Extract every entry of `archive` below `dst`, creating directories as needed.
    pub fn decompress_archive(
        &self,
        archive: impl AsRef<Path>,
        dst: impl AsRef<Path>,
    ) -> Result<ArchiveMetadata, CompressError> {
        let (archive, dst) = (archive.as_ref(), dst.as_ref());
        let file = File::open(archive).map_err(|e| CompressError::read(archive, e))?;
        let archive_len = file.metadata().map_err(|e| CompressError::read(archive, e))?.len();
        let mut reader = BufReader::new(file);
        let meta = ArchiveMetadata::read_from(&mut reader).map_err(|e| e.at_path(archive))?;

        fs::create_dir_all(dst).map_err(|e| CompressError::write(dst, e))?;
        let settings = self.compressor.settings();
        let total = meta.files.len();
        for (index, entry) in meta.files.iter().enumerate() {
            self.report(index, total, &entry.relative_path);

            let target = safe_join(dst, &entry.relative_path)?;
            let data = self
                .read_entry(&mut reader, archive, archive_len, &meta.header, entry)
                .map_err(|e| e.in_entry(&entry.relative_path))?;

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| CompressError::write(parent, e))?;
            }
            fs::write(&target, &data).map_err(|e| CompressError::write(&target, e))?;
            if settings.preserve_timestamps {
                restore_mtime(&target, entry.timestamp);
            }
            debug!(path = %entry.relative_path, bytes = data.len(), "extracted file");
        }

        info!(
            archive = %archive.display(),
            files = total,
            dst = %dst.display(),
            "archive extracted"
        );
        Ok(meta)
    }

    /// Read, decode and check the payload of one entry.
    fn read_entry<R: Read + Seek>(
        &self,
        reader: &mut R,
        archive: &Path,
        archive_len: u64,
        header: &ArchiveHeader,
        entry: &FileEntry,
    ) -> Result<Vec<u8>, CompressError> {
        let end = entry.data_offset.checked_add(entry.compressed_size);
        if end.map_or(true, |end| end > archive_len) || entry.data_offset < header.header_size {
            return Err(CompressError::CorruptHeader(format!(
                "payload at {}+{} lies outside the archive",
                entry.data_offset, entry.compressed_size
            )));
        }

        let mut stored = try_alloc(entry.compressed_size as usize, &entry.relative_path)?;
        reader
            .seek(SeekFrom::Start(entry.data_offset))
            .and_then(|_| reader.by_ref().take(entry.compressed_size).read_to_end(&mut stored))
            .map_err(|e| CompressError::read(archive, e))?;

        let data = if entry.is_compressed {
            self.compressor.decompress(&stored)?
        } else {
            stored
        };
        if data.len() as u64 != entry.original_size {
            return Err(CompressError::DecompressionFailed(format!(
                "expected {} bytes, got {}",
                entry.original_size,
                data.len()
            )));
        }
        if self.compressor.settings().verify_checksums {
            checksum::verify(&data, entry.checksum)?;
        }
        Ok(data)
    }

    pub fn archive_info(archive: impl AsRef<Path>) -> Result<ArchiveMetadata, CompressError> {
        let archive = archive.as_ref();
        let file = File::open(archive).map_err(|e| CompressError::read(archive, e))?;
        ArchiveMetadata::read_from(&mut BufReader::new(file)).map_err(|e| e.at_path(archive))
    }

    /// True when the file starts with the HFAR magic.
    pub fn is_valid_archive(archive: impl AsRef<Path>) -> bool {
        let mut magic = [0u8; 4];
        File::open(archive)
            .and_then(|mut f| f.read_exact(&mut magic))
            .map(|_| u32::from_le_bytes(magic) == ARCHIVE_MAGIC)
            .unwrap_or(false)
    }

    pub fn list_files(archive: impl AsRef<Path>) -> Result<Vec<String>, CompressError> {
        Ok(Self::archive_info(archive)?
            .files
            .into_iter()
            .map(|f| f.relative_path)
            .collect())
    }
}

/// Regular files below `src`, sorted, paired with paths relative to `src`'s parent.
fn collect_files(src: &Path) -> Result<Vec<(PathBuf, String)>, CompressError> {
    let meta = fs::metadata(src).map_err(|e| CompressError::read(src, e))?;
    if !meta.is_dir() {
        return Err(CompressError::InvalidInput(format!("{} is not a directory", src.display())));
    }
    let root = fs::canonicalize(src).map_err(|e| CompressError::read(src, e))?;
    let base = root.parent().unwrap_or(&root).to_path_buf();

    let mut files = Vec::new();
    for entry in jwalk::WalkDir::new(&root).skip_hidden(false).sort(true) {
        let entry = entry.map_err(|e| CompressError::read(&root, e.into()))?;
        // links are not followed, so symlinks and special files are skipped here
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(&base)
            .map_err(|_| {
                CompressError::InvalidInput(format!(
                    "{} escapes {}",
                    path.display(),
                    base.display()
                ))
            })?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((path, rel));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    debug!(root = %root.display(), files = files.len(), "collected files");
    Ok(files)
}

/// Join an archived path onto `dst`, refusing anything that could land outside it.
fn safe_join(dst: &Path, rel: &str) -> Result<PathBuf, CompressError> {
    let mut out = dst.to_path_buf();
    let mut depth = 0;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            _ => return Err(CompressError::CorruptHeader(format!("unsafe entry path {rel:?}"))),
        }
    }
    if depth == 0 {
        return Err(CompressError::CorruptHeader("empty entry path".into()));
    }
    Ok(out)
}

/// Read a whole file, hashing it as the chunks arrive.
fn read_hashed(path: &Path) -> Result<(Vec<u8>, u32), CompressError> {
    let mut file = File::open(path).map_err(|e| CompressError::read(path, e))?;
    let mut data = Vec::new();
    let mut crc = Crc32::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CompressError::read(path, e)),
        };
        crc.update(&buf[..n]);
        data.extend_from_slice(&buf[..n]);
    }
    Ok((data, crc.finalize()))
}

fn modified_secs(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

fn restore_mtime(path: &Path, secs: u64) {
    let time = UNIX_EPOCH + Duration::from_secs(secs);
    let result = File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(time));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "could not restore modification time");
    }
}

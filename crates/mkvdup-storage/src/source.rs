//! Source-file mapping
//!
//! Source files are only mapped when an entry first needs them, so opening
//! an artifact costs nothing per source.

use crate::{Result, StorageError, checksum_hex};
use memmap2::{Mmap, MmapOptions};
use mkvdup_formats::SourceFile;
use mkvdup_formats::checksum::checksum;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// The source files of one artifact, resolved against a root directory
pub struct SourceSet {
    root: PathBuf,
    files: Vec<SourceFile>,
    maps: Vec<OnceLock<Mmap>>,
}

impl SourceSet {
    /// Source set for `files` relative to `root`
    pub fn new(root: impl AsRef<Path>, files: Vec<SourceFile>) -> Self {
        let maps = files.iter().map(|_| OnceLock::new()).collect();
        Self {
            root: root.as_ref().to_path_buf(),
            files,
            maps,
        }
    }

    /// Source root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Table records
    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Number of source files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute path of source `index`
    pub fn path(&self, index: usize) -> Option<PathBuf> {
        self.files.get(index).map(|f| self.root.join(&f.path))
    }

    /// Mapped contents of source `index` (0-based), mapping on first use
    pub fn data(&self, index: usize) -> Result<&[u8]> {
        let cell = self.maps.get(index).ok_or_else(|| {
            StorageError::InvalidEntries(format!(
                "source index {} outside table of {}",
                index + 1,
                self.files.len()
            ))
        })?;

        if let Some(mmap) = cell.get() {
            return Ok(&mmap[..]);
        }

        let path = self.root.join(&self.files[index].path);
        let mmap = map_file(&path)?;
        debug!("Mapped source {} ({} bytes)", path.display(), mmap.len());

        // a racing caller may have mapped it first; keep whichever landed
        Ok(&cell.get_or_init(|| mmap)[..])
    }

    /// Borrow `len` bytes of source `index` at `offset`
    pub fn slice(&self, index: usize, offset: u64, len: usize) -> Result<&[u8]> {
        let data = self.data(index)?;
        bounded(data, offset, len).ok_or_else(|| StorageError::OutOfBounds {
            section: format!("source file {}", self.files[index].path),
            offset,
            len: len as u64,
            available: data.len() as u64,
        })
    }

    /// Check size and XXH64 of source `index` against its record
    pub fn verify(&self, index: usize) -> Result<()> {
        let data = self.data(index)?;
        let record = &self.files[index];

        if data.len() as u64 != record.size {
            warn!(
                "Source {} size mismatch: expected {}, got {}",
                record.path,
                record.size,
                data.len()
            );
            return Err(StorageError::SourceSizeMismatch {
                path: record.path.clone(),
                expected: record.size,
                actual: data.len() as u64,
            });
        }

        let actual = checksum(data);
        if actual != record.checksum {
            warn!("Source {} checksum mismatch", record.path);
            return Err(StorageError::SourceChecksumMismatch {
                path: record.path.clone(),
                expected: checksum_hex(record.checksum),
                actual: checksum_hex(actual),
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet")
            .field("root", &self.root)
            .field("files", &self.files)
            .field(
                "mapped",
                &self.maps.iter().filter(|m| m.get().is_some()).count(),
            )
            .finish()
    }
}

/// Map a file read-only
pub(crate) fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;

    #[allow(unsafe_code)]
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    Ok(mmap)
}

/// `data[offset..offset + len]` when it lies inside `data`
pub(crate) fn bounded(data: &[u8], offset: u64, len: usize) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len)?;
    data.get(start..end)
}

//! Random-access reader for dedup artifacts
//!
//! Opening maps the artifact and parses only the header, source table and
//! footer. The block index over entries is built on the first read, after
//! checking that the last entry ends at the declared original size, and is
//! shared by every later caller. Range maps are decoded only when an
//! ES-addressed entry is first read.
//!
//! Mutable state is limited to the entry cache, the per-stream range-map
//! cursors and the two once-cells. Bulk copies never hold a lock.

mod entry_index;
pub mod lpcm;

use crate::es_reader::{EsReader, RangeMapEsReader};
use crate::source::{SourceSet, bounded, map_file};
use crate::validation::EntryValidator;
use crate::{DedupConfig, Result, StorageError, checksum_hex};
use entry_index::{EntryIndex, TableBounds};
use memmap2::Mmap;
use mkvdup_formats::checksum::checksum;
use mkvdup_formats::dedup::{FOOTER_SIZE, FormatError, entry_length_at, entry_offset_at};
use mkvdup_formats::range_map::RangeMapSection;
use mkvdup_formats::{
    DedupFooter, DedupHeader, ENTRY_SIZE, Entry, RangeMapError, SourceFile, SourceType, StreamKey,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Why the entry index could not be built
#[derive(Debug, Clone, Copy)]
enum IndexFailure {
    /// Declared entry table does not fit the mapped file
    Truncated {
        entry_count: u64,
        needed: u64,
        available: u64,
    },
    /// Last entry does not end at the declared original size
    SizeMismatch { declared: u64, covered: u64 },
}

impl From<IndexFailure> for StorageError {
    fn from(failure: IndexFailure) -> Self {
        match failure {
            IndexFailure::Truncated {
                entry_count,
                needed,
                available,
            } => Self::EntryTableTruncated {
                entry_count,
                needed,
                available,
            },
            IndexFailure::SizeMismatch { declared, covered } => {
                Self::SizeMismatch { declared, covered }
            }
        }
    }
}

type EsReaderSlot = std::result::Result<Option<Arc<dyn EsReader>>, RangeMapError>;

/// Reconstructs the original file from an artifact and its sources
pub struct DedupReader {
    path: PathBuf,
    mmap: Mmap,
    header: DedupHeader,
    footer: DedupFooter,
    sources: SourceSet,
    table_offset: usize,
    config: DedupConfig,
    index: OnceLock<std::result::Result<EntryIndex, IndexFailure>>,
    es_reader: OnceLock<EsReaderSlot>,
}

impl DedupReader {
    /// Open an artifact with default configuration
    ///
    /// Source paths in the artifact resolve against `source_root`.
    pub fn open(path: impl AsRef<Path>, source_root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, source_root, DedupConfig::default())
    }

    /// Open an artifact
    pub fn open_with_config(
        path: impl AsRef<Path>,
        source_root: impl AsRef<Path>,
        config: DedupConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mmap = map_file(path)?;

        let (header, header_len) = DedupHeader::parse(&mmap)?;
        let (files, table_len) =
            SourceFile::parse_table(&mmap[header_len..], header.source_file_count)?;
        let footer = DedupFooter::from_tail(&mmap)?;

        let table_offset = header_len + table_len;
        let data_end = (mmap.len() - FOOTER_SIZE) as u64;
        let delta_end = header.delta_offset.checked_add(header.delta_size);
        if header.delta_offset < table_offset as u64 || delta_end.is_none_or(|end| end > data_end)
        {
            return Err(FormatError::Truncated {
                section: "delta section",
                expected: delta_end.unwrap_or(u64::MAX),
                actual: data_end,
            }
            .into());
        }

        info!(
            "Opened dedup file {} (version {}, {} entries, {} sources)",
            path.display(),
            header.version,
            header.entry_count,
            files.len()
        );

        let reader = Self {
            path: path.to_path_buf(),
            mmap,
            header,
            footer,
            sources: SourceSet::new(source_root, files),
            table_offset,
            config,
            index: OnceLock::new(),
            es_reader: OnceLock::new(),
        };

        if reader.config.verify_on_open {
            reader.verify_integrity()?;
        }
        Ok(reader)
    }

    /// Use `es_reader` for ES-addressed entries instead of the artifact's
    /// own range maps
    #[must_use]
    pub fn with_es_reader(mut self, es_reader: Arc<dyn EsReader>) -> Self {
        self.es_reader = OnceLock::from(Ok(Some(es_reader)));
        self
    }

    /// Artifact path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed header
    pub const fn header(&self) -> &DedupHeader {
        &self.header
    }

    /// Parsed footer
    pub const fn footer(&self) -> &DedupFooter {
        &self.footer
    }

    /// Size of the reconstructed file
    pub const fn original_size(&self) -> u64 {
        self.header.original_size
    }

    /// XXH64 of the reconstructed file
    pub const fn original_checksum(&self) -> u64 {
        self.header.original_checksum
    }

    /// Disc image type
    pub const fn source_type(&self) -> SourceType {
        self.header.source_type
    }

    /// Source-file records
    pub fn source_files(&self) -> &[SourceFile] {
        self.sources.files()
    }

    /// Source files with lazy mapping
    pub const fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Declared number of entries
    pub const fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    /// Tool version recorded in the artifact (version 5+)
    pub fn creator_version(&self) -> Option<&str> {
        self.header.creator_version.as_deref()
    }

    /// Whether the 0-based source `index` is referenced by any entry
    pub fn source_used(&self, index: usize) -> bool {
        self.header.is_source_used(index)
    }

    /// Delta section, borrowed from the mapping
    pub fn delta_section(&self) -> &[u8] {
        let start = self.header.delta_offset as usize;
        &self.mmap[start..start + self.header.delta_size as usize]
    }

    /// Decode entry `index`
    pub fn entry(&self, index: usize) -> Result<Option<Entry>> {
        let entries = self.entry_index()?;
        Ok(entries.get(self.entry_table(entries), index))
    }

    /// Build the entry lookup structures now rather than on first read
    pub fn init_entry_access(&self) -> Result<()> {
        self.entry_index().map(|_| ())
    }

    /// Read up to `buf.len()` reconstructed bytes starting at `offset`
    ///
    /// Returns the number of bytes read; `Ok(0)` means `offset` is at or past
    /// the end of the file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let size = self.header.original_size;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = (size - offset).min(buf.len() as u64) as usize;

        let entries = self.entry_index()?;
        let table = self.entry_table(entries);
        let (mut index, mut entry) = entries.locate(table, offset).ok_or_else(|| {
            StorageError::InvalidEntries(format!("no entry covers offset {offset}"))
        })?;

        let mut done = 0usize;
        while done < len {
            let pos = offset + done as u64;
            if pos >= entry.end() {
                index += 1;
                entry = entries
                    .get(table, index)
                    .filter(|next| next.mkv_offset == pos && next.length > 0)
                    .ok_or_else(|| {
                        StorageError::InvalidEntries(format!(
                            "entry {index} does not continue at offset {pos}"
                        ))
                    })?;
            }

            let within = pos - entry.mkv_offset;
            let n = (entry.length - within).min((len - done) as u64) as usize;
            self.copy_entry(&entry, within, &mut buf[done..done + n])?;
            done += n;
        }

        entries.remember(index, entry);
        Ok(len)
    }

    /// Recompute both section checksums and compare against the footer
    pub fn verify_integrity(&self) -> Result<()> {
        let bounds = self.table_bounds()?;

        let actual = checksum(&self.mmap[bounds.offset..bounds.end()]);
        if actual != self.footer.entry_checksum {
            warn!(
                "Entry table checksum mismatch in {}: expected {}, got {}",
                self.path.display(),
                checksum_hex(self.footer.entry_checksum),
                checksum_hex(actual)
            );
            return Err(StorageError::ChecksumMismatch {
                section: "entry table",
                expected: self.footer.entry_checksum,
                actual,
            });
        }

        let actual = checksum(self.delta_section());
        if actual != self.footer.delta_checksum {
            warn!(
                "Delta checksum mismatch in {}: expected {}, got {}",
                self.path.display(),
                checksum_hex(self.footer.delta_checksum),
                checksum_hex(actual)
            );
            return Err(StorageError::ChecksumMismatch {
                section: "delta section",
                expected: self.footer.delta_checksum,
                actual,
            });
        }

        info!("Integrity verified for {}", self.path.display());
        Ok(())
    }

    /// Check that entries are ordered and cover the file exactly once
    pub fn check_coverage(&self) -> Result<()> {
        let entries = self.entry_index()?;
        let table = self.entry_table(entries);
        let mut validator = EntryValidator::new(
            self.header.original_size,
            self.sources.len(),
            self.header.delta_size,
        );
        for index in 0..entries.bounds().count {
            let entry = entries.get(table, index).ok_or_else(|| {
                StorageError::InvalidEntries(format!("entry {index} is unreadable"))
            })?;
            validator.push(&entry)?;
        }
        validator.finish()
    }

    /// Compare every used source file's size and checksum with the table
    pub fn verify_sources(&self) -> Result<()> {
        for index in 0..self.sources.len() {
            if !self.source_used(index) {
                debug!("Skipping unused source {}", self.sources.files()[index].path);
                continue;
            }
            self.sources.verify(index)?;
        }
        info!("Verified {} source files", self.sources.len());
        Ok(())
    }

    /// Diagnostic key/value summary
    pub fn info(&self) -> Vec<(&'static str, String)> {
        let mut info = vec![
            ("path", self.path.display().to_string()),
            ("version", self.header.version.to_string()),
            (
                "creator",
                self.creator_version().unwrap_or("unknown").to_string(),
            ),
            ("original size", self.header.original_size.to_string()),
            (
                "original checksum",
                checksum_hex(self.header.original_checksum),
            ),
            ("source type", self.header.source_type.to_string()),
            ("source files", self.sources.len().to_string()),
            ("entries", self.header.entry_count.to_string()),
            ("delta size", self.header.delta_size.to_string()),
            ("es offsets", self.header.uses_es_offsets.to_string()),
            ("range maps", self.header.has_range_maps().to_string()),
            ("artifact size", self.mmap.len().to_string()),
        ];
        if let Some(Ok(entries)) = self.index.get() {
            info.push(("index blocks", entries.block_count().to_string()));
        }
        info
    }

    fn entry_index(&self) -> Result<&EntryIndex> {
        self.index
            .get_or_init(|| self.build_entry_index())
            .as_ref()
            .map_err(|s| (*s).into())
    }

    /// Entry table location, checked against the mapped file
    fn table_bounds(&self) -> std::result::Result<TableBounds, IndexFailure> {
        let available = (self.mmap.len() - FOOTER_SIZE) as u64;
        let entry_count = self.header.entry_count;
        let needed = entry_count
            .checked_mul(ENTRY_SIZE as u64)
            .and_then(|len| len.checked_add(self.table_offset as u64));
        if needed.is_none_or(|n| n > available) {
            let needed = needed.unwrap_or(u64::MAX);
            warn!(
                "Entry table of {} truncated: {} entries need {} bytes, {} available",
                self.path.display(),
                entry_count,
                needed,
                available
            );
            return Err(IndexFailure::Truncated {
                entry_count,
                needed,
                available,
            });
        }

        Ok(TableBounds {
            offset: self.table_offset,
            count: entry_count as usize,
        })
    }

    fn build_entry_index(&self) -> std::result::Result<EntryIndex, IndexFailure> {
        let bounds = self.table_bounds()?;
        let table = &self.mmap[bounds.offset..bounds.end()];

        let declared = self.header.original_size;
        let covered = bounds.count.checked_sub(1).map_or(0, |last| {
            entry_offset_at(table, last).saturating_add(entry_length_at(table, last))
        });
        if covered != declared {
            warn!(
                "Entries of {} end at {} but the header declares {} bytes",
                self.path.display(),
                covered,
                declared
            );
            return Err(IndexFailure::SizeMismatch { declared, covered });
        }

        let index = EntryIndex::build(table, bounds, declared, self.config.block_size);
        debug!(
            "Built block index for {}: {} entries, {} blocks",
            self.path.display(),
            bounds.count,
            index.block_count()
        );
        Ok(index)
    }

    fn entry_table(&self, entries: &EntryIndex) -> &[u8] {
        let bounds = entries.bounds();
        &self.mmap[bounds.offset..bounds.end()]
    }

    fn copy_entry(&self, entry: &Entry, within: u64, out: &mut [u8]) -> Result<()> {
        if entry.is_lpcm {
            return lpcm::read_swapped(within, entry.length, out, |start, raw| {
                self.copy_raw(entry, start, raw)
            });
        }
        self.copy_raw(entry, within, out)
    }

    fn copy_raw(&self, entry: &Entry, within: u64, out: &mut [u8]) -> Result<()> {
        let offset = entry.source_offset.saturating_add(within);

        let Some(index) = entry.source_index() else {
            let delta = self.delta_section();
            let bytes =
                bounded(delta, offset, out.len()).ok_or_else(|| StorageError::OutOfBounds {
                    section: "delta section".to_string(),
                    offset,
                    len: out.len() as u64,
                    available: delta.len() as u64,
                })?;
            out.copy_from_slice(bytes);
            return Ok(());
        };

        if self.header.uses_es_offsets {
            let es_reader = self.es_reader(entry.mkv_offset)?;
            let source = self.sources.data(index)?;
            let key = StreamKey::new(index as u16, entry.stream_kind());
            return es_reader.read_es(key, offset, out, source);
        }

        out.copy_from_slice(self.sources.slice(index, offset, out.len())?);
        Ok(())
    }

    fn es_reader(&self, offset: u64) -> Result<&dyn EsReader> {
        match self.es_reader.get_or_init(|| self.load_range_maps()) {
            Ok(Some(reader)) => Ok(reader.as_ref()),
            Ok(None) => Err(StorageError::MissingEsReader { offset }),
            Err(e) => Err(e.clone().into()),
        }
    }

    fn load_range_maps(&self) -> EsReaderSlot {
        if !self.header.has_range_maps() {
            return Ok(None);
        }

        let start = (self.header.entry_count as usize)
            .checked_mul(ENTRY_SIZE)
            .and_then(|len| len.checked_add(self.table_offset));
        let end = self.header.delta_offset as usize;
        let section = start
            .and_then(|start| self.mmap.get(start..end))
            .ok_or_else(|| {
                RangeMapError::Section(format!(
                    "range-map section would end at {end}, before the entry table"
                ))
            })?;

        let (section, _) = RangeMapSection::parse(section)?;
        let reader =
            RangeMapEsReader::from_section(&section, &self.config.range_map_options())
                .map_err(|e| RangeMapError::Section(e.to_string()))?;
        debug!(
            "Decoded {} range maps from {}",
            reader.stream_count(),
            self.path.display()
        );
        Ok(Some(Arc::new(reader)))
    }
}

impl std::fmt::Debug for DedupReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("sources", &self.sources)
            .field("entry_access", &self.index.get().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::writer::{DedupWriter, MatchResult};
    use std::fs;
    use tempfile::TempDir;

    fn write_artifact(dir: &TempDir, delta: &[u8]) -> PathBuf {
        let path = dir.path().join("delta-only.mkvdup");
        let mut writer = DedupWriter::create(&path).unwrap();
        writer.set_header(delta.len() as u64, checksum(delta), SourceType::Dvd, false);
        writer
            .set_match_result(
                MatchResult {
                    entries: vec![
                        Entry::delta(0, 3, 0),
                        Entry::delta(3, delta.len() as u64 - 3, 3),
                    ],
                    delta: delta.to_vec(),
                },
                None,
            )
            .unwrap();
        writer.write().unwrap();
        path
    }

    #[test]
    fn test_delta_only_artifact() {
        let dir = TempDir::new().unwrap();
        let path = write_artifact(&dir, b"hello, world");
        let reader = DedupReader::open(&path, dir.path()).unwrap();

        assert_eq!(reader.original_size(), 12);
        assert_eq!(reader.entry_count(), 2);
        assert!(reader.source_files().is_empty());

        let mut buf = [0u8; 32];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 12);
        assert_eq!(&buf[..12], b"hello, world");
        assert_eq!(reader.read_at(&mut buf, 7).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(reader.read_at(&mut buf, 12).unwrap(), 0);
        assert_eq!(reader.read_at(&mut buf, 1000).unwrap(), 0);

        reader.verify_integrity().unwrap();
        reader.check_coverage().unwrap();
    }

    #[test]
    fn test_lazy_entry_access() {
        let dir = TempDir::new().unwrap();
        let path = write_artifact(&dir, b"lazy entries");
        let reader = DedupReader::open(&path, dir.path()).unwrap();

        assert!(reader.index.get().is_none());
        assert!(!reader.info().iter().any(|(k, _)| *k == "index blocks"));

        reader.init_entry_access().unwrap();
        assert!(reader.index.get().is_some());
        assert!(reader.info().iter().any(|(k, _)| *k == "index blocks"));
        assert_eq!(reader.entry(1).unwrap(), Some(Entry::delta(3, 9, 3)));
        assert_eq!(reader.entry(2).unwrap(), None);
    }

    #[test]
    fn test_truncated_entry_table_is_reported_to_every_caller() {
        let dir = TempDir::new().unwrap();
        let path = write_artifact(&dir, b"0123456789");

        // claim far more entries than the file holds
        let mut bytes = fs::read(&path).unwrap();
        bytes[36..44].copy_from_slice(&1_000_000u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let reader = DedupReader::open(&path, dir.path()).unwrap();
        let mut buf = [0u8; 4];
        for _ in 0..2 {
            assert!(matches!(
                reader.read_at(&mut buf, 0),
                Err(StorageError::EntryTableTruncated {
                    entry_count: 1_000_000,
                    ..
                })
            ));
        }
        assert!(reader.verify_integrity().is_err());
    }

    #[test]
    fn test_original_size_must_match_entries() {
        let dir = TempDir::new().unwrap();
        let path = write_artifact(&dir, b"abcd");

        // the header is outside both checksums; inflate the declared size
        let mut bytes = fs::read(&path).unwrap();
        bytes[16..24].copy_from_slice(&(1u64 << 62).to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let reader = DedupReader::open(&path, dir.path()).unwrap();
        assert!(matches!(
            reader.init_entry_access(),
            Err(StorageError::SizeMismatch {
                declared,
                covered: 4,
            }) if declared == 1 << 62
        ));

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read_at(&mut buf, 0),
            Err(StorageError::SizeMismatch { .. })
        ));
        reader.verify_integrity().unwrap();
    }

    #[test]
    fn test_missing_es_reader() {
        let dir = TempDir::new().unwrap();
        let source: Vec<u8> = (0..64u8).collect();
        fs::write(dir.path().join("title.vob"), &source).unwrap();

        let path = dir.path().join("es.mkvdup");
        let mut writer = DedupWriter::create(&path).unwrap();
        writer.set_header(8, 0, SourceType::Dvd, true);
        writer
            .set_source_files(vec![
                SourceFile::new("title.vob", 64, checksum(&source)).unwrap(),
            ])
            .unwrap();
        writer
            .set_match_result(
                MatchResult {
                    entries: vec![Entry::from_source(0, 8, 1, 0).video()],
                    delta: Vec::new(),
                },
                None,
            )
            .unwrap();
        writer.write().unwrap();

        let reader = DedupReader::open(&path, dir.path()).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            reader.read_at(&mut buf, 0),
            Err(StorageError::MissingEsReader { offset: 0 })
        ));
    }

    #[test]
    fn test_delta_section_outside_file() {
        let dir = TempDir::new().unwrap();
        let path = write_artifact(&dir, b"0123456789");

        let mut bytes = fs::read(&path).unwrap();
        bytes[52..60].copy_from_slice(&10_000u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            DedupReader::open(&path, dir.path()),
            Err(StorageError::Format(FormatError::Truncated { .. }))
        ));
    }
}

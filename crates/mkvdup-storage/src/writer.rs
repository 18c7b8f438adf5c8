//! Artifact writer
//!
//! Collects header fields, the source table, a match result and optional
//! range maps, then writes the whole artifact in one linear pass through a
//! buffered file. Both section checksums are accumulated while writing.
//!
//! There is no temp-file/rename step: a failed write can leave a partial
//! file at the destination.

use crate::converter::EsConverter;
use crate::validation::validate_entries;
use crate::{DedupConfig, Result, StorageError};
use mkvdup_formats::dedup::{FLAG_RANGE_MAPS, FOOTER_SIZE, FormatError};
use mkvdup_formats::range_map::RangeMapSection;
use mkvdup_formats::{
    DedupFooter, DedupHeader, ENTRY_SIZE, EncodedRangeMap, Entry, RangeEntry, RangeMapEncoder,
    SectionHasher, SourceFile, SourceType, StreamKind,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Entries between progress callbacks
const PROGRESS_ENTRIES: usize = 64 * 1024;

/// Delta bytes between progress callbacks
const DELTA_CHUNK: usize = 1024 * 1024;

/// Output of the external matcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Entries in reconstructed-file order
    pub entries: Vec<Entry>,
    /// Bytes with no source counterpart
    pub delta: Vec<u8>,
}

/// Single-pass artifact writer
pub struct DedupWriter {
    path: PathBuf,
    out: BufWriter<File>,
    config: DedupConfig,
    header: DedupHeader,
    sources: Vec<SourceFile>,
    entries: Vec<Entry>,
    delta: Vec<u8>,
    range_maps: Vec<EncodedRangeMap>,
}

impl DedupWriter {
    /// Create the destination file with default configuration
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, DedupConfig::default())
    }

    /// Create the destination file
    pub fn create_with_config(path: impl AsRef<Path>, config: DedupConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        debug!("Created dedup file {}", path.display());

        Ok(Self {
            path,
            out: BufWriter::new(file),
            config,
            header: DedupHeader::new(0, 0, SourceType::Dvd),
            sources: Vec::new(),
            entries: Vec::new(),
            delta: Vec::new(),
            range_maps: Vec::new(),
        })
    }

    /// Describe the reconstructed file
    ///
    /// Call before [`set_match_result`](Self::set_match_result): whether
    /// entries use ES offsets decides if the converter runs.
    pub fn set_header(
        &mut self,
        original_size: u64,
        original_checksum: u64,
        source_type: SourceType,
        uses_es_offsets: bool,
    ) {
        self.header.original_size = original_size;
        self.header.original_checksum = original_checksum;
        self.header.source_type = source_type;
        self.header.uses_es_offsets = uses_es_offsets;
    }

    /// Set the source-file table
    pub fn set_source_files(&mut self, files: Vec<SourceFile>) -> Result<()> {
        if files.len() > usize::from(u16::MAX) {
            return Err(FormatError::FieldOverflow {
                field: "source file count",
                value: files.len() as u64,
            }
            .into());
        }
        self.sources = files;
        Ok(())
    }

    /// Store range maps for ES-addressed entries
    pub fn set_range_maps(&mut self, maps: Vec<EncodedRangeMap>) {
        self.range_maps = maps;
    }

    /// Encode one stream's ES-to-raw ranges and store the result
    ///
    /// Uses the codec options from this writer's configuration.
    pub fn add_range_map(
        &mut self,
        file_index: u16,
        kind: StreamKind,
        ranges: &[RangeEntry],
    ) -> Result<()> {
        let map = RangeMapEncoder::with_options(&self.config.range_map_options())
            .encode(file_index, kind, ranges)?;
        debug!(
            "Encoded range map for source {} {:?}: {} entries, {} bytes",
            file_index,
            kind,
            map.entry_count,
            map.data.len()
        );
        self.range_maps.push(map);
        Ok(())
    }

    /// Take the matcher's entries and delta bytes
    ///
    /// When the header declares ES offsets and a converter is supplied,
    /// every source entry is converted to raw-offset entries here and the
    /// artifact is written with raw offsets. Any conversion failure rejects
    /// the whole result.
    pub fn set_match_result(
        &mut self,
        result: MatchResult,
        converter: Option<&dyn EsConverter>,
    ) -> Result<()> {
        let MatchResult { entries, delta } = result;

        self.entries = match converter {
            Some(converter) if self.header.uses_es_offsets => {
                let converted = convert_entries(&entries, converter)?;
                debug!(
                    "Converted {} ES entries into {} raw entries",
                    entries.len(),
                    converted.len()
                );
                self.header.uses_es_offsets = false;
                converted
            }
            _ => entries,
        };
        self.delta = delta;
        Ok(())
    }

    /// Write the artifact
    ///
    /// Returns the number of bytes written.
    pub fn write(self) -> Result<u64> {
        self.write_with_progress(|_, _| {})
    }

    /// Write the artifact, reporting (written, total) bytes as it goes
    pub fn write_with_progress<F>(mut self, mut progress: F) -> Result<u64>
    where
        F: FnMut(u64, u64),
    {
        validate_entries(
            &self.entries,
            self.header.original_size,
            self.sources.len(),
            self.delta.len() as u64,
        )?;
        if let Some(map) = self
            .range_maps
            .iter()
            .find(|m| usize::from(m.key.file_index) >= self.sources.len())
        {
            return Err(StorageError::InvalidEntries(format!(
                "range map for source index {} but the table has {} files",
                map.key.file_index,
                self.sources.len()
            )));
        }

        let source_table = SourceFile::build_table(&self.sources)?;
        let range_section = if self.range_maps.is_empty() {
            Vec::new()
        } else {
            RangeMapSection::new(std::mem::take(&mut self.range_maps)).build()?
        };

        let mut header = self.header.clone();
        header.source_file_count = self.sources.len() as u16;
        header.entry_count = self.entries.len() as u64;
        header.creator_version = Some(self.config.creator_version.clone());
        header.used_flags = Some(used_flags(&self.entries, self.sources.len()));
        header.flags = if range_section.is_empty() {
            0
        } else {
            FLAG_RANGE_MAPS
        };

        let entries_len = (self.entries.len() * ENTRY_SIZE) as u64;
        header.delta_offset = (header.encoded_len() + source_table.len()) as u64
            + entries_len
            + range_section.len() as u64;
        header.delta_size = self.delta.len() as u64;
        let total = header.delta_offset + header.delta_size + FOOTER_SIZE as u64;

        let mut written = 0u64;
        let mut emit = |out: &mut BufWriter<File>, bytes: &[u8]| -> Result<()> {
            out.write_all(bytes)?;
            written += bytes.len() as u64;
            Ok(())
        };

        emit(&mut self.out, &header.build()?)?;
        emit(&mut self.out, &source_table)?;
        progress(written_so_far(&header, &source_table), total);

        let mut entry_hasher = SectionHasher::new();
        for chunk in self.entries.chunks(PROGRESS_ENTRIES) {
            for entry in chunk {
                let record = entry.to_bytes();
                entry_hasher.update(&record);
                emit(&mut self.out, &record)?;
            }
            progress(
                written_so_far(&header, &source_table) + entry_hasher.len(),
                total,
            );
        }

        emit(&mut self.out, &range_section)?;

        let mut delta_hasher = SectionHasher::new();
        for chunk in self.delta.chunks(DELTA_CHUNK) {
            delta_hasher.update(chunk);
            emit(&mut self.out, chunk)?;
            progress(header.delta_offset + delta_hasher.len(), total);
        }

        let footer = DedupFooter::new(entry_hasher.finish(), delta_hasher.finish());
        emit(&mut self.out, &footer.to_bytes()?)?;

        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        progress(total, total);

        info!(
            "Wrote dedup file {} ({} entries, {} delta bytes, {} bytes total)",
            self.path.display(),
            header.entry_count,
            header.delta_size,
            written
        );
        Ok(written)
    }
}

impl std::fmt::Debug for DedupWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupWriter")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("sources", &self.sources.len())
            .field("entries", &self.entries.len())
            .field("delta", &self.delta.len())
            .field("range_maps", &self.range_maps.len())
            .finish_non_exhaustive()
    }
}

fn written_so_far(header: &DedupHeader, source_table: &[u8]) -> u64 {
    (header.encoded_len() + source_table.len()) as u64
}

/// Replace each ES-addressed source entry with its raw-offset pieces
fn convert_entries(entries: &[Entry], converter: &dyn EsConverter) -> Result<Vec<Entry>> {
    let mut converted = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_delta() {
            converted.push(*entry);
            continue;
        }

        let pieces = converter
            .convert(entry)
            .map_err(|e| StorageError::Conversion {
                offset: entry.mkv_offset,
                reason: e.to_string(),
            })?;

        let mut next = entry.mkv_offset;
        for piece in &pieces {
            if piece.mkv_offset != next || piece.length == 0 || piece.source != entry.source {
                return Err(StorageError::Conversion {
                    offset: entry.mkv_offset,
                    reason: format!("converter returned a piece at offset {}", piece.mkv_offset),
                });
            }
            next = piece.end();
        }
        if next != entry.end() {
            return Err(StorageError::Conversion {
                offset: entry.mkv_offset,
                reason: format!(
                    "converted pieces end at {next}, entry ends at {}",
                    entry.end()
                ),
            });
        }

        converted.extend(pieces);
    }
    Ok(converted)
}

/// One flag per source, set when any entry references it
fn used_flags(entries: &[Entry], source_count: usize) -> Vec<bool> {
    let mut used = vec![false; source_count];
    for index in entries.iter().filter_map(Entry::source_index) {
        if let Some(flag) = used.get_mut(index) {
            *flag = true;
        }
    }
    used
}

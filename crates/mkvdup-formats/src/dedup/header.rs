//! Artifact header
//!
//! Every version shares the same 60-byte fixed prefix. Version 5 appends a
//! length-prefixed creator string, version 6 additionally appends one "used"
//! byte per source file. Whatever the on-disk version, parsing resolves to a
//! single [`DedupHeader`].

use super::error::{FormatError, Result};
use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Header magic
pub const MAGIC: [u8; 8] = *b"MKVDUP01";

/// Size of the fixed header prefix in bytes
pub const FIXED_HEADER_SIZE: usize = 60;

/// Version written by this crate
pub const CURRENT_VERSION: u32 = 6;

/// Oldest version that can still be read
pub const MIN_SUPPORTED_VERSION: u32 = 4;

/// Header flag: a range-map section follows the entry table
pub const FLAG_RANGE_MAPS: u32 = 0x0000_0001;

/// Kind of disc image the source files come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// DVD (VOB files / ISO)
    Dvd,
    /// Blu-ray (M2TS files / ISO)
    Bluray,
}

impl SourceType {
    /// On-disk byte
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Dvd => 0,
            Self::Bluray => 1,
        }
    }
}

impl TryFrom<u8> for SourceType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Dvd),
            1 => Ok(Self::Bluray),
            other => Err(FormatError::InvalidSourceType(other)),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dvd => f.write_str("DVD"),
            Self::Bluray => f.write_str("Blu-ray"),
        }
    }
}

/// On-disk versions, classified by how they must be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// Version 1: ES offsets with no range maps
    EsOffsets,
    /// Version 2: ES offsets resolved through the old ES reader
    LegacyEsReader,
    /// Version 3: one-byte source index
    NarrowSourceIndex,
    /// Version 4: fixed header only
    Base,
    /// Version 5: adds the creator string
    Creator,
    /// Version 6: adds per-source used flags
    UsedFlags,
}

impl FormatVersion {
    /// Classify a raw version number
    pub fn classify(version: u32) -> Result<Self> {
        match version {
            1 => Ok(Self::EsOffsets),
            2 => Ok(Self::LegacyEsReader),
            3 => Ok(Self::NarrowSourceIndex),
            4 => Ok(Self::Base),
            5 => Ok(Self::Creator),
            6 => Ok(Self::UsedFlags),
            other => Err(FormatError::UnsupportedVersion(other)),
        }
    }

    /// Fail for versions whose semantics changed incompatibly
    pub fn ensure_readable(self, version: u32) -> Result<Self> {
        let reason = match self {
            Self::EsOffsets => "elementary-stream offsets without range maps",
            Self::LegacyEsReader => "elementary-stream offsets from the old stream reader",
            Self::NarrowSourceIndex => "a one-byte source index",
            Self::Base | Self::Creator | Self::UsedFlags => return Ok(self),
        };
        Err(FormatError::LegacyVersion { version, reason })
    }

    const fn has_creator(self) -> bool {
        matches!(self, Self::Creator | Self::UsedFlags)
    }

    const fn has_used_flags(self) -> bool {
        matches!(self, Self::UsedFlags)
    }
}

/// The fixed 60-byte prefix exactly as stored
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
struct FixedHeader {
    magic: [u8; 8],
    version: u32,
    flags: u32,
    original_size: u64,
    original_checksum: u64,
    source_type: u8,
    uses_es_offsets: u8,
    source_file_count: u16,
    entry_count: u64,
    delta_offset: u64,
    delta_size: u64,
}

/// u16-length-prefixed byte string
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub(crate) struct PrefixedBytes {
    pub(crate) len: u16,
    #[br(count = len)]
    pub(crate) bytes: Vec<u8>,
}

impl PrefixedBytes {
    pub(crate) fn new(bytes: &[u8], field: &'static str) -> Result<Self> {
        let len = u16::try_from(bytes.len()).map_err(|_| FormatError::FieldOverflow {
            field,
            value: bytes.len() as u64,
        })?;
        Ok(Self {
            len,
            bytes: bytes.to_vec(),
        })
    }
}

/// Artifact header, normalized to the current version's shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupHeader {
    /// Version the header was read from (or will be written as)
    pub version: u32,
    /// Feature flags (see [`FLAG_RANGE_MAPS`])
    pub flags: u32,
    /// Size of the reconstructed file
    pub original_size: u64,
    /// XXH64 of the reconstructed file
    pub original_checksum: u64,
    /// Disc image type
    pub source_type: SourceType,
    /// Entry source offsets are elementary-stream offsets
    pub uses_es_offsets: bool,
    /// Number of source-file records
    pub source_file_count: u16,
    /// Number of entry records
    pub entry_count: u64,
    /// Absolute file offset of the delta section
    pub delta_offset: u64,
    /// Length of the delta section
    pub delta_size: u64,
    /// Tool version that produced the artifact (version 5+)
    pub creator_version: Option<String>,
    /// One flag per source file (version 6+)
    pub used_flags: Option<Vec<bool>>,
}

impl DedupHeader {
    /// Current-version header with empty layout fields
    pub fn new(original_size: u64, original_checksum: u64, source_type: SourceType) -> Self {
        Self {
            version: CURRENT_VERSION,
            flags: 0,
            original_size,
            original_checksum,
            source_type,
            uses_es_offsets: false,
            source_file_count: 0,
            entry_count: 0,
            delta_offset: 0,
            delta_size: 0,
            creator_version: None,
            used_flags: None,
        }
    }

    /// Whether a range-map section follows the entry table
    pub const fn has_range_maps(&self) -> bool {
        self.flags & FLAG_RANGE_MAPS != 0
    }

    /// Whether the 0-based source `index` is referenced by any entry
    ///
    /// Headers without used flags report every source as used.
    pub fn is_source_used(&self, index: usize) -> bool {
        match &self.used_flags {
            Some(flags) => flags.get(index).copied().unwrap_or(false),
            None => index < usize::from(self.source_file_count),
        }
    }

    /// Parse a header from the start of `data`
    ///
    /// Returns the header and the number of bytes it occupies.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(FormatError::Truncated {
                section: "header",
                expected: FIXED_HEADER_SIZE as u64,
                actual: data.len() as u64,
            });
        }

        let mut cursor = Cursor::new(data);
        let fixed = FixedHeader::read_le(&mut cursor)?;
        if fixed.magic != MAGIC {
            return Err(FormatError::InvalidMagic(fixed.magic));
        }

        let layout = FormatVersion::classify(fixed.version)?.ensure_readable(fixed.version)?;

        let creator_version = if layout.has_creator() {
            let raw = PrefixedBytes::read_le(&mut cursor).map_err(|_| truncated(data))?;
            Some(String::from_utf8_lossy(&raw.bytes).into_owned())
        } else {
            None
        };

        let used_flags = if layout.has_used_flags() {
            let mut flags = vec![0u8; usize::from(fixed.source_file_count)];
            let start = cursor.position() as usize;
            let raw = data
                .get(start..start + flags.len())
                .ok_or_else(|| truncated(data))?;
            flags.copy_from_slice(raw);
            cursor.set_position((start + flags.len()) as u64);
            Some(flags.into_iter().map(|b| b != 0).collect())
        } else {
            None
        };

        let header = Self {
            version: fixed.version,
            flags: fixed.flags,
            original_size: fixed.original_size,
            original_checksum: fixed.original_checksum,
            source_type: SourceType::try_from(fixed.source_type)?,
            uses_es_offsets: fixed.uses_es_offsets != 0,
            source_file_count: fixed.source_file_count,
            entry_count: fixed.entry_count,
            delta_offset: fixed.delta_offset,
            delta_size: fixed.delta_size,
            creator_version,
            used_flags,
        };

        Ok((header, cursor.position() as usize))
    }

    /// Serialize as the current version
    pub fn build(&self) -> Result<Vec<u8>> {
        let fixed = FixedHeader {
            magic: MAGIC,
            version: CURRENT_VERSION,
            flags: self.flags,
            original_size: self.original_size,
            original_checksum: self.original_checksum,
            source_type: self.source_type.as_u8(),
            uses_es_offsets: u8::from(self.uses_es_offsets),
            source_file_count: self.source_file_count,
            entry_count: self.entry_count,
            delta_offset: self.delta_offset,
            delta_size: self.delta_size,
        };

        let mut buffer = Vec::with_capacity(self.encoded_len());
        let mut cursor = Cursor::new(&mut buffer);
        fixed.write_le(&mut cursor)?;

        let creator = self.creator_version.as_deref().unwrap_or_default();
        PrefixedBytes::new(creator.as_bytes(), "creator version")?.write_le(&mut cursor)?;

        let count = usize::from(self.source_file_count);
        let flags: Vec<u8> = (0..count)
            .map(|i| u8::from(self.is_source_used(i)))
            .collect();
        flags.write_le(&mut cursor)?;

        Ok(buffer)
    }

    /// Length of [`build`](Self::build)'s output
    pub fn encoded_len(&self) -> usize {
        let creator = self.creator_version.as_deref().map_or(0, str::len);
        FIXED_HEADER_SIZE + 2 + creator + usize::from(self.source_file_count)
    }
}

fn truncated(data: &[u8]) -> FormatError {
    FormatError::Truncated {
        section: "extended header",
        expected: FIXED_HEADER_SIZE as u64 + 2,
        actual: data.len() as u64,
    }
}

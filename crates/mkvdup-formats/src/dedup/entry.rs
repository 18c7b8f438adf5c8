//! Entry records
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 8 | reconstructed-file offset |
//! | 8 | 8 | length |
//! | 16 | 2 | source (0 = delta, N = source file N-1) |
//! | 18 | 8 | source offset |
//! | 26 | 1 | flags |
//! | 27 | 1 | audio sub-stream id |
//!
//! The source offset starts at byte 18, so records are never 8-byte aligned
//! and every field is decoded from an unaligned slice.

use crate::range_map::StreamKind;

/// Size of one entry record
pub const ENTRY_SIZE: usize = 28;

/// Entry flag: region comes from the video stream
pub const FLAG_VIDEO: u8 = 0x01;

/// Entry flag: region holds big-endian 16-bit LPCM samples
pub const FLAG_LPCM: u8 = 0x02;

/// Maps one region of the reconstructed file to its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Entry {
    /// Start offset in the reconstructed file
    pub mkv_offset: u64,
    /// Region length
    pub length: u64,
    /// 0 for the delta section, otherwise a 1-based source-file index
    pub source: u16,
    /// Offset within the delta section, the source file, or the ES
    pub source_offset: u64,
    /// Region belongs to the video stream
    pub is_video: bool,
    /// Audio sub-stream id (ES addressing only)
    pub audio_sub_stream: u8,
    /// Source bytes must be byte-swapped on read
    pub is_lpcm: bool,
}

impl Entry {
    /// Region served from the delta section
    pub const fn delta(mkv_offset: u64, length: u64, delta_offset: u64) -> Self {
        Self {
            mkv_offset,
            length,
            source: 0,
            source_offset: delta_offset,
            is_video: false,
            audio_sub_stream: 0,
            is_lpcm: false,
        }
    }

    /// Region served from source file `source` (1-based)
    pub const fn from_source(mkv_offset: u64, length: u64, source: u16, source_offset: u64) -> Self {
        Self {
            mkv_offset,
            length,
            source,
            source_offset,
            is_video: false,
            audio_sub_stream: 0,
            is_lpcm: false,
        }
    }

    /// Mark as a video region
    #[must_use]
    pub const fn video(mut self) -> Self {
        self.is_video = true;
        self
    }

    /// Mark as an audio region of sub-stream `id`
    #[must_use]
    pub const fn audio(mut self, id: u8) -> Self {
        self.is_video = false;
        self.audio_sub_stream = id;
        self
    }

    /// Mark the region as big-endian LPCM
    #[must_use]
    pub const fn lpcm(mut self) -> Self {
        self.is_lpcm = true;
        self
    }

    /// First reconstructed-file offset after this region
    pub const fn end(&self) -> u64 {
        self.mkv_offset + self.length
    }

    /// Whether the region is served from the delta section
    pub const fn is_delta(&self) -> bool {
        self.source == 0
    }

    /// 0-based source-table index, `None` for delta entries
    pub const fn source_index(&self) -> Option<usize> {
        match self.source {
            0 => None,
            n => Some(n as usize - 1),
        }
    }

    /// Elementary stream the region belongs to
    pub const fn stream_kind(&self) -> StreamKind {
        if self.is_video {
            StreamKind::Video
        } else {
            StreamKind::Audio(self.audio_sub_stream)
        }
    }

    /// Packed flag byte
    pub const fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.is_video {
            flags |= FLAG_VIDEO;
        }
        if self.is_lpcm {
            flags |= FLAG_LPCM;
        }
        flags
    }

    /// Serialize to the 28-byte record
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.mkv_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..18].copy_from_slice(&self.source.to_le_bytes());
        buf[18..26].copy_from_slice(&self.source_offset.to_le_bytes());
        buf[26] = self.flags();
        buf[27] = self.audio_sub_stream;
        buf
    }

    /// Parse from a record slice; `None` when fewer than 28 bytes remain
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let record = data.get(..ENTRY_SIZE)?;
        let flags = record[26];
        Some(Self {
            mkv_offset: le_u64(record, 0),
            length: le_u64(record, 8),
            source: u16::from_le_bytes([record[16], record[17]]),
            source_offset: le_u64(record, 18),
            is_video: flags & FLAG_VIDEO != 0,
            audio_sub_stream: record[27],
            is_lpcm: flags & FLAG_LPCM != 0,
        })
    }
}

/// Entry `index` of a raw entry table
pub fn entry_at(table: &[u8], index: usize) -> Option<Entry> {
    Entry::from_bytes(table.get(index.checked_mul(ENTRY_SIZE)?..)?)
}

/// Reconstructed-file offset of entry `index`, without decoding the record
///
/// Callers must ensure `index` is within the table.
pub fn entry_offset_at(table: &[u8], index: usize) -> u64 {
    le_u64(table, index * ENTRY_SIZE)
}

/// Length of entry `index`, without decoding the record
///
/// Callers must ensure `index` is within the table.
pub fn entry_length_at(table: &[u8], index: usize) -> u64 {
    le_u64(table, index * ENTRY_SIZE + 8)
}

fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}

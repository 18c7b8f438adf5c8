//! Range maps: elementary-stream offset to raw file offset translation
//!
//! A disc-image source file interleaves many elementary streams in packets.
//! For one stream, the range map lists where each payload chunk lives in the
//! raw file, in elementary-stream (ES) order. ES offsets are implicit: the
//! first chunk starts at ES offset 0 and each following chunk starts where the
//! previous one ended.
//!
//! # Wire format
//!
//! - First entry: `uvarint(file_offset)`, `uvarint(size)`
//! - Default run: `0x00`, `uvarint(count)`; `count` entries each of
//!   `default_size` bytes, `default_gap` bytes after the previous entry
//! - Explicit entry: `uvarint(zigzag(file_offset - predicted) + 1)`,
//!   `uvarint(size)` where `predicted = previous_end + default_gap`
//!
//! The `+ 1` keeps explicit tokens from ever starting with the `0x00` run
//! marker.
//!
//! # Usage
//!
//! ```rust
//! use mkvdup_formats::range_map::{RangeEntry, RangeMapEncoder, StreamKind, StreamRangeMap};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let entries: Vec<RangeEntry> = (0..100u64)
//!     .map(|i| RangeEntry::new(i * 184, 4 + i * 188, 184))
//!     .collect();
//!
//! let encoded = RangeMapEncoder::new().encode(0, StreamKind::Video, &entries)?;
//! let map = StreamRangeMap::from_encoded(&encoded)?;
//! assert_eq!(map.total_size(), 100 * 184);
//!
//! let source = vec![0u8; 100 * 188 + 4];
//! let mut buf = [0u8; 400];
//! map.read_at(1000, &mut buf, &source)?;
//! # Ok(())
//! # }
//! ```

pub mod encoder;
pub mod error;
pub mod section;
pub mod stream;

pub use encoder::RangeMapEncoder;
pub use error::{RangeMapError, Result};
pub use section::{RANGE_MAP_MAGIC, RangeMapSection};
pub use stream::StreamRangeMap;

use serde::{Deserialize, Serialize};

/// Logical entries between coarse-index checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1024;

/// Leading entries examined when choosing the default (gap, size) pair
pub const DEFAULT_SAMPLE_LIMIT: usize = 10_000;

/// Byte that introduces a default run
pub const RUN_MARKER: u8 = 0x00;

/// One chunk of an elementary stream located in the raw file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    /// Offset within the elementary stream
    pub es_offset: u64,
    /// Offset within the raw source file
    pub file_offset: u64,
    /// Chunk length in bytes
    pub size: u64,
}

impl RangeEntry {
    /// Create a new range entry
    pub const fn new(es_offset: u64, file_offset: u64, size: u64) -> Self {
        Self {
            es_offset,
            file_offset,
            size,
        }
    }

    /// First raw byte after this chunk
    pub const fn file_end(&self) -> u64 {
        self.file_offset + self.size
    }

    /// First ES byte after this chunk
    pub const fn es_end(&self) -> u64 {
        self.es_offset + self.size
    }
}

/// Which elementary stream of a source a range map describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    /// The (single) video stream
    Video,
    /// An audio stream, keyed by sub-stream id
    Audio(u8),
}

impl StreamKind {
    /// Stream type byte: 0 = video, 1 = audio
    pub const fn stream_type(&self) -> u8 {
        match self {
            Self::Video => 0,
            Self::Audio(_) => 1,
        }
    }

    /// Sub-stream id byte (0 for video)
    pub const fn sub_stream_id(&self) -> u8 {
        match self {
            Self::Video => 0,
            Self::Audio(id) => *id,
        }
    }

    /// Rebuild from the on-disk type and sub-stream bytes
    pub fn from_parts(stream_type: u8, sub_stream_id: u8) -> Result<Self> {
        match stream_type {
            0 => Ok(Self::Video),
            1 => Ok(Self::Audio(sub_stream_id)),
            other => Err(RangeMapError::UnknownStreamType(other)),
        }
    }
}

/// Identifies one stream of one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// 0-based index into the source-file table
    pub file_index: u16,
    /// Stream within that file
    pub kind: StreamKind,
}

impl StreamKey {
    /// Create a stream key
    pub const fn new(file_index: u16, kind: StreamKind) -> Self {
        Self { file_index, kind }
    }
}

/// A compressed range map as stored in the artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRangeMap {
    /// Stream this map belongs to
    pub key: StreamKey,
    /// Number of logical entries
    pub entry_count: u32,
    /// Implicit gap between default entries (0 when RLE is disabled)
    pub default_gap: u16,
    /// Implicit size of default entries (0 when RLE is disabled)
    pub default_size: u16,
    /// Token stream
    pub data: Vec<u8>,
}

impl EncodedRangeMap {
    /// Whether run-length encoding is active for this map
    pub const fn rle_enabled(&self) -> bool {
        self.default_size != 0
    }
}

/// Tuning knobs for the codec
///
/// Neither knob affects correctness. The sample limit trades encoder time for
/// compression ratio on streams whose packet pattern changes late; the
/// checkpoint interval trades index memory for seek distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMapOptions {
    /// Leading entries sampled to pick the default (gap, size)
    pub sample_limit: usize,
    /// Logical entries between coarse-index checkpoints
    pub checkpoint_interval: u64,
}

impl Default for RangeMapOptions {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_kind_parts() {
        assert_eq!(StreamKind::Video.stream_type(), 0);
        assert_eq!(StreamKind::Audio(0x81).stream_type(), 1);
        assert_eq!(StreamKind::Audio(0x81).sub_stream_id(), 0x81);
        assert_eq!(
            StreamKind::from_parts(1, 0xA0).unwrap(),
            StreamKind::Audio(0xA0)
        );
        assert_eq!(StreamKind::from_parts(0, 9).unwrap(), StreamKind::Video);
        assert!(matches!(
            StreamKind::from_parts(2, 0),
            Err(RangeMapError::UnknownStreamType(2))
        ));
    }

    #[test]
    fn test_range_entry_ends() {
        let e = RangeEntry::new(10, 1000, 24);
        assert_eq!(e.es_end(), 34);
        assert_eq!(e.file_end(), 1024);
    }
}

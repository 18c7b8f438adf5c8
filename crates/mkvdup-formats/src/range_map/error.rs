//! Error types for the range-map codec

use crate::varint::VarintError;
use thiserror::Error;

/// Errors raised while encoding, decoding or reading through a range map
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeMapError {
    /// Compressed data ended inside a token
    #[error("Truncated range-map data at logical entry {index} (byte {byte_offset})")]
    Truncated {
        /// Logical entry being decoded
        index: u64,
        /// Position in the compressed stream
        byte_offset: usize,
    },

    /// A varint in the stream overflowed
    #[error("Malformed varint at logical entry {index} (byte {byte_offset})")]
    MalformedVarint {
        /// Logical entry being decoded
        index: u64,
        /// Position in the compressed stream
        byte_offset: usize,
    },

    /// Elementary-stream offsets are not contiguous
    #[error("ES offset gap at logical entry {index}: expected {expected}, got {actual}")]
    EsOffsetGap {
        /// Logical entry where the gap was found
        index: u64,
        /// ES offset implied by the previous entry
        expected: u64,
        /// ES offset actually found
        actual: u64,
    },

    /// File offsets went backwards or overlapped the previous entry
    #[error("File offset {actual} at logical entry {index} precedes end of previous entry {previous_end}")]
    NonMonotonic {
        /// Logical entry index
        index: u64,
        /// End of the previous entry in the raw file
        previous_end: u64,
        /// Offending file offset
        actual: u64,
    },

    /// Entries must carry at least one byte
    #[error("Zero-size range at logical entry {index}")]
    ZeroSize {
        /// Logical entry index
        index: u64,
    },

    /// A run marker declared zero entries
    #[error("Empty run marker at logical entry {index} (byte {byte_offset})")]
    EmptyRun {
        /// Logical entry index
        index: u64,
        /// Position in the compressed stream
        byte_offset: usize,
    },

    /// Decoded offset does not fit the address space
    #[error("Offset arithmetic overflow at logical entry {index}")]
    OffsetOverflow {
        /// Logical entry index
        index: u64,
    },

    /// Bytes were left over after the declared entry count
    #[error("Range map declares {entry_count} entries but data continues at byte {byte_offset} of {data_len}")]
    TrailingData {
        /// Declared entry count
        entry_count: u64,
        /// First unconsumed byte
        byte_offset: usize,
        /// Total compressed length
        data_len: usize,
    },

    /// The stream decoded fewer entries than declared
    #[error("Range map declares {declared} entries but a run overruns it")]
    EntryCountMismatch {
        /// Declared entry count
        declared: u64,
    },

    /// Requested ES range is beyond the stream
    #[error("ES range {es_offset}+{len} outside stream of {total} bytes")]
    OutOfRange {
        /// Requested start
        es_offset: u64,
        /// Requested length
        len: u64,
        /// Logical stream size
        total: u64,
    },

    /// A computed raw read falls outside the source file
    #[error("Source read {file_offset}+{len} outside source of {source_len} bytes")]
    SourceOutOfBounds {
        /// Raw file offset
        file_offset: u64,
        /// Read length
        len: u64,
        /// Size of the mapped source
        source_len: u64,
    },

    /// More logical entries than the section can count
    #[error("Too many range entries: {0}")]
    TooManyEntries(usize),

    /// Bad magic at the start of the range-map section
    #[error("Invalid range-map section magic: {0:02x?}")]
    InvalidMagic([u8; 8]),

    /// Unknown stream type byte
    #[error("Unknown stream type {0}")]
    UnknownStreamType(u8),

    /// Binary parsing error in the section wrapper
    #[error("Range-map section parse error: {0}")]
    Section(String),
}

impl RangeMapError {
    pub(crate) fn from_varint(err: VarintError, index: u64) -> Self {
        match err {
            VarintError::Truncated { offset } => Self::Truncated {
                index,
                byte_offset: offset,
            },
            VarintError::Overflow { offset } => Self::MalformedVarint {
                index,
                byte_offset: offset,
            },
        }
    }
}

impl From<binrw::Error> for RangeMapError {
    fn from(e: binrw::Error) -> Self {
        Self::Section(e.to_string())
    }
}

/// Result type alias for range-map operations
pub type Result<T> = std::result::Result<T, RangeMapError>;

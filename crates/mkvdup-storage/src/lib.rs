//! File-backed engine for mkvdup dedup artifacts.
//!
//! A dedup artifact lets a large MKV file be served on demand from the disc
//! image it was remuxed from. This crate writes artifacts and reads them back
//! as if they were the original file:
//!
//! - **Writer**: serializes header, source table, entries, range maps, delta
//!   bytes and a checksummed footer in one buffered pass
//! - **Reader**: maps the artifact read-only, builds the entry block index
//!   lazily and answers arbitrary-offset reads from delta bytes, mapped
//!   source files or elementary-stream range maps
//! - **Cursor**: `Read + Seek` over a shared reader
//!
//! # Example
//!
//! ```rust,no_run
//! use mkvdup_storage::DedupReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = DedupReader::open("movie.mkvdup", "/mnt/disc")?;
//! reader.verify_integrity()?;
//!
//! let mut buf = vec![0u8; 64 * 1024];
//! let n = reader.read_at(&mut buf, 0)?;
//! println!("read {n} of {} bytes", reader.original_size());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use mkvdup_formats::{FormatError, RangeMapError};
use thiserror::Error;

// Artifact writer
pub mod writer;

// Random-access reader
pub mod reader;

// Read + Seek adapter
pub mod cursor;

// Source-file mapping
pub mod source;

// Elementary-stream seams
pub mod converter;
pub mod es_reader;

// Configuration
pub mod config;

// Entry invariant checks
pub mod validation;

pub use config::DedupConfig;
pub use converter::{EsConverter, RangeMapConverter};
pub use cursor::DedupCursor;
pub use es_reader::{EsReader, RangeMapEsReader};
pub use reader::DedupReader;
pub use source::SourceSet;
pub use writer::{DedupWriter, MatchResult};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while writing or reading artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact layout error (magic, version, truncation).
    #[error("Invalid format: {0}")]
    Format(#[from] FormatError),

    /// Range-map codec error.
    #[error("Range map error: {0}")]
    RangeMap(#[from] RangeMapError),

    /// Mapped file too small for the declared entry count.
    #[error(
        "Entry table truncated: {entry_count} entries need {needed} bytes, {available} available"
    )]
    EntryTableTruncated {
        /// Entry count from the header
        entry_count: u64,
        /// Bytes required up to the end of the table
        needed: u64,
        /// Bytes available before the footer
        available: u64,
    },

    /// Entry table does not end where the header says the file ends.
    #[error("Entries cover {covered} bytes but the header declares {declared}")]
    SizeMismatch {
        /// Original size from the header
        declared: u64,
        /// End of the last entry
        covered: u64,
    },

    /// A computed offset falls outside a mapped region.
    #[error("Read outside {section}: offset {offset} + {len} exceeds {available} bytes")]
    OutOfBounds {
        /// Region name
        section: String,
        /// Requested offset
        offset: u64,
        /// Requested length
        len: u64,
        /// Region size
        available: u64,
    },

    /// Section checksum does not match the footer.
    #[error("{section} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        /// Section name
        section: &'static str,
        /// Checksum recorded in the footer
        expected: u64,
        /// Recomputed checksum
        actual: u64,
    },

    /// ES-to-raw conversion failed; the write is aborted.
    #[error("Conversion failed for entry at offset {offset}: {reason}")]
    Conversion {
        /// Reconstructed-file offset of the entry
        offset: u64,
        /// Converter message
        reason: String,
    },

    /// Entries violate ordering or coverage.
    #[error("Invalid entries: {0}")]
    InvalidEntries(String),

    /// Entry addresses an elementary stream but nothing can resolve it.
    #[error("Entry at offset {offset} uses elementary-stream offsets but no ES reader is available")]
    MissingEsReader {
        /// Reconstructed-file offset of the entry
        offset: u64,
    },

    /// No range map exists for the requested stream.
    #[error("No range map for source {file_index} stream {stream}")]
    MissingRangeMap {
        /// 0-based source index
        file_index: u16,
        /// Stream description
        stream: String,
    },

    /// Source file size differs from the table.
    #[error("Source file {path} size mismatch: expected {expected}, got {actual}")]
    SourceSizeMismatch {
        /// Relative source path
        path: String,
        /// Size recorded in the artifact
        expected: u64,
        /// Size on disk
        actual: u64,
    },

    /// Source file checksum differs from the table.
    #[error("Source file {path} checksum mismatch: expected {expected}, got {actual}")]
    SourceChecksumMismatch {
        /// Relative source path
        path: String,
        /// Hex checksum recorded in the artifact
        expected: String,
        /// Hex checksum of the file on disk
        actual: String,
    },
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default reconstructed-file span covered by one block-index slot.
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

/// Hex form of a checksum as shown in diagnostics.
pub(crate) fn checksum_hex(checksum: u64) -> String {
    hex::encode(checksum.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_hex() {
        assert_eq!(checksum_hex(0x0123_4567_89AB_CDEF), "0123456789abcdef");
        assert_eq!(checksum_hex(0), "0000000000000000");
    }

    #[test]
    fn test_error_context() {
        let err = StorageError::OutOfBounds {
            section: "delta section".to_string(),
            offset: 100,
            len: 20,
            available: 110,
        };
        let msg = err.to_string();
        assert!(msg.contains("delta section"));
        assert!(msg.contains("100"));
        assert!(msg.contains("110"));

        let err: StorageError = FormatError::LegacyVersion {
            version: 1,
            reason: "elementary-stream offsets without range maps",
        }
        .into();
        assert!(err.to_string().contains("recreate"));
    }
}

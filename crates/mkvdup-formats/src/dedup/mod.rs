//! Layout of a dedup artifact
//!
//! ```text
//! header (60 bytes + creator string + used flags)
//! source-file table
//! entry table (28-byte records)
//! range-map section (optional, header flag bit 0)
//! delta section
//! footer (24 bytes)
//! ```

pub mod entry;
pub mod error;
pub mod footer;
pub mod header;
pub mod source_file;

pub use entry::{ENTRY_SIZE, Entry, FLAG_LPCM, FLAG_VIDEO, entry_length_at, entry_offset_at};
pub use error::{FormatError, Result};
pub use footer::{DedupFooter, FOOTER_MAGIC, FOOTER_SIZE};
pub use header::{
    CURRENT_VERSION, DedupHeader, FIXED_HEADER_SIZE, FLAG_RANGE_MAPS, FormatVersion, MAGIC,
    MIN_SUPPORTED_VERSION, SourceType,
};
pub use source_file::SourceFile;

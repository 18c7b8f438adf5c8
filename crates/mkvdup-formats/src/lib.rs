//! Binary layout and codecs for mkvdup dedup artifacts
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for zigzag arithmetic
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::doc_markdown)] // Many media terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::derive_partial_eq_without_eq)] // Binary format structs
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::use_self)] // Type clarity
//! A dedup artifact describes how to rebuild a large media container (an MKV
//! remux of a DVD or Blu-ray) from the original disc-image source files plus a
//! small set of bytes that have no counterpart in any source. This crate owns
//! the pieces of that artifact that need no file system:
//!
//! - **Varint**: unsigned LEB128 varints and zigzag mapping
//! - **Strided copy**: bulk gather of fixed-size payloads at a fixed stride
//! - **Range map**: delta + varint + run-length codec mapping elementary-stream
//!   offsets to raw file offsets, with a coarse index for O(log n) seeking
//! - **Dedup layout**: header, source-file table, entry record, footer
//! - **Checksum**: XXH64 over the entry table and delta section
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: every on-disk structure can be parsed and built
//! - **Zero-Copy Parsing**: entry fields are read straight out of the mapped bytes
//! - **Round-Trip Guarantee**: parse(build(data)) == data

#![warn(missing_docs)]

pub mod checksum;
/// Dedup artifact layout: header, source-file table, entries, footer
///
/// All fixed-width fields are little-endian. Entry records are 28 bytes and
/// therefore not naturally aligned; the accessors in [`dedup::entry`] decode
/// fields from unaligned slices.
pub mod dedup;
/// Range-map codec translating elementary-stream offsets to raw file offsets
///
/// Key features:
/// - **Implicit defaults**: the most common (gap, size) pair costs nothing
/// - **Run-length encoding**: default runs collapse to a two-token marker
/// - **Coarse index**: one checkpoint per 1024 logical entries
/// - **Cursor cache**: sequential reads resume where the last read stopped
/// - **Strided bulk copy**: default runs are copied without per-entry calls
pub mod range_map;
pub mod strided;
pub mod varint;

pub use checksum::SectionHasher;
pub use dedup::{
    CURRENT_VERSION, DedupFooter, DedupHeader, ENTRY_SIZE, Entry, FormatError, SourceFile,
    SourceType,
};
pub use range_map::{
    EncodedRangeMap, RangeEntry, RangeMapEncoder, RangeMapError, RangeMapOptions, StreamKey,
    StreamKind, StreamRangeMap,
};

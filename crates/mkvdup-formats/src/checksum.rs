//! Section checksums
//!
//! The entry table and the delta section each carry an XXH64 (seed 0) in the
//! footer. Source files are identified by the same hash over their full
//! contents.

use xxhash_rust::xxh64::Xxh64;

/// Seed used for every checksum in the artifact
pub const CHECKSUM_SEED: u64 = 0;

/// Streaming XXH64 hasher for one artifact section
pub struct SectionHasher {
    inner: Xxh64,
    bytes: u64,
}

impl SectionHasher {
    /// Create an empty hasher
    pub fn new() -> Self {
        Self {
            inner: Xxh64::new(CHECKSUM_SEED),
            bytes: 0,
        }
    }

    /// Feed more section bytes
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far
    pub const fn len(&self) -> u64 {
        self.bytes
    }

    /// Whether no bytes were hashed yet
    pub const fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Final checksum
    pub fn finish(&self) -> u64 {
        self.inner.digest()
    }
}

impl Default for SectionHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum of a complete section
pub fn checksum(data: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(data, CHECKSUM_SEED)
}

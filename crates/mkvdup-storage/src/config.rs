//! Configuration for writing and reading artifacts

use crate::DEFAULT_BLOCK_SIZE;
use mkvdup_formats::RangeMapOptions;
use mkvdup_formats::range_map::{DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_SAMPLE_LIMIT};
use serde::{Deserialize, Serialize};

/// Tuning for the writer and reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Reconstructed-file bytes covered by one block-index slot
    pub block_size: u64,

    /// Logical entries between range-map checkpoints
    pub checkpoint_interval: u64,

    /// Leading entries sampled when choosing range-map defaults
    pub sample_limit: usize,

    /// Run `verify_integrity` when opening an artifact
    pub verify_on_open: bool,

    /// Creator string recorded in new artifacts
    pub creator_version: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            verify_on_open: false,
            creator_version: format!("mkvdup {}", crate::VERSION),
        }
    }
}

impl DedupConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block-index granularity (clamped to at least 1 byte)
    #[must_use]
    pub fn with_block_size(mut self, size: u64) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Set the range-map checkpoint interval (clamped to at least 1)
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Set the range-map sample limit
    #[must_use]
    pub const fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Verify checksums on open
    #[must_use]
    pub const fn with_verify_on_open(mut self, verify: bool) -> Self {
        self.verify_on_open = verify;
        self
    }

    /// Set the creator string recorded in new artifacts
    #[must_use]
    pub fn with_creator_version(mut self, version: impl Into<String>) -> Self {
        self.creator_version = version.into();
        self
    }

    /// Codec options derived from this configuration
    pub const fn range_map_options(&self) -> RangeMapOptions {
        RangeMapOptions {
            sample_limit: self.sample_limit,
            checkpoint_interval: self.checkpoint_interval,
        }
    }
}

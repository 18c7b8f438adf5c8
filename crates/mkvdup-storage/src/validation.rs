//! Entry invariant checks
//!
//! A valid entry set is ordered by reconstructed offset, has no empty or
//! overlapping entries, leaves no holes, and covers `[0, original_size)`
//! exactly. Source indices must exist and delta entries must stay inside the
//! delta section.

use crate::{Result, StorageError};
use mkvdup_formats::Entry;

/// Streaming checker fed one entry at a time
#[derive(Debug, Clone)]
pub struct EntryValidator {
    original_size: u64,
    source_count: usize,
    delta_size: u64,
    next_offset: u64,
    index: u64,
}

impl EntryValidator {
    /// Checker for an artifact of the given shape
    pub const fn new(original_size: u64, source_count: usize, delta_size: u64) -> Self {
        Self {
            original_size,
            source_count,
            delta_size,
            next_offset: 0,
            index: 0,
        }
    }

    /// Check the next entry in table order
    pub fn push(&mut self, entry: &Entry) -> Result<()> {
        let index = self.index;

        if entry.length == 0 {
            return Err(invalid(format!(
                "entry {index} at offset {} has zero length",
                entry.mkv_offset
            )));
        }
        if entry.mkv_offset != self.next_offset {
            let problem = if entry.mkv_offset < self.next_offset {
                "overlaps its predecessor"
            } else {
                "leaves a hole after its predecessor"
            };
            return Err(invalid(format!(
                "entry {index} at offset {} {problem} (expected offset {})",
                entry.mkv_offset, self.next_offset
            )));
        }

        let end = entry
            .mkv_offset
            .checked_add(entry.length)
            .filter(|&end| end <= self.original_size)
            .ok_or_else(|| {
                invalid(format!(
                    "entry {index} at offset {} + {} runs past original size {}",
                    entry.mkv_offset, entry.length, self.original_size
                ))
            })?;

        match entry.source_index() {
            None => {
                let delta_end = entry.source_offset.checked_add(entry.length);
                if delta_end.is_none_or(|e| e > self.delta_size) {
                    return Err(StorageError::OutOfBounds {
                        section: "delta section".to_string(),
                        offset: entry.source_offset,
                        len: entry.length,
                        available: self.delta_size,
                    });
                }
            }
            Some(i) if i >= self.source_count => {
                return Err(invalid(format!(
                    "entry {index} references source {} but the table has {}",
                    entry.source, self.source_count
                )));
            }
            Some(_) => {}
        }

        self.next_offset = end;
        self.index += 1;
        Ok(())
    }

    /// Confirm the entries seen so far cover the whole file
    pub fn finish(self) -> Result<()> {
        if self.next_offset != self.original_size {
            return Err(invalid(format!(
                "{} entries cover {} of {} bytes",
                self.index, self.next_offset, self.original_size
            )));
        }
        Ok(())
    }
}

/// Validate a complete entry list
pub fn validate_entries<'a>(
    entries: impl IntoIterator<Item = &'a Entry>,
    original_size: u64,
    source_count: usize,
    delta_size: u64,
) -> Result<()> {
    let mut validator = EntryValidator::new(original_size, source_count, delta_size);
    for entry in entries {
        validator.push(entry)?;
    }
    validator.finish()
}

fn invalid(message: String) -> StorageError {
    StorageError::InvalidEntries(message)
}

//! Block index over the mapped entry table
//!
//! Slot `b` holds the index of the last entry starting at or before
//! `b * block_size`. The entry covering any offset in block `b` therefore
//! lies between slots `b` and `b + 1`, which keeps each binary search to a
//! handful of comparisons even for very large files.

use mkvdup_formats::ENTRY_SIZE;
use mkvdup_formats::dedup::{Entry, entry, entry_length_at, entry_offset_at};
use parking_lot::Mutex;

/// Upper bound on block slots per entry; more slots narrow nothing
const MAX_SLOTS_PER_ENTRY: u64 = 4;

/// Location of the entry table inside the artifact mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableBounds {
    pub(crate) offset: usize,
    pub(crate) count: usize,
}

impl TableBounds {
    pub(crate) const fn len(&self) -> usize {
        self.count * ENTRY_SIZE
    }

    pub(crate) const fn end(&self) -> usize {
        self.offset + self.len()
    }
}

/// Entry lookup structures built on first access
#[derive(Debug)]
pub(crate) struct EntryIndex {
    bounds: TableBounds,
    block_size: u64,
    blocks: Vec<usize>,
    last: Mutex<Option<(usize, Entry)>>,
}

impl EntryIndex {
    /// One linear pass over the table
    ///
    /// Blocks widen past `block_size` when the file would otherwise need
    /// more than [`MAX_SLOTS_PER_ENTRY`] slots per entry.
    pub(crate) fn build(table: &[u8], bounds: TableBounds, original_size: u64, block_size: u64) -> Self {
        let max_blocks = (bounds.count as u64)
            .saturating_mul(MAX_SLOTS_PER_ENTRY)
            .max(1);
        let block_size = block_size.max(1).max(original_size.div_ceil(max_blocks));
        let block_count = if original_size == 0 {
            0
        } else {
            ((original_size - 1) / block_size + 1) as usize
        };

        let mut blocks = Vec::with_capacity(block_count);
        let mut i = 0usize;
        for b in 0..block_count {
            let boundary = b as u64 * block_size;
            while i + 1 < bounds.count && entry_offset_at(table, i + 1) <= boundary {
                i += 1;
            }
            blocks.push(i);
        }

        Self {
            bounds,
            block_size,
            blocks,
            last: Mutex::new(None),
        }
    }

    pub(crate) const fn bounds(&self) -> TableBounds {
        self.bounds
    }

    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Decode entry `index`
    pub(crate) fn get(&self, table: &[u8], index: usize) -> Option<Entry> {
        if index >= self.bounds.count {
            return None;
        }
        entry::entry_at(table, index)
    }

    /// Entry covering `offset`, as (index, entry)
    pub(crate) fn locate(&self, table: &[u8], offset: u64) -> Option<(usize, Entry)> {
        if let Some(hit) = self.cached(table, offset) {
            return Some(hit);
        }
        if self.bounds.count == 0 {
            return None;
        }

        let b = (offset / self.block_size) as usize;
        let lo = *self.blocks.get(b)?;
        let hi = self
            .blocks
            .get(b + 1)
            .copied()
            .unwrap_or(self.bounds.count.saturating_sub(1));

        // last index in [lo, hi] whose start is <= offset
        let (mut left, mut right) = (lo, hi + 1);
        while left < right {
            let mid = left + (right - left) / 2;
            if entry_offset_at(table, mid) <= offset {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        let index = left.checked_sub(1)?;
        if index < lo {
            return None;
        }

        let start = entry_offset_at(table, index);
        if offset >= start + entry_length_at(table, index) {
            return None;
        }
        let entry = self.get(table, index)?;
        Some((index, entry))
    }

    /// Remember the entry a read ended in
    pub(crate) fn remember(&self, index: usize, entry: Entry) {
        *self.last.lock() = Some((index, entry));
    }

    /// Cached entry, or its successor for reads that just crossed over
    fn cached(&self, table: &[u8], offset: u64) -> Option<(usize, Entry)> {
        let (index, entry) = (*self.last.lock())?;
        if entry.mkv_offset <= offset && offset < entry.end() {
            return Some((index, entry));
        }
        if offset == entry.end() {
            let next = self.get(table, index + 1)?;
            if next.mkv_offset == offset && next.length > 0 {
                return Some((index + 1, next));
            }
        }
        None
    }
}

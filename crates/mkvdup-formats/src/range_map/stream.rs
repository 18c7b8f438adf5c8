//! Random access into a compressed range map
//!
//! [`StreamRangeMap`] never materializes the logical entry list. One forward
//! pass records a checkpoint every `checkpoint_interval` entries; a seek then
//! binary-searches the checkpoints and walks forward from the nearest one.
//! Inside a default run the walk is closed-form, so runs of millions of
//! packets cost O(1) to cross.
//!
//! Sequential reads are the common case. The position reached by the last
//! read is cached behind a mutex and reused when it precedes the next target.
//! The cache is taken with `try_lock`; a contended lock falls back to the
//! checkpoint path instead of waiting.

use super::error::{RangeMapError, Result};
use super::{
    DEFAULT_CHECKPOINT_INTERVAL, EncodedRangeMap, RUN_MARKER, StreamKey, StreamKind,
};
use crate::strided::copy_strided;
use crate::varint::{read_uvarint, zigzag_decode};
use parking_lot::Mutex;

/// Decoder state at one logical entry
///
/// Checkpoints are stored positions; restarting from one reproduces the
/// exact decoder state, including how much of the current run is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    /// Logical entry index
    index: u64,
    /// ES offset of the entry
    es_offset: u64,
    /// Raw file offset of the entry
    file_offset: u64,
    /// Entry size
    size: u64,
    /// Byte position of the next token
    next_pos: usize,
    /// Default entries still pending in the current run
    run_remaining: u64,
}

impl Position {
    const fn es_end(&self) -> u64 {
        self.es_offset + self.size
    }

    const fn file_end(&self) -> u64 {
        self.file_offset + self.size
    }

    const fn contains(&self, es_offset: u64) -> bool {
        es_offset >= self.es_offset && es_offset < self.es_end()
    }
}

/// Decoded view over one compressed range map
pub struct StreamRangeMap {
    key: StreamKey,
    entry_count: u64,
    default_gap: u64,
    default_size: u64,
    data: Vec<u8>,
    checkpoints: Vec<Position>,
    checkpoint_interval: u64,
    total_size: u64,
    last_position: Mutex<Option<Position>>,
}

impl std::fmt::Debug for StreamRangeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRangeMap")
            .field("key", &self.key)
            .field("entry_count", &self.entry_count)
            .field("default_gap", &self.default_gap)
            .field("default_size", &self.default_size)
            .field("compressed_len", &self.data.len())
            .field("checkpoints", &self.checkpoints.len())
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

impl StreamRangeMap {
    /// Decode with the default checkpoint interval
    pub fn from_encoded(map: &EncodedRangeMap) -> Result<Self> {
        Self::with_interval(map, DEFAULT_CHECKPOINT_INTERVAL)
    }

    /// Decode, placing a checkpoint every `interval` logical entries
    pub fn with_interval(map: &EncodedRangeMap, interval: u64) -> Result<Self> {
        let mut decoded = Self {
            key: map.key,
            entry_count: u64::from(map.entry_count),
            default_gap: u64::from(map.default_gap),
            default_size: u64::from(map.default_size),
            data: map.data.clone(),
            checkpoints: Vec::new(),
            checkpoint_interval: interval.max(1),
            total_size: 0,
            last_position: Mutex::new(None),
        };
        decoded.build_index()?;
        Ok(decoded)
    }

    /// Stream this map describes
    pub const fn key(&self) -> StreamKey {
        self.key
    }

    /// Stream kind (video or audio sub-stream)
    pub const fn kind(&self) -> StreamKind {
        self.key.kind
    }

    /// Number of logical entries
    pub const fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Total elementary-stream length covered by the map
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of coarse-index checkpoints
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Implicit (gap, size) pair
    pub const fn defaults(&self) -> (u64, u64) {
        (self.default_gap, self.default_size)
    }

    /// Compressed token stream length in bytes
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }

    /// Raw (file offset, size) of the logical entry covering `es_offset`
    pub fn lookup(&self, es_offset: u64) -> Result<(u64, u64)> {
        let p = self.seek(es_offset)?;
        Ok((p.file_offset, p.size))
    }

    /// Copy `buf.len()` elementary-stream bytes starting at `es_offset`
    ///
    /// `source` is the raw source file the map points into. Every computed
    /// raw range is checked against it before copying.
    pub fn read_at(&self, es_offset: u64, buf: &mut [u8], source: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let len = buf.len() as u64;
        self.check_range(es_offset, len)?;

        let source_len = source.len() as u64;
        let stride = self.default_size + self.default_gap;
        let mut p = self.seek(es_offset)?;
        let mut done = 0usize;
        let mut es = es_offset;

        loop {
            let within = es - p.es_offset;
            let n = (p.size - within).min(len - done as u64);
            let start = p.file_offset + within;
            let src = source_slice(source, start, n)?;
            buf[done..done + n as usize].copy_from_slice(src);
            done += n as usize;
            es += n;
            if done == buf.len() {
                break;
            }

            // Whole default entries left in this run go through one strided copy
            if p.run_remaining > 0 && self.default_size > 0 {
                let count = p
                    .run_remaining
                    .min((len - done as u64) / self.default_size);
                if count > 0 {
                    let first = p.file_end() + self.default_gap;
                    let span = (count - 1) * stride + self.default_size;
                    if first.checked_add(span).is_none_or(|end| end > source_len) {
                        return Err(RangeMapError::SourceOutOfBounds {
                            file_offset: first,
                            len: span,
                            source_len,
                        });
                    }
                    let bytes = (count * self.default_size) as usize;
                    copy_strided(
                        &mut buf[done..done + bytes],
                        source,
                        first as usize,
                        stride as usize,
                        self.default_size as usize,
                        count as usize,
                    );
                    p = self.run_advance(p, count);
                    done += bytes;
                    es += bytes as u64;
                    if done == buf.len() {
                        break;
                    }
                }
            }

            p = self.step(p)?;
            if p.es_offset != es {
                return Err(RangeMapError::EsOffsetGap {
                    index: p.index,
                    expected: es,
                    actual: p.es_offset,
                });
            }
        }

        *self.last_position.lock() = Some(p);
        Ok(())
    }

    /// Raw file ranges backing `[es_offset, es_offset + len)`
    ///
    /// Adjacent ranges are coalesced, so a run with a zero gap comes back as
    /// a single range.
    pub fn raw_ranges(&self, es_offset: u64, len: u64) -> Result<Vec<(u64, u64)>> {
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        if len == 0 {
            return Ok(ranges);
        }
        self.check_range(es_offset, len)?;

        let mut p = self.seek(es_offset)?;
        let mut es = es_offset;
        let end = es_offset + len;

        loop {
            let within = es - p.es_offset;
            let n = (p.size - within).min(end - es);
            let start = p.file_offset + within;

            match ranges.last_mut() {
                Some((s, l)) if *s + *l == start => *l += n,
                _ => ranges.push((start, n)),
            }

            es += n;
            if es == end {
                break;
            }
            p = self.step(p)?;
        }

        *self.last_position.lock() = Some(p);
        Ok(ranges)
    }

    fn check_range(&self, es_offset: u64, len: u64) -> Result<()> {
        match es_offset.checked_add(len) {
            Some(end) if end <= self.total_size => Ok(()),
            _ => Err(RangeMapError::OutOfRange {
                es_offset,
                len,
                total: self.total_size,
            }),
        }
    }

    /// Locate the logical entry covering `target`
    fn seek(&self, target: u64) -> Result<Position> {
        if target >= self.total_size {
            return Err(RangeMapError::OutOfRange {
                es_offset: target,
                len: 0,
                total: self.total_size,
            });
        }

        let checkpoint = self.checkpoint_for(target);
        let start = match self.cached_position(target) {
            Some(cached) if cached.index >= checkpoint.index => cached,
            _ => checkpoint,
        };

        self.advance_to(start, target)
    }

    fn cached_position(&self, target: u64) -> Option<Position> {
        let guard = self.last_position.try_lock()?;
        let p = (*guard)?;
        (p.es_offset <= target).then_some(p)
    }

    fn checkpoint_for(&self, target: u64) -> Position {
        let i = self.checkpoints.partition_point(|c| c.es_offset <= target);
        self.checkpoints[i.saturating_sub(1)]
    }

    fn advance_to(&self, mut p: Position, target: u64) -> Result<Position> {
        while target >= p.es_end() {
            if p.run_remaining > 0 && self.default_size > 0 {
                let k = ((target - p.es_end()) / self.default_size + 1).min(p.run_remaining);
                p = self.run_advance(p, k);
            } else {
                p = self.step(p)?;
            }
        }

        if !p.contains(target) {
            return Err(RangeMapError::EsOffsetGap {
                index: p.index,
                expected: target,
                actual: p.es_offset,
            });
        }
        Ok(p)
    }

    /// Jump `k` entries forward inside the current run (1 <= k <= run_remaining)
    const fn run_advance(&self, p: Position, k: u64) -> Position {
        let stride = self.default_size + self.default_gap;
        Position {
            index: p.index + k,
            es_offset: p.es_end() + (k - 1) * self.default_size,
            file_offset: p.file_end() + self.default_gap + (k - 1) * stride,
            size: self.default_size,
            next_pos: p.next_pos,
            run_remaining: p.run_remaining - k,
        }
    }

    /// (file end, ES end) of the last entry of a `count`-entry run after `p`
    fn run_end(&self, p: &Position, count: u64) -> Option<(u64, u64)> {
        let stride = self.default_size + self.default_gap;
        let file_end = count.checked_mul(stride)?.checked_add(p.file_end())?;
        let es_end = count
            .checked_mul(self.default_size)?
            .checked_add(p.es_end())?;
        Some((file_end, es_end))
    }

    /// Decode the first logical entry
    fn first(&self) -> Result<Position> {
        let (file_offset, n) =
            read_uvarint(&self.data, 0).map_err(|e| RangeMapError::from_varint(e, 0))?;
        let (size, m) =
            read_uvarint(&self.data, n).map_err(|e| RangeMapError::from_varint(e, 0))?;
        if size == 0 {
            return Err(RangeMapError::ZeroSize { index: 0 });
        }
        file_offset
            .checked_add(size)
            .ok_or(RangeMapError::OffsetOverflow { index: 0 })?;

        Ok(Position {
            index: 0,
            es_offset: 0,
            file_offset,
            size,
            next_pos: n + m,
            run_remaining: 0,
        })
    }

    /// Decode the entry after `p`
    fn step(&self, p: Position) -> Result<Position> {
        let index = p.index + 1;
        if index >= self.entry_count {
            return Err(RangeMapError::OutOfRange {
                es_offset: p.es_end(),
                len: 0,
                total: self.total_size,
            });
        }

        if p.run_remaining > 0 {
            return Ok(self.run_advance(p, 1));
        }

        let pos = p.next_pos;
        let Some(&lead) = self.data.get(pos) else {
            return Err(RangeMapError::Truncated {
                index,
                byte_offset: pos,
            });
        };

        if lead == RUN_MARKER {
            let (count, n) = read_uvarint(&self.data, pos + 1)
                .map_err(|e| RangeMapError::from_varint(e, index))?;
            if count == 0 || self.default_size == 0 {
                return Err(RangeMapError::EmptyRun {
                    index,
                    byte_offset: pos,
                });
            }
            // Every jump inside the run stays below its last entry's end
            self.run_end(&p, count)
                .ok_or(RangeMapError::OffsetOverflow { index })?;
            let q = Position {
                next_pos: pos + 1 + n,
                run_remaining: count,
                ..p
            };
            return Ok(self.run_advance(q, 1));
        }

        let (token, n) =
            read_uvarint(&self.data, pos).map_err(|e| RangeMapError::from_varint(e, index))?;
        // A zero token can only be a non-canonical encoding of the run marker
        if token == 0 {
            return Err(RangeMapError::MalformedVarint {
                index,
                byte_offset: pos,
            });
        }
        let (size, m) = read_uvarint(&self.data, pos + n)
            .map_err(|e| RangeMapError::from_varint(e, index))?;
        if size == 0 {
            return Err(RangeMapError::ZeroSize { index });
        }

        let file_offset = p
            .file_end()
            .checked_add(self.default_gap)
            .and_then(|predicted| predicted.checked_add_signed(zigzag_decode(token - 1)))
            .ok_or(RangeMapError::OffsetOverflow { index })?;
        if file_offset < p.file_end() {
            return Err(RangeMapError::NonMonotonic {
                index,
                previous_end: p.file_end(),
                actual: file_offset,
            });
        }
        file_offset
            .checked_add(size)
            .ok_or(RangeMapError::OffsetOverflow { index })?;
        p.es_end()
            .checked_add(size)
            .ok_or(RangeMapError::OffsetOverflow { index })?;

        Ok(Position {
            index,
            es_offset: p.es_end(),
            file_offset,
            size,
            next_pos: pos + n + m,
            run_remaining: 0,
        })
    }

    /// One forward pass: checkpoints, total size, consistency checks
    fn build_index(&mut self) -> Result<()> {
        if self.entry_count == 0 {
            if !self.data.is_empty() {
                return Err(RangeMapError::TrailingData {
                    entry_count: 0,
                    byte_offset: 0,
                    data_len: self.data.len(),
                });
            }
            return Ok(());
        }

        let interval = self.checkpoint_interval;
        let last = self.entry_count - 1;
        let mut checkpoints = Vec::with_capacity((self.entry_count / interval + 1) as usize);
        let mut p = self.first()?;

        loop {
            if p.index % interval == 0 {
                checkpoints.push(p);
            }
            if p.index == last {
                break;
            }

            if p.run_remaining > 0 {
                // Cross the run up to the next checkpoint boundary in one jump
                let next_checkpoint = (p.index / interval + 1) * interval;
                let k = p
                    .run_remaining
                    .min(next_checkpoint - p.index)
                    .min(last - p.index);
                p = self.run_advance(p, k);
            } else {
                p = self.step(p)?;
            }
        }

        if p.run_remaining != 0 {
            return Err(RangeMapError::EntryCountMismatch {
                declared: self.entry_count,
            });
        }
        if p.next_pos != self.data.len() {
            return Err(RangeMapError::TrailingData {
                entry_count: self.entry_count,
                byte_offset: p.next_pos,
                data_len: self.data.len(),
            });
        }

        self.total_size = p
            .es_offset
            .checked_add(p.size)
            .ok_or(RangeMapError::OffsetOverflow { index: p.index })?;
        self.checkpoints = checkpoints;
        Ok(())
    }
}

fn source_slice(source: &[u8], start: u64, len: u64) -> Result<&[u8]> {
    let end = start.checked_add(len);
    match end {
        Some(end) if end <= source.len() as u64 => Ok(&source[start as usize..end as usize]),
        _ => Err(RangeMapError::SourceOutOfBounds {
            file_offset: start,
            len,
            source_len: source.len() as u64,
        }),
    }
}

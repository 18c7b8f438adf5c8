//! Range-map encoder

use super::error::{RangeMapError, Result};
use super::{
    DEFAULT_SAMPLE_LIMIT, EncodedRangeMap, RUN_MARKER, RangeEntry, RangeMapOptions, StreamKey,
    StreamKind,
};
use crate::varint::{put_uvarint, zigzag_encode};
use std::collections::HashMap;

/// Compresses an ordered list of [`RangeEntry`] into the token stream
#[derive(Debug, Clone)]
pub struct RangeMapEncoder {
    sample_limit: usize,
}

impl RangeMapEncoder {
    /// Encoder with the default sample limit
    pub fn new() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    /// Encoder configured from codec options
    pub fn with_options(options: &RangeMapOptions) -> Self {
        Self::new().sample_limit(options.sample_limit)
    }

    /// Number of leading entries examined when choosing defaults
    #[must_use]
    pub fn sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit.max(2);
        self
    }

    /// Encode the entries of one stream
    ///
    /// Entries must start at ES offset 0, be contiguous in ES space, have a
    /// non-zero size, and be non-overlapping and increasing in the raw file.
    pub fn encode(
        &self,
        file_index: u16,
        kind: StreamKind,
        entries: &[RangeEntry],
    ) -> Result<EncodedRangeMap> {
        validate(entries)?;

        let entry_count = u32::try_from(entries.len())
            .map_err(|_| RangeMapError::TooManyEntries(entries.len()))?;

        let (default_gap, default_size) = self.select_defaults(entries);
        let gap = u64::from(default_gap);
        let size = u64::from(default_size);

        let mut data = Vec::new();
        let Some(first) = entries.first() else {
            return Ok(EncodedRangeMap {
                key: StreamKey::new(file_index, kind),
                entry_count,
                default_gap,
                default_size,
                data,
            });
        };

        put_uvarint(&mut data, first.file_offset);
        put_uvarint(&mut data, first.size);

        let mut run = 0u64;
        for (i, pair) in entries.windows(2).enumerate() {
            let (prev, cur) = (&pair[0], &pair[1]);
            let predicted = prev.file_end() + gap;

            if size != 0 && cur.size == size && cur.file_offset == predicted {
                run += 1;
                continue;
            }

            flush_run(&mut data, &mut run);

            let index = i as u64 + 1;
            let delta = signed_delta(cur.file_offset, predicted)
                .ok_or(RangeMapError::OffsetOverflow { index })?;
            let token = zigzag_encode(delta)
                .checked_add(1)
                .ok_or(RangeMapError::OffsetOverflow { index })?;
            put_uvarint(&mut data, token);
            put_uvarint(&mut data, cur.size);
        }
        flush_run(&mut data, &mut run);

        Ok(EncodedRangeMap {
            key: StreamKey::new(file_index, kind),
            entry_count,
            default_gap,
            default_size,
            data,
        })
    }

    /// Most frequent (gap, size) over the sampled prefix
    ///
    /// Ties go to the smaller pair so the output is deterministic. Pairs that
    /// do not fit 16 bits disable RLE and collapse to (0, 0).
    fn select_defaults(&self, entries: &[RangeEntry]) -> (u16, u16) {
        let sample = &entries[..entries.len().min(self.sample_limit)];

        let mut counts: HashMap<(u64, u64), usize> = HashMap::new();
        for pair in sample.windows(2) {
            let gap = pair[1].file_offset - pair[0].file_end();
            *counts.entry((gap, pair[1].size)).or_default() += 1;
        }

        let best = counts
            .into_iter()
            .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then_with(|| kb.cmp(ka)))
            .map(|(key, _)| key);

        match best {
            Some((gap, size)) => match (u16::try_from(gap), u16::try_from(size)) {
                (Ok(gap), Ok(size)) => (gap, size),
                _ => (0, 0),
            },
            None => (0, 0),
        }
    }
}

impl Default for RangeMapEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn flush_run(data: &mut Vec<u8>, run: &mut u64) {
    if *run > 0 {
        data.push(RUN_MARKER);
        put_uvarint(data, *run);
        *run = 0;
    }
}

fn signed_delta(actual: u64, predicted: u64) -> Option<i64> {
    let delta = i128::from(actual) - i128::from(predicted);
    i64::try_from(delta).ok()
}

fn validate(entries: &[RangeEntry]) -> Result<()> {
    let mut expected_es = 0u64;
    let mut previous_end: Option<u64> = None;

    for (i, entry) in entries.iter().enumerate() {
        let index = i as u64;
        if entry.size == 0 {
            return Err(RangeMapError::ZeroSize { index });
        }
        if entry.es_offset != expected_es {
            return Err(RangeMapError::EsOffsetGap {
                index,
                expected: expected_es,
                actual: entry.es_offset,
            });
        }
        if let Some(end) = previous_end
            && entry.file_offset < end
        {
            return Err(RangeMapError::NonMonotonic {
                index,
                previous_end: end,
                actual: entry.file_offset,
            });
        }

        expected_es = entry
            .es_offset
            .checked_add(entry.size)
            .ok_or(RangeMapError::OffsetOverflow { index })?;
        previous_end = Some(
            entry
                .file_offset
                .checked_add(entry.size)
                .ok_or(RangeMapError::OffsetOverflow { index })?,
        );
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::varint::read_uvarint;

    fn uniform(count: u64, gap: u64, size: u64, start: u64) -> Vec<RangeEntry> {
        (0..count)
            .map(|i| RangeEntry::new(i * size, start + i * (gap + size), size))
            .collect()
    }

    #[test]
    fn test_uniform_stream_is_one_run() {
        let entries = uniform(5000, 4, 184, 4);
        let encoded = RangeMapEncoder::new()
            .encode(3, StreamKind::Video, &entries)
            .unwrap();

        assert_eq!(encoded.entry_count, 5000);
        assert_eq!(encoded.default_gap, 4);
        assert_eq!(encoded.default_size, 184);
        assert_eq!(encoded.key, StreamKey::new(3, StreamKind::Video));

        // first entry, then a single run of 4999
        let mut expected = Vec::new();
        put_uvarint(&mut expected, 4);
        put_uvarint(&mut expected, 184);
        expected.push(RUN_MARKER);
        put_uvarint(&mut expected, 4999);
        assert_eq!(encoded.data, expected);
    }

    #[test]
    fn test_explicit_token_never_starts_with_marker() {
        // second entry sits exactly at the predicted offset but has another size
        let entries = vec![
            RangeEntry::new(0, 0, 10),
            RangeEntry::new(10, 10, 20),
            RangeEntry::new(30, 30, 10),
        ];
        let encoded = RangeMapEncoder::new()
            .encode(0, StreamKind::Audio(0x80), &entries)
            .unwrap();

        let (_, n1) = read_uvarint(&encoded.data, 0).unwrap();
        let (_, n2) = read_uvarint(&encoded.data, n1).unwrap();
        assert_ne!(encoded.data[n1 + n2], RUN_MARKER);
    }

    #[test]
    fn test_wide_defaults_disable_rle() {
        let entries = uniform(10, 100_000, 70_000, 0);
        let encoded = RangeMapEncoder::new()
            .encode(0, StreamKind::Video, &entries)
            .unwrap();

        assert_eq!(encoded.default_gap, 0);
        assert_eq!(encoded.default_size, 0);
        assert!(!encoded.rle_enabled());
        // the only zero byte is the first entry's offset
        assert_eq!(
            encoded.data.iter().filter(|&&b| b == RUN_MARKER).count(),
            1
        );
    }

    #[test]
    fn test_sample_limit_restricts_defaults() {
        // first 10 entries use size 100, the rest size 50
        let mut entries = Vec::new();
        let mut es = 0;
        let mut file = 0;
        for i in 0..1000 {
            let size = if i < 10 { 100 } else { 50 };
            entries.push(RangeEntry::new(es, file, size));
            es += size;
            file += size + 8;
        }

        let sampled = RangeMapEncoder::new()
            .sample_limit(10)
            .encode(0, StreamKind::Video, &entries)
            .unwrap();
        assert_eq!(sampled.default_size, 100);

        let full = RangeMapEncoder::new()
            .encode(0, StreamKind::Video, &entries)
            .unwrap();
        assert_eq!(full.default_size, 50);
        assert!(full.data.len() < sampled.data.len());
    }

    #[test]
    fn test_empty_and_single() {
        let empty = RangeMapEncoder::new()
            .encode(0, StreamKind::Video, &[])
            .unwrap();
        assert_eq!(empty.entry_count, 0);
        assert!(empty.data.is_empty());

        let single = RangeMapEncoder::new()
            .encode(0, StreamKind::Video, &[RangeEntry::new(0, 77, 5)])
            .unwrap();
        assert_eq!(single.entry_count, 1);
        assert_eq!(single.data, vec![77, 5]);
    }

    #[test]
    fn test_rejects_es_gap() {
        let entries = vec![RangeEntry::new(0, 0, 10), RangeEntry::new(12, 20, 10)];
        let err = RangeMapEncoder::new()
            .encode(0, StreamKind::Video, &entries)
            .unwrap_err();
        assert_eq!(
            err,
            RangeMapError::EsOffsetGap {
                index: 1,
                expected: 10,
                actual: 12
            }
        );
    }

    #[test]
    fn test_rejects_overlap_and_zero_size() {
        let overlap = vec![RangeEntry::new(0, 100, 10), RangeEntry::new(10, 105, 10)];
        assert!(matches!(
            RangeMapEncoder::new().encode(0, StreamKind::Video, &overlap),
            Err(RangeMapError::NonMonotonic { index: 1, .. })
        ));

        let zero = vec![RangeEntry::new(0, 0, 0)];
        assert!(matches!(
            RangeMapEncoder::new().encode(0, StreamKind::Video, &zero),
            Err(RangeMapError::ZeroSize { index: 0 })
        ));
    }

    #[test]
    fn test_negative_delta_against_prediction() {
        // defaults are gap 8 / size 16; one entry sits right after its predecessor
        let mut entries = uniform(50, 8, 16, 0);
        let last = *entries.last().unwrap();
        entries.push(RangeEntry::new(last.es_end(), last.file_end(), 16));

        let encoded = RangeMapEncoder::new()
            .encode(0, StreamKind::Video, &entries)
            .unwrap();
        assert_eq!(encoded.default_gap, 8);

        // tail token encodes zigzag(-8) + 1 = 16
        let tail = &encoded.data[encoded.data.len() - 2..];
        assert_eq!(tail, &[16, 16]);
    }
}

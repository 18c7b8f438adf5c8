//! Elementary-stream to raw-offset conversion for the writer
//!
//! The writer knows nothing about elementary streams. When a match result
//! addresses sources by ES offset, it hands each source entry to an
//! [`EsConverter`] and writes whatever raw-offset entries come back.

use crate::{Result, StorageError};
use mkvdup_formats::range_map::RangeMapOptions;
use mkvdup_formats::{EncodedRangeMap, Entry, StreamKey, StreamRangeMap};
use std::collections::HashMap;
use tracing::debug;

/// Splits one ES-addressed entry into raw-offset entries
pub trait EsConverter {
    /// Raw-offset entries covering exactly the entry's reconstructed range
    ///
    /// Returned entries keep the source index, flags and sub-stream id of the
    /// input and must be contiguous in reconstructed-file order.
    fn convert(&self, entry: &Entry) -> Result<Vec<Entry>>;
}

/// Converter backed by decoded range maps
#[derive(Debug, Default)]
pub struct RangeMapConverter {
    maps: HashMap<StreamKey, StreamRangeMap>,
}

impl RangeMapConverter {
    /// Decode `maps` with default codec options
    pub fn new(maps: &[EncodedRangeMap]) -> Result<Self> {
        Self::with_options(maps, &RangeMapOptions::default())
    }

    /// Decode `maps` with explicit codec options
    pub fn with_options(maps: &[EncodedRangeMap], options: &RangeMapOptions) -> Result<Self> {
        let mut decoded = HashMap::with_capacity(maps.len());
        for map in maps {
            let stream = StreamRangeMap::with_interval(map, options.checkpoint_interval)?;
            decoded.insert(map.key, stream);
        }
        debug!("Range-map converter ready with {} streams", decoded.len());
        Ok(Self { maps: decoded })
    }

    /// Number of streams available
    pub fn stream_count(&self) -> usize {
        self.maps.len()
    }
}

impl EsConverter for RangeMapConverter {
    fn convert(&self, entry: &Entry) -> Result<Vec<Entry>> {
        let Some(file_index) = entry.source_index() else {
            return Ok(vec![*entry]);
        };
        let key = StreamKey::new(file_index as u16, entry.stream_kind());
        let map = self
            .maps
            .get(&key)
            .ok_or_else(|| StorageError::MissingRangeMap {
                file_index: key.file_index,
                stream: format!("{:?}", key.kind),
            })?;

        let ranges = map.raw_ranges(entry.source_offset, entry.length)?;
        let mut mkv_offset = entry.mkv_offset;
        let converted = ranges
            .into_iter()
            .map(|(file_offset, len)| {
                let piece = Entry {
                    mkv_offset,
                    length: len,
                    source_offset: file_offset,
                    ..*entry
                };
                mkv_offset += len;
                piece
            })
            .collect();

        Ok(converted)
    }
}

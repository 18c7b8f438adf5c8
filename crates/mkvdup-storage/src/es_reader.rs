//! Elementary-stream reads for artifacts that keep ES offsets

use crate::{Result, StorageError};
use mkvdup_formats::range_map::{RangeMapOptions, RangeMapSection};
use mkvdup_formats::{StreamKey, StreamRangeMap};
use std::collections::HashMap;

/// Resolves elementary-stream bytes of one source file
pub trait EsReader: Send + Sync {
    /// Fill `buf` with the stream `key` starting at `es_offset`
    ///
    /// `source` is the mapped source file the stream lives in.
    fn read_es(&self, key: StreamKey, es_offset: u64, buf: &mut [u8], source: &[u8])
    -> Result<()>;
}

/// [`EsReader`] over the range maps stored in an artifact
#[derive(Debug, Default)]
pub struct RangeMapEsReader {
    streams: HashMap<StreamKey, StreamRangeMap>,
}

impl RangeMapEsReader {
    /// Decode every map of a parsed section
    pub fn from_section(section: &RangeMapSection, options: &RangeMapOptions) -> Result<Self> {
        let mut streams = HashMap::with_capacity(section.maps.len());
        for map in &section.maps {
            streams.insert(
                map.key,
                StreamRangeMap::with_interval(map, options.checkpoint_interval)?,
            );
        }
        Ok(Self { streams })
    }

    /// Decoded stream for `key`
    pub fn stream(&self, key: StreamKey) -> Option<&StreamRangeMap> {
        self.streams.get(&key)
    }

    /// Number of decoded streams
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

impl EsReader for RangeMapEsReader {
    fn read_es(
        &self,
        key: StreamKey,
        es_offset: u64,
        buf: &mut [u8],
        source: &[u8],
    ) -> Result<()> {
        let stream = self
            .streams
            .get(&key)
            .ok_or_else(|| StorageError::MissingRangeMap {
                file_index: key.file_index,
                stream: format!("{:?}", key.kind),
            })?;
        stream.read_at(es_offset, buf, source)?;
        Ok(())
    }
}

//! Range-map section of the dedup artifact
//!
//! Layout (little-endian):
//!
//! | Field | Size |
//! |-------|------|
//! | Magic `MKVDRMAP` | 8 |
//! | Source count | 2 |
//! | per source: file index | 2 |
//! | per source: stream count | 1 |
//! | per stream: file index | 2 |
//! | per stream: stream type (0 video, 1 audio) | 1 |
//! | per stream: sub-stream id | 1 |
//! | per stream: entry count | 4 |
//! | per stream: default gap | 2 |
//! | per stream: default size | 2 |
//! | per stream: compressed length | 4 |
//! | per stream: compressed bytes | n |

use super::error::{RangeMapError, Result};
use super::{EncodedRangeMap, StreamKey, StreamKind};
use binrw::{BinRead, BinWrite};
use std::collections::BTreeMap;
use std::io::Cursor;

/// Magic at the start of the range-map section
pub const RANGE_MAP_MAGIC: [u8; 8] = *b"MKVDRMAP";

/// One compressed stream as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
struct StreamRecord {
    file_index: u16,
    stream_type: u8,
    sub_stream_id: u8,
    entry_count: u32,
    default_gap: u16,
    default_size: u16,
    data_len: u32,
    #[br(count = data_len)]
    data: Vec<u8>,
}

/// All streams of one source file
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
struct SourceRecord {
    file_index: u16,
    stream_count: u8,
    #[br(count = stream_count)]
    streams: Vec<StreamRecord>,
}

/// Section body following the magic
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
struct SectionBody {
    source_count: u16,
    #[br(count = source_count)]
    sources: Vec<SourceRecord>,
}

/// Every range map carried by an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeMapSection {
    /// Maps ordered by (file index, stream kind)
    pub maps: Vec<EncodedRangeMap>,
}

impl RangeMapSection {
    /// Wrap a set of encoded maps, ordering them by stream key
    pub fn new(mut maps: Vec<EncodedRangeMap>) -> Self {
        maps.sort_by_key(|m| m.key);
        Self { maps }
    }

    /// Whether the section carries no maps
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Parse a section starting at the first byte of `data`
    ///
    /// Returns the section and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let Some(magic) = data.get(..8) else {
            return Err(RangeMapError::Section(format!(
                "section needs at least 8 bytes, got {}",
                data.len()
            )));
        };
        if magic != RANGE_MAP_MAGIC {
            let mut found = [0u8; 8];
            found.copy_from_slice(magic);
            return Err(RangeMapError::InvalidMagic(found));
        }

        let mut cursor = Cursor::new(&data[8..]);
        let body = SectionBody::read_le(&mut cursor)?;
        let consumed = 8 + cursor.position() as usize;

        let mut maps = Vec::new();
        for source in body.sources {
            for stream in source.streams {
                if stream.file_index != source.file_index {
                    return Err(RangeMapError::Section(format!(
                        "stream file index {} inside source record {}",
                        stream.file_index, source.file_index
                    )));
                }
                let kind = StreamKind::from_parts(stream.stream_type, stream.sub_stream_id)?;
                maps.push(EncodedRangeMap {
                    key: StreamKey::new(stream.file_index, kind),
                    entry_count: stream.entry_count,
                    default_gap: stream.default_gap,
                    default_size: stream.default_size,
                    data: stream.data,
                });
            }
        }

        Ok((Self::new(maps), consumed))
    }

    /// Serialize the section including its magic
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut grouped: BTreeMap<u16, Vec<StreamRecord>> = BTreeMap::new();
        for map in &self.maps {
            let data_len = u32::try_from(map.data.len())
                .map_err(|_| RangeMapError::TooManyEntries(map.data.len()))?;
            grouped
                .entry(map.key.file_index)
                .or_default()
                .push(StreamRecord {
                    file_index: map.key.file_index,
                    stream_type: map.key.kind.stream_type(),
                    sub_stream_id: map.key.kind.sub_stream_id(),
                    entry_count: map.entry_count,
                    default_gap: map.default_gap,
                    default_size: map.default_size,
                    data_len,
                    data: map.data.clone(),
                });
        }

        let mut sources = Vec::with_capacity(grouped.len());
        for (file_index, streams) in grouped {
            let stream_count = u8::try_from(streams.len()).map_err(|_| {
                RangeMapError::Section(format!(
                    "source {file_index} has {} streams, at most 255 fit",
                    streams.len()
                ))
            })?;
            sources.push(SourceRecord {
                file_index,
                stream_count,
                streams,
            });
        }

        let source_count = u16::try_from(sources.len()).map_err(|_| {
            RangeMapError::Section(format!("{} sources do not fit u16", sources.len()))
        })?;

        let mut buffer = RANGE_MAP_MAGIC.to_vec();
        let mut cursor = Cursor::new(&mut buffer);
        cursor.set_position(8);
        SectionBody {
            source_count,
            sources,
        }
        .write_le(&mut cursor)?;

        Ok(buffer)
    }
}

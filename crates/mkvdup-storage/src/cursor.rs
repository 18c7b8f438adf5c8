//! `Read + Seek` over a shared [`DedupReader`]

use crate::DedupReader;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// Sequential view of the reconstructed file
///
/// Each cursor keeps its own position; any number of cursors can share one
/// reader.
#[derive(Debug, Clone)]
pub struct DedupCursor {
    reader: Arc<DedupReader>,
    position: u64,
}

impl DedupCursor {
    /// Cursor at offset 0
    pub const fn new(reader: Arc<DedupReader>) -> Self {
        Self {
            reader,
            position: 0,
        }
    }

    /// Current offset
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Underlying reader
    pub fn reader(&self) -> &DedupReader {
        &self.reader
    }
}

impl Read for DedupCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .reader
            .read_at(buf, self.position)
            .map_err(io::Error::other)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for DedupCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.reader.original_size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::writer::{DedupWriter, MatchResult};
    use mkvdup_formats::{Entry, SourceType};
    use tempfile::TempDir;

    fn reader(dir: &TempDir, data: &[u8]) -> Arc<DedupReader> {
        let path = dir.path().join("cursor.mkvdup");
        let mut writer = DedupWriter::create(&path).unwrap();
        writer.set_header(data.len() as u64, 0, SourceType::Dvd, false);
        let entries = (0..data.len() as u64)
            .step_by(5)
            .map(|start| Entry::delta(start, (data.len() as u64 - start).min(5), start))
            .collect();
        writer
            .set_match_result(
                MatchResult {
                    entries,
                    delta: data.to_vec(),
                },
                None,
            )
            .unwrap();
        writer.write().unwrap();
        Arc::new(DedupReader::open(&path, dir.path()).unwrap())
    }

    #[test]
    fn test_read_to_end() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..23u8).collect();
        let mut cursor = DedupCursor::new(reader(&dir, &data));

        let mut out = Vec::new();
        cursor.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(cursor.position(), 23);
    }

    #[test]
    fn test_seek() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (100..140u8).collect();
        let mut cursor = DedupCursor::new(reader(&dir, &data));

        assert_eq!(cursor.seek(SeekFrom::End(-4)).unwrap(), 36);
        let mut buf = [0u8; 8];
        assert_eq!(cursor.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &data[36..]);
        assert_eq!(cursor.read(&mut buf).unwrap(), 0);

        cursor.seek(SeekFrom::Start(10)).unwrap();
        cursor.seek(SeekFrom::Current(-3)).unwrap();
        cursor.read_exact(&mut buf[..2]).unwrap();
        assert_eq!(&buf[..2], &data[7..9]);

        assert!(cursor.seek(SeekFrom::Current(-100)).is_err());
        assert_eq!(cursor.position(), 9);
    }
}

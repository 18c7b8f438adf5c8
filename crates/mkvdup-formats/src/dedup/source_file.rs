//! Source-file table

use super::error::{FormatError, Result};
use super::header::PrefixedBytes;
use binrw::{BinRead, BinWrite};
use std::io::Cursor;
use std::path::Path;

/// One source file record as stored
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
struct SourceFileRecord {
    path: PrefixedBytes,
    size: u64,
    checksum: u64,
}

/// A disc-image file referenced by entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    /// Path relative to the caller's source root
    pub path: String,
    /// Declared file size
    pub size: u64,
    /// XXH64 of the whole file
    pub checksum: u64,
}

impl SourceFile {
    /// Create a source-file record, rejecting absolute paths
    pub fn new(path: impl Into<String>, size: u64, checksum: u64) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self {
            path,
            size,
            checksum,
        })
    }

    /// Encoded size of this record
    pub fn encoded_len(&self) -> usize {
        2 + self.path.len() + 16
    }

    /// Parse `count` consecutive records from the start of `data`
    ///
    /// Returns the records and the number of bytes consumed.
    pub fn parse_table(data: &[u8], count: u16) -> Result<(Vec<Self>, usize)> {
        let mut cursor = Cursor::new(data);
        let mut files = Vec::with_capacity(usize::from(count));

        for _ in 0..count {
            let record = SourceFileRecord::read_le(&mut cursor).map_err(|_| {
                FormatError::Truncated {
                    section: "source-file table",
                    expected: cursor.position() + 18,
                    actual: data.len() as u64,
                }
            })?;
            let path = String::from_utf8(record.path.bytes)
                .map_err(|e| FormatError::InvalidPath(e.to_string()))?;
            validate_path(&path)?;
            files.push(Self {
                path,
                size: record.size,
                checksum: record.checksum,
            });
        }

        Ok((files, cursor.position() as usize))
    }

    /// Serialize a table of records
    pub fn build_table(files: &[Self]) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(files.iter().map(Self::encoded_len).sum());
        let mut cursor = Cursor::new(&mut buffer);

        for file in files {
            validate_path(&file.path)?;
            SourceFileRecord {
                path: PrefixedBytes::new(file.path.as_bytes(), "source path")?,
                size: file.size,
                checksum: file.checksum,
            }
            .write_le(&mut cursor)?;
        }

        Ok(buffer)
    }
}

fn validate_path(path: &str) -> Result<()> {
    let p = Path::new(path);
    if p.is_absolute() || p.has_root() {
        return Err(FormatError::AbsoluteSourcePath(path.to_string()));
    }
    Ok(())
}

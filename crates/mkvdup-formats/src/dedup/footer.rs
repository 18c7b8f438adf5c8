//! Artifact footer
//!
//! The last 24 bytes of every artifact: entry-table checksum, delta-section
//! checksum, trailing magic. Readers validate it from the tail without a
//! forward parse.

use super::error::{FormatError, Result};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Trailing magic
pub const FOOTER_MAGIC: [u8; 8] = *b"MKVDUPFT";

/// Footer size in bytes
pub const FOOTER_SIZE: usize = 24;

/// Section checksums plus trailing magic
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct DedupFooter {
    /// XXH64 of the raw entry-table bytes
    pub entry_checksum: u64,
    /// XXH64 of the raw delta-section bytes
    pub delta_checksum: u64,
    /// Must equal [`FOOTER_MAGIC`]
    pub magic: [u8; 8],
}

impl DedupFooter {
    /// Footer for the given section checksums
    pub const fn new(entry_checksum: u64, delta_checksum: u64) -> Self {
        Self {
            entry_checksum,
            delta_checksum,
            magic: FOOTER_MAGIC,
        }
    }

    /// Parse the footer from the last 24 bytes of `file`
    pub fn from_tail(file: &[u8]) -> Result<Self> {
        let start = file
            .len()
            .checked_sub(FOOTER_SIZE)
            .ok_or(FormatError::Truncated {
                section: "footer",
                expected: FOOTER_SIZE as u64,
                actual: file.len() as u64,
            })?;

        let footer = Self::read_le(&mut Cursor::new(&file[start..]))?;
        if footer.magic != FOOTER_MAGIC {
            return Err(FormatError::InvalidFooterMagic(footer.magic));
        }
        Ok(footer)
    }

    /// Serialize to 24 bytes
    pub fn to_bytes(&self) -> Result<[u8; FOOTER_SIZE]> {
        let mut buf = [0u8; FOOTER_SIZE];
        self.write_le(&mut Cursor::new(&mut buf[..]))?;
        Ok(buf)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_from_tail() {
        let footer = DedupFooter::new(0x0123_4567_89AB_CDEF, 42);
        let mut file = b"anything before".to_vec();
        file.extend_from_slice(&footer.to_bytes().unwrap());

        assert_eq!(&file[file.len() - 8..], b"MKVDUPFT");
        assert_eq!(DedupFooter::from_tail(&file).unwrap(), footer);
    }

    #[test]
    fn test_footer_errors() {
        assert!(matches!(
            DedupFooter::from_tail(&[0u8; 23]),
            Err(FormatError::Truncated { .. })
        ));

        let mut bytes = DedupFooter::new(1, 2).to_bytes().unwrap();
        bytes[23] = 0;
        assert!(matches!(
            DedupFooter::from_tail(&bytes),
            Err(FormatError::InvalidFooterMagic(_))
        ));
    }
}

//! Error types for the dedup artifact layout

use thiserror::Error;

/// Errors raised while parsing or building artifact structures
#[derive(Debug, Error)]
pub enum FormatError {
    /// Header magic is not `MKVDUP01`
    #[error("Invalid magic: expected 'MKVDUP01', got {0:02x?}")]
    InvalidMagic([u8; 8]),

    /// Footer magic is not `MKVDUPFT`
    #[error("Invalid footer magic: expected 'MKVDUPFT', got {0:02x?}")]
    InvalidFooterMagic([u8; 8]),

    /// Version whose semantics changed incompatibly
    #[error("Dedup file version {version} uses {reason}, which is no longer supported; please recreate the dedup file")]
    LegacyVersion {
        /// Version found in the header
        version: u32,
        /// What changed
        reason: &'static str,
    },

    /// Version newer than this reader understands
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// A section is shorter than its declared size
    #[error("Truncated {section}: expected {expected} bytes, got {actual} bytes")]
    Truncated {
        /// Section name
        section: &'static str,
        /// Expected minimum size
        expected: u64,
        /// Actual data size
        actual: u64,
    },

    /// Source type byte is neither DVD nor Blu-ray
    #[error("Invalid source type: {0}")]
    InvalidSourceType(u8),

    /// Source paths must be relative to the source root
    #[error("Source path must be relative: {0}")]
    AbsoluteSourcePath(String),

    /// Source path bytes are not UTF-8
    #[error("Source path is not valid UTF-8: {0}")]
    InvalidPath(String),

    /// A value does not fit its on-disk field
    #[error("{field} value {value} does not fit its field")]
    FieldOverflow {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Binary read/write error
    #[error("Binary parsing error: {0}")]
    BinRead(String),

    /// IO error during parsing or building
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for FormatError {
    fn from(e: binrw::Error) -> Self {
        Self::BinRead(e.to_string())
    }
}

/// Result type alias for layout operations
pub type Result<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_error_asks_for_recreate() {
        let err = FormatError::LegacyVersion {
            version: 2,
            reason: "elementary-stream offsets",
        };
        let msg = err.to_string();
        assert!(msg.contains("version 2"));
        assert!(msg.contains("recreate"));
    }

    #[test]
    fn test_truncated_display() {
        let err = FormatError::Truncated {
            section: "entry table",
            expected: 280,
            actual: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("entry table"));
        assert!(msg.contains("280"));
        assert!(msg.contains("100"));
    }
}

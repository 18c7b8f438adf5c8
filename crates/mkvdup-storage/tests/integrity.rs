//! Checksum sensitivity and version handling

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use mkvdup_formats::checksum::checksum;
use mkvdup_formats::dedup::{FIXED_HEADER_SIZE, FormatError};
use mkvdup_formats::{DedupHeader, Entry, SourceFile, SourceType};
use mkvdup_storage::{DedupReader, DedupWriter, MatchResult, StorageError};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Artifact {
    dir: TempDir,
    path: PathBuf,
    bytes: Vec<u8>,
    expected: Vec<u8>,
}

impl Artifact {
    fn build() -> Self {
        let dir = TempDir::new().unwrap();
        let source: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
        std::fs::write(dir.path().join("VTS_01_1.VOB"), &source).unwrap();

        let delta = b"\x1a\x45\xdf\xa3 matroska segment + cues".to_vec();
        let entries = vec![
            Entry::delta(0, 10, 0),
            Entry::from_source(10, 1000, 1, 96).video(),
            Entry::delta(1010, 5, 10),
            Entry::from_source(1015, 2000, 1, 2048).audio(0x80),
            Entry::delta(3015, delta.len() as u64 - 15, 15),
        ];
        let mut expected = delta[..10].to_vec();
        expected.extend_from_slice(&source[96..1096]);
        expected.extend_from_slice(&delta[10..15]);
        expected.extend_from_slice(&source[2048..4048]);
        expected.extend_from_slice(&delta[15..]);

        let path = dir.path().join("artifact.mkvdup");
        let mut writer = DedupWriter::create(&path).unwrap();
        writer.set_header(
            expected.len() as u64,
            checksum(&expected),
            SourceType::Dvd,
            false,
        );
        writer
            .set_source_files(vec![
                SourceFile::new("VTS_01_1.VOB", 4096, checksum(&source)).unwrap(),
            ])
            .unwrap();
        writer
            .set_match_result(MatchResult { entries, delta }, None)
            .unwrap();
        writer.write().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        Self {
            dir,
            path,
            bytes,
            expected,
        }
    }

    fn header(&self) -> DedupHeader {
        DedupHeader::parse(&self.bytes).unwrap().0
    }

    fn entry_table(&self) -> Range<usize> {
        let (header, header_len) = DedupHeader::parse(&self.bytes).unwrap();
        let (_, table_len) =
            SourceFile::parse_table(&self.bytes[header_len..], header.source_file_count).unwrap();
        let start = header_len + table_len;
        start..start + header.entry_count as usize * 28
    }

    fn delta_section(&self) -> Range<usize> {
        let header = self.header();
        let start = header.delta_offset as usize;
        start..start + header.delta_size as usize
    }

    fn open_variant(&self, name: &str, bytes: &[u8]) -> Result<DedupReader, StorageError> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        DedupReader::open(&path, self.dir.path())
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn read_all(reader: &DedupReader) -> Vec<u8> {
    let mut buf = vec![0u8; reader.original_size() as usize];
    let n = reader.read_at(&mut buf, 0).unwrap();
    buf.truncate(n);
    buf
}

#[test]
fn unmodified_artifact_verifies() {
    let artifact = Artifact::build();
    let reader = DedupReader::open(&artifact.path, artifact.root()).unwrap();
    reader.verify_integrity().unwrap();
    assert!(read_all(&reader) == artifact.expected);
}

#[test]
fn any_flipped_entry_byte_fails_verification() {
    let artifact = Artifact::build();
    for i in artifact.entry_table() {
        let mut bytes = artifact.bytes.clone();
        bytes[i] ^= 0x01;
        let reader = artifact.open_variant("flipped.mkvdup", &bytes).unwrap();
        assert!(
            matches!(
                reader.verify_integrity(),
                Err(StorageError::ChecksumMismatch {
                    section: "entry table",
                    ..
                })
            ),
            "byte {i}"
        );
    }
}

#[test]
fn any_flipped_delta_byte_fails_verification() {
    let artifact = Artifact::build();
    for i in artifact.delta_section() {
        let mut bytes = artifact.bytes.clone();
        bytes[i] ^= 0x80;
        let reader = artifact.open_variant("flipped.mkvdup", &bytes).unwrap();
        assert!(
            matches!(
                reader.verify_integrity(),
                Err(StorageError::ChecksumMismatch {
                    section: "delta section",
                    ..
                })
            ),
            "byte {i}"
        );
    }
}

#[test]
fn verify_on_open_rejects_corruption() {
    let artifact = Artifact::build();
    let mut bytes = artifact.bytes.clone();
    let i = artifact.delta_section().start;
    bytes[i] ^= 0xFF;

    let path = artifact.dir.path().join("corrupt.mkvdup");
    std::fs::write(&path, &bytes).unwrap();
    let config = mkvdup_storage::DedupConfig::new().with_verify_on_open(true);
    assert!(matches!(
        DedupReader::open_with_config(&path, artifact.root(), config),
        Err(StorageError::ChecksumMismatch { .. })
    ));
}

#[test]
fn legacy_versions_ask_for_recreate() {
    let artifact = Artifact::build();
    for version in [1u32, 2, 3] {
        let mut bytes = artifact.bytes.clone();
        bytes[8..12].copy_from_slice(&version.to_le_bytes());

        let err = artifact
            .open_variant("legacy.mkvdup", &bytes)
            .unwrap_err();
        assert!(
            matches!(
                err,
                StorageError::Format(FormatError::LegacyVersion { version: v, .. }) if v == version
            ),
            "version {version}: {err}"
        );
        assert!(err.to_string().contains("recreate"), "{err}");
    }
}

#[test]
fn future_version_is_unsupported() {
    let artifact = Artifact::build();
    let mut bytes = artifact.bytes.clone();
    bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        artifact.open_variant("future.mkvdup", &bytes),
        Err(StorageError::Format(FormatError::UnsupportedVersion(7)))
    ));
}

#[test]
fn older_supported_versions_read_identically() {
    let artifact = Artifact::build();
    let header = artifact.header();
    let creator_len = header.creator_version.as_deref().unwrap().len();
    let flags_start = FIXED_HEADER_SIZE + 2 + creator_len;
    let flags_len = usize::from(header.source_file_count);

    // version 5: drop the used-flags table
    let mut v5 = artifact.bytes.clone();
    v5.drain(flags_start..flags_start + flags_len);
    v5[8..12].copy_from_slice(&5u32.to_le_bytes());
    let shift = flags_len as u64;
    v5[44..52].copy_from_slice(&(header.delta_offset - shift).to_le_bytes());

    let reader = artifact.open_variant("v5.mkvdup", &v5).unwrap();
    assert_eq!(reader.header().version, 5);
    assert!(reader.creator_version().is_some());
    assert!(reader.source_used(0));
    reader.verify_integrity().unwrap();
    assert!(read_all(&reader) == artifact.expected);

    // version 4: drop the creator string too
    let mut v4 = v5.clone();
    v4.drain(FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + 2 + creator_len);
    v4[8..12].copy_from_slice(&4u32.to_le_bytes());
    let shift = (flags_len + 2 + creator_len) as u64;
    v4[44..52].copy_from_slice(&(header.delta_offset - shift).to_le_bytes());

    let reader = artifact.open_variant("v4.mkvdup", &v4).unwrap();
    assert_eq!(reader.header().version, 4);
    assert_eq!(reader.creator_version(), None);
    reader.verify_integrity().unwrap();
    reader.check_coverage().unwrap();
    assert!(read_all(&reader) == artifact.expected);
}

#[test]
fn bad_magic_and_truncated_footer() {
    let artifact = Artifact::build();

    let mut bytes = artifact.bytes.clone();
    bytes[0] = b'X';
    assert!(matches!(
        artifact.open_variant("magic.mkvdup", &bytes),
        Err(StorageError::Format(FormatError::InvalidMagic(_)))
    ));

    let mut bytes = artifact.bytes.clone();
    let len = bytes.len();
    bytes[len - 1] = b'X';
    assert!(matches!(
        artifact.open_variant("footer.mkvdup", &bytes),
        Err(StorageError::Format(FormatError::InvalidFooterMagic(_)))
    ));

    let bytes = &artifact.bytes[..FIXED_HEADER_SIZE - 1];
    assert!(matches!(
        artifact.open_variant("short.mkvdup", bytes),
        Err(StorageError::Format(FormatError::Truncated { .. }))
    ));
}

#[test]
fn coverage_check_catches_hand_edited_entries() {
    let artifact = Artifact::build();
    let table = artifact.entry_table();

    // shrink the second entry so a hole opens before the third
    let mut bytes = artifact.bytes.clone();
    let length_field = table.start + 28 + 8;
    bytes[length_field..length_field + 8].copy_from_slice(&999u64.to_le_bytes());

    let reader = artifact.open_variant("holey.mkvdup", &bytes).unwrap();
    assert!(matches!(
        reader.check_coverage(),
        Err(StorageError::InvalidEntries(_))
    ));

    // reads across the hole surface the same problem instead of guessing
    let mut buf = [0u8; 8];
    assert!(matches!(
        reader.read_at(&mut buf, 1005),
        Err(StorageError::InvalidEntries(_))
    ));
}

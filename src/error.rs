//! Error types for NTFS volume decoding.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, NtfsError>;

/// Everything that can go wrong while decoding an NTFS volume.
///
/// Variants carry structured fields (offsets, lengths, type codes) rather than
/// opaque strings so callers can recover concrete context without re-parsing
/// the error message.
#[derive(Debug, Error)]
pub enum NtfsError {
    #[error("read of {requested} byte(s) at offset {offset} overruns source of length {source_len}")]
    Overrun {
        offset: u64,
        requested: usize,
        source_len: usize,
    },

    #[error("update sequence mismatch in sector {sector_index} of {structure}: expected {expected:04x}, found {found:04x}")]
    Fixup {
        structure: &'static str,
        sector_index: usize,
        expected: u16,
        found: u16,
    },

    #[error("invalid {structure} at offset {offset}: {reason}")]
    InvalidRecord {
        structure: &'static str,
        offset: u64,
        reason: String,
    },

    #[error("attribute type {attr_type:#x} not found in record {record_number}")]
    AttributeNotFound { record_number: u64, attr_type: u32 },

    #[error("child {name:?} not found in directory record {parent_record}")]
    ChildNotFound { parent_record: u64, name: String },

    #[error("record {record_number} is not a directory")]
    DirectoryNotFound { record_number: u64 },

    #[error("record {record_number} has no resolvable parent")]
    NoParent { record_number: u64 },

    #[error("path {path:?} mixes '/' and '\\\\' separators")]
    UnsupportedPath { path: String },

    #[error("filesystem is corrupt: {reason}")]
    CorruptFilesystem { reason: String },

    #[error("value {raw:#x} is not representable as a {kind}")]
    Value { kind: &'static str, raw: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NtfsError {
    pub fn overrun(offset: u64, requested: usize, source_len: usize) -> Self {
        NtfsError::Overrun {
            offset,
            requested,
            source_len,
        }
    }
}

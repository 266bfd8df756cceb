//! Record index entries
//!
//! Built while scanning a backing file; never holds record bodies.

use std::path::Path;
use std::sync::Arc;

/// Shared handle to a backing file
pub type FileHandle = Arc<Path>;

/// Location of one record body inside a backing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIndexEntry {
    /// Record key
    pub key: String,
    /// Offset of the first body byte
    pub byte_start: u64,
    /// Offset one past the last body byte (exclusive)
    pub byte_end: u64,
    /// File the span refers to
    pub file: FileHandle,
}

impl RecordIndexEntry {
    pub fn new(key: impl Into<String>, byte_start: u64, byte_end: u64, file: FileHandle) -> Self {
        Self {
            key: key.into(),
            byte_start,
            byte_end,
            file,
        }
    }

    /// Body length in bytes
    pub fn len(&self) -> u64 {
        self.byte_end.saturating_sub(self.byte_start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when two spans in the same file share at least one byte
    pub fn overlaps(&self, other: &RecordIndexEntry) -> bool {
        self.file == other.file
            && self.byte_start < other.byte_end
            && other.byte_start < self.byte_end
    }
}

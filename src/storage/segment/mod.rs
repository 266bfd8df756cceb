//! Segment File Module
//!
//! Single-file layout: every record of a store in one file.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                             │
//! │   Magic: "ATDS" (4) | Version: u16 (2)                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Entry (repeated)                                             │
//! │   KeyLen: u32 (4) | BodyLen: u32 (4) | BodyCRC: u32 (4)      │
//! │   Key (KeyLen bytes, UTF-8)                                  │
//! │   Body (BodyLen bytes, JSON document)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are length-prefixed, so a body can contain any byte sequence
//! without being mistaken for an entry boundary. An index entry's span
//! covers the Body only.

mod reader;
mod scanner;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{AtlasError, Result};
use crate::record::{Document, FileHandle, RecordIndexEntry};

use super::{remove_if_exists, sync_dir, temp_path, FileStore, ScanStats, Sections};

pub use reader::SpanReader;
pub use scanner::{Scanned, SegmentScanner};
pub use writer::SegmentWriter;

// =============================================================================
// Shared Constants (used by writer, reader, scanner)
// =============================================================================

/// Magic bytes identifying an AtlasStore segment file
pub(crate) const MAGIC: &[u8; 4] = b"ATDS";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// File header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const HEADER_SIZE: u64 = 6;

/// Entry header size: KeyLen (4) + BodyLen (4) + BodyCRC (4) = 12 bytes
pub(crate) const ENTRY_HEADER_SIZE: u64 = 12;

/// Longest key accepted; anything larger means the entry boundary is lost
pub(crate) const MAX_KEY_LEN: u32 = 64 * 1024;

pub(crate) fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// =============================================================================
// Segment File Store
// =============================================================================

/// Store keeping every record in one length-prefixed file
///
/// ## Concurrency:
/// - `state`: RwLock (concurrent lookups, exclusive index swaps)
/// - `write_lock`: serializes index mutations against the file rewrite
pub struct SegmentFile {
    /// Backing file
    path: FileHandle,

    /// Index and staged documents
    state: RwLock<Sections>,

    /// Serializes read_file / put / remove / save_sections
    write_lock: Mutex<()>,
}

impl SegmentFile {
    /// Create a store for `path`; nothing is read until `read_file`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        Self {
            path: Arc::from(path.as_path()),
            state: RwLock::new(Sections::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every live record into `tmp` and return the new index
    ///
    /// Staged documents are serialized; indexed records that were not staged
    /// are copied over byte-for-byte from the current file.
    fn write_segment(
        &self,
        tmp: &Path,
        mut staged: Vec<(String, Document)>,
        mut cold: Vec<RecordIndexEntry>,
    ) -> Result<Vec<RecordIndexEntry>> {
        staged.sort_by(|a, b| a.0.cmp(&b.0));
        cold.sort_by(|a, b| a.byte_start.cmp(&b.byte_start));

        let mut writer = SegmentWriter::create(tmp)?;
        let mut entries = Vec::with_capacity(staged.len() + cold.len());

        for (key, document) in &staged {
            let body = serde_json::to_vec(document)?;
            // Limits are checked before anything is written, so the entry
            // can be dropped without damaging the file
            let (start, end) = match writer.append(key, &body) {
                Ok(span) => span,
                Err(e @ AtlasError::Encode { .. }) => {
                    tracing::warn!(%key, error = %e, "Dropping record that does not fit a segment entry");
                    continue;
                }
                Err(e) => return Err(e),
            };
            entries.push(RecordIndexEntry::new(key.clone(), start, end, Arc::clone(&self.path)));
        }

        if !cold.is_empty() {
            let mut reader = SpanReader::open(&self.path)?;
            for entry in &cold {
                let body = match reader.read_body(entry) {
                    Ok(body) => body,
                    Err(AtlasError::CorruptRecord { key, reason }) => {
                        tracing::warn!(%key, %reason, "Dropping corrupt record while rewriting segment");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let (start, end) = writer.append(&entry.key, &body)?;
                entries.push(RecordIndexEntry::new(
                    entry.key.clone(),
                    start,
                    end,
                    Arc::clone(&self.path),
                ));
            }
        }

        writer.finish()?;
        Ok(entries)
    }
}

impl FileStore for SegmentFile {
    fn read_file(&self) -> Result<ScanStats> {
        let _write_guard = self.write_lock.lock();

        // Step 1: Create an empty segment if nothing exists yet
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            SegmentWriter::create(&self.path)?.finish()?;
        }

        // Step 2: Walk entry headers, skipping over bodies
        let mut scanner = SegmentScanner::open(Arc::clone(&self.path))?;
        let mut sections = Sections::default();
        let mut stats = ScanStats::default();

        for item in scanner.by_ref() {
            match item? {
                Scanned::Entry(entry) => {
                    if let Some(previous) = sections.index(entry) {
                        tracing::warn!(
                            key = %previous.key,
                            path = %self.path.display(),
                            "Duplicate key in segment file, keeping the later entry"
                        );
                    }
                }
                Scanned::Malformed { offset, reason } => {
                    tracing::warn!(
                        offset,
                        %reason,
                        path = %self.path.display(),
                        "Skipping malformed segment entry"
                    );
                    stats.entries_skipped += 1;
                }
            }
        }

        stats.truncated_tail = scanner.truncated();
        stats.entries_indexed = sections.index_len() as u64;

        // Step 3: Swap in the new index (staged documents are discarded)
        *self.state.write() = sections;

        tracing::debug!(
            path = %self.path.display(),
            indexed = stats.entries_indexed,
            skipped = stats.entries_skipped,
            truncated = stats.truncated_tail,
            "Segment file scanned"
        );
        Ok(stats)
    }

    fn load_data(&self, entry: &RecordIndexEntry) -> Result<Document> {
        SpanReader::open(&entry.file)?.read_document(entry)
    }

    fn load(&self, key: &str) -> Result<Option<Document>> {
        // The read lock keeps save_sections from renaming a new file under
        // the entry being read
        let state = self.state.read();
        if let Some(document) = state.staged(key) {
            return Ok(Some(document.clone()));
        }
        match state.entry(key) {
            Some(entry) => self.load_data(entry).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, document: Document) {
        let _write_guard = self.write_lock.lock();
        self.state.write().stage(key, document);
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        // The body disappears from disk on the next rewrite
        self.state.write().remove(key);
        Ok(())
    }

    fn unload(&self, key: &str) {
        self.state.write().unstage(key);
    }

    fn clear(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.state.write().clear();
        Ok(())
    }

    fn save_sections(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        // Step 1: Snapshot what has to be written
        let (staged, cold) = {
            let state = self.state.read();
            let staged: Vec<(String, Document)> = state
                .staged_documents()
                .map(|(k, d)| (k.clone(), d.clone()))
                .collect();
            let cold: Vec<RecordIndexEntry> = state
                .entries()
                .filter(|e| state.staged(&e.key).is_none())
                .cloned()
                .collect();
            (staged, cold)
        };

        // Step 2: Write the temp file completely (flushed, synced, closed)
        let tmp = temp_path(&self.path);
        let entries = match self.write_segment(&tmp, staged, cold) {
            Ok(entries) => entries,
            Err(e) => {
                let _ = remove_if_exists(&tmp);
                return Err(AtlasError::store_write(self.path.to_path_buf(), e));
            }
        };

        // Step 3: Replace the original and swap in the new offsets while no
        // reader is between an index lookup and its read
        let count = entries.len();
        {
            let mut state = self.state.write();
            if let Err(e) = fs::rename(&tmp, &self.path) {
                let _ = remove_if_exists(&tmp);
                return Err(AtlasError::store_write(self.path.to_path_buf(), e));
            }
            state.replace_index(entries);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = sync_dir(parent) {
                tracing::warn!(error = %e, path = %parent.display(), "Failed to fsync directory after rename");
            }
        }

        tracing::debug!(path = %self.path.display(), records = count, "Segment file saved");
        Ok(())
    }

    fn check_record(&self, key: &str, _document: &Document) -> Result<()> {
        if key.len() > MAX_KEY_LEN as usize {
            return Err(AtlasError::Encode {
                key: key.to_string(),
                reason: format!("key is {} bytes, limit is {}", key.len(), MAX_KEY_LEN),
            });
        }
        Ok(())
    }

    fn entry(&self, key: &str) -> Option<RecordIndexEntry> {
        self.state.read().entry(key).cloned()
    }

    fn staged(&self, key: &str) -> Option<Document> {
        self.state.read().staged(key).cloned()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.state.read().contains(key)
    }

    fn key_set(&self) -> std::collections::HashSet<String> {
        self.state.read().keys()
    }
}

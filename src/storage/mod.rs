//! Storage Module
//!
//! File-backed record stores with an in-memory key → byte span index.
//!
//! ## Responsibilities
//! - Build the index by scanning backing files (bodies are never decoded)
//! - Serve single records by seeking straight to their span
//! - Stage documents and rewrite backing files atomically on save
//!
//! ## Layouts
//! - [`SegmentFile`]: every record in one length-prefixed file
//! - [`FolderStore`]: one `<key>.json` file per record
//! - [`MemoryStore`]: no backing files at all
//!
//! ## Save Protocol
//! ```text
//! write <file>.tmp ──► flush + fsync + close ──► rename over <file> ──► fsync dir
//!        │ error                                        │ error
//!        └──────────► remove <file>.tmp, keep <file> ◄──┘
//! ```

mod folder;
mod memory;
mod sections;
mod segment;

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::{Document, RecordIndexEntry};

pub use folder::{escape_key, FolderStore};
pub use memory::MemoryStore;
pub use segment::{Scanned, SegmentFile, SegmentScanner, SegmentWriter};

pub(crate) use sections::Sections;

/// Outcome of rebuilding an index
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    /// Entries now present in the index
    pub entries_indexed: u64,

    /// Malformed entries that were skipped
    pub entries_skipped: u64,

    /// Whether the scan stopped at a partially written trailing entry
    pub truncated_tail: bool,
}

/// A backing store for one manager
///
/// ## Concurrency:
/// - All methods use `&self`
/// - Lookups run concurrently; index mutations and file rewrites are serialized
pub trait FileStore: Send + Sync {
    /// Discard the index and all staged documents, then rebuild the index
    /// from the backing file(s)
    fn read_file(&self) -> Result<ScanStats>;

    /// Read and parse the body an index entry points at
    fn load_data(&self, entry: &RecordIndexEntry) -> Result<Document>;

    /// Stage a document for the next save, replacing any staged one
    fn put(&self, key: &str, document: Document);

    /// Forget a key entirely; removing an unknown key is a no-op
    fn remove(&self, key: &str) -> Result<()>;

    /// Drop a staged document, keeping the index entry
    fn unload(&self, key: &str);

    /// Drop every index entry and staged document
    ///
    /// Layouts that keep one file per record delete those files here; the
    /// single-file layout empties on the next save.
    fn clear(&self) -> Result<()>;

    /// Durably write all live records
    fn save_sections(&self) -> Result<()>;

    /// Reject a record this layout cannot hold, before it is staged
    fn check_record(&self, _key: &str, _document: &Document) -> Result<()> {
        Ok(())
    }

    /// Index entry for a key
    fn entry(&self, key: &str) -> Option<RecordIndexEntry>;

    /// Staged (not yet saved) document for a key
    fn staged(&self, key: &str) -> Option<Document>;

    fn contains_key(&self, key: &str) -> bool;

    fn key_set(&self) -> HashSet<String>;

    fn size(&self) -> usize {
        self.key_set().len()
    }

    /// Latest document for a key: staged first, then the indexed span
    ///
    /// File-backed stores override this so the index lookup and the read
    /// cannot straddle a file rewrite.
    fn load(&self, key: &str) -> Result<Option<Document>> {
        if let Some(document) = self.staged(key) {
            return Ok(Some(document));
        }
        match self.entry(key) {
            Some(entry) => self.load_data(&entry).map(Some),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Shared File Helpers
// =============================================================================

/// Sibling temp path used while rewriting `path`
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Fsync a directory so a rename inside it is durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Remove a file, treating "already gone" as success
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

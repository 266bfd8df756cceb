//! Memory Store
//!
//! A store with no backing files. Saved documents are retained in memory so
//! evicted records can still be faulted back in; nothing survives the process.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::{AtlasError, Result};
use crate::record::{Document, RecordIndexEntry};

use super::{FileStore, ScanStats};

#[derive(Debug, Default)]
struct MemoryState {
    /// Documents promoted by the last save
    retained: HashMap<String, Document>,
    /// Documents waiting for the next save
    staged: HashMap<String, Document>,
}

/// In-memory store for volatile managers
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryStore {
    /// Nothing to scan; retained and staged documents stay as they are
    fn read_file(&self) -> Result<ScanStats> {
        let state = self.state.read();
        Ok(ScanStats {
            entries_indexed: state.retained.len() as u64,
            ..ScanStats::default()
        })
    }

    fn load_data(&self, entry: &RecordIndexEntry) -> Result<Document> {
        Err(AtlasError::corrupt(
            &entry.key,
            "memory stores have no backing file to read from",
        ))
    }

    fn put(&self, key: &str, document: Document) {
        self.state.write().staged.insert(key.to_string(), document);
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.write();
        state.staged.remove(key);
        state.retained.remove(key);
        Ok(())
    }

    fn unload(&self, key: &str) {
        self.state.write().staged.remove(key);
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        state.staged.clear();
        state.retained.clear();
        Ok(())
    }

    fn save_sections(&self) -> Result<()> {
        let mut state = self.state.write();
        let staged = std::mem::take(&mut state.staged);
        state.retained.extend(staged);
        Ok(())
    }

    fn entry(&self, _key: &str) -> Option<RecordIndexEntry> {
        None
    }

    fn staged(&self, key: &str) -> Option<Document> {
        self.state.read().staged.get(key).cloned()
    }

    fn contains_key(&self, key: &str) -> bool {
        let state = self.state.read();
        state.retained.contains_key(key) || state.staged.contains_key(key)
    }

    fn key_set(&self) -> HashSet<String> {
        let state = self.state.read();
        state
            .retained
            .keys()
            .chain(state.staged.keys())
            .cloned()
            .collect()
    }

    fn load(&self, key: &str) -> Result<Option<Document>> {
        let state = self.state.read();
        Ok(state
            .staged
            .get(key)
            .or_else(|| state.retained.get(key))
            .cloned())
    }
}

//! Index + staging table shared by the file-backed stores

use std::collections::{HashMap, HashSet};

use crate::record::{Document, RecordIndexEntry};

/// Index entries and staged documents of one store
#[derive(Debug, Default)]
pub(crate) struct Sections {
    /// key → byte span of the last saved body
    index: HashMap<String, RecordIndexEntry>,
    /// key → document waiting for the next save
    staged: HashMap<String, Document>,
}

impl Sections {
    /// Insert an index entry, returning the one it replaced
    pub fn index(&mut self, entry: RecordIndexEntry) -> Option<RecordIndexEntry> {
        self.index.insert(entry.key.clone(), entry)
    }

    pub fn entry(&self, key: &str) -> Option<&RecordIndexEntry> {
        self.index.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RecordIndexEntry> {
        self.index.values()
    }

    pub fn stage(&mut self, key: &str, document: Document) {
        self.staged.insert(key.to_string(), document);
    }

    pub fn staged(&self, key: &str) -> Option<&Document> {
        self.staged.get(key)
    }

    pub fn staged_documents(&self) -> impl Iterator<Item = (&String, &Document)> {
        self.staged.iter()
    }

    pub fn unstage(&mut self, key: &str) -> Option<Document> {
        self.staged.remove(key)
    }

    /// Drop both the index entry and the staged document
    pub fn remove(&mut self, key: &str) -> Option<RecordIndexEntry> {
        self.staged.remove(key);
        self.index.remove(key)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.staged.clear();
    }

    /// Swap in a freshly written index and forget what was staged
    pub fn replace_index(&mut self, entries: Vec<RecordIndexEntry>) {
        self.staged.clear();
        self.index = entries.into_iter().map(|e| (e.key.clone(), e)).collect();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key) || self.staged.contains_key(key)
    }

    pub fn keys(&self) -> HashSet<String> {
        self.index
            .keys()
            .chain(self.staged.keys())
            .cloned()
            .collect()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }
}

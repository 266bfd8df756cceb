//! Folder Store
//!
//! Per-key layout: one file per record inside a folder.
//!
//! ## File Format
//! ```text
//! {"key":"<key>"}\n          ← header line, read during scans
//! <JSON document>            ← body, read only on demand
//! ```
//!
//! File names are `<escaped key>.json`; bytes outside `[A-Za-z0-9_.-]` are
//! written as `%XX`, so every key maps to exactly one safe file name. The
//! header carries the real key.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::record::{Document, RecordIndexEntry};

use super::{remove_if_exists, sync_dir, temp_path, FileStore, ScanStats, Sections};

/// Extension of record files
const EXTENSION: &str = "json";

/// Longest header line read during a scan
const MAX_HEADER_LEN: u64 = 64 * 1024;

/// Longest file name most filesystems accept
const MAX_FILE_NAME: usize = 255;

/// Header line of a record file
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    key: String,
}

/// Store keeping one file per record
pub struct FolderStore {
    /// Folder holding the record files
    folder: PathBuf,

    /// Index and staged documents
    state: RwLock<Sections>,

    /// Serializes read_file / put / remove / save_sections
    write_lock: Mutex<()>,
}

impl FolderStore {
    /// Create a store for `folder`; nothing is read until `read_file`
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            state: RwLock::new(Sections::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Folder holding the record files
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// File a key is saved to
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.folder.join(format!("{}.{}", escape_key(key), EXTENSION))
    }

    /// Read only the header line of a record file
    fn scan_file(path: &Path) -> Result<RecordIndexEntry> {
        let name = path.display().to_string();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut line = String::new();
        BufReader::new(file)
            .take(MAX_HEADER_LEN)
            .read_line(&mut line)
            .map_err(|e| AtlasError::corrupt(name.as_str(), e))?;

        if !line.ends_with('\n') {
            return Err(AtlasError::corrupt(name, "missing or oversized header line"));
        }
        let header: Header =
            serde_json::from_str(line.trim_end()).map_err(|e| AtlasError::corrupt(name, e))?;

        Ok(RecordIndexEntry::new(
            header.key,
            line.len() as u64,
            file_len,
            Arc::from(path),
        ))
    }

    /// Write one record file through its temp sibling
    fn write_record(&self, key: &str, document: &Document) -> Result<RecordIndexEntry> {
        let path = self.path_for(key);
        let tmp = temp_path(&path);

        let written = Self::write_temp(&tmp, key, document).and_then(|(start, end)| {
            fs::rename(&tmp, &path)?;
            Ok((start, end))
        });

        match written {
            Ok((start, end)) => Ok(RecordIndexEntry::new(key, start, end, Arc::from(path.as_path()))),
            Err(e) => {
                let _ = remove_if_exists(&tmp);
                Err(AtlasError::store_write(path, e))
            }
        }
    }

    /// Returns the body span inside the written file
    fn write_temp(tmp: &Path, key: &str, document: &Document) -> Result<(u64, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp)?;
        let mut writer = BufWriter::new(file);

        let mut header = serde_json::to_vec(&Header {
            key: key.to_string(),
        })?;
        header.push(b'\n');
        let body = serde_json::to_vec_pretty(document)?;

        writer.write_all(&header)?;
        writer.write_all(&body)?;

        let file = writer
            .into_inner()
            .map_err(|e| AtlasError::store_write(tmp, e.error()))?;
        file.sync_all()?;

        let start = header.len() as u64;
        Ok((start, start + body.len() as u64))
    }
}

impl FileStore for FolderStore {
    fn read_file(&self) -> Result<ScanStats> {
        let _write_guard = self.write_lock.lock();

        fs::create_dir_all(&self.folder)?;

        let mut sections = Sections::default();
        let mut stats = ScanStats::default();

        for dir_entry in fs::read_dir(&self.folder)? {
            let path = dir_entry?.path();
            // Temp files end in ".tmp" and are skipped here too
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }

            match Self::scan_file(&path) {
                Ok(entry) => {
                    if let Some(previous) = sections.index(entry) {
                        tracing::warn!(
                            key = %previous.key,
                            replaced = %previous.file.display(),
                            "Two record files share a key, keeping the later one"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record file");
                    stats.entries_skipped += 1;
                }
            }
        }

        stats.entries_indexed = sections.index_len() as u64;
        *self.state.write() = sections;

        tracing::debug!(
            folder = %self.folder.display(),
            indexed = stats.entries_indexed,
            skipped = stats.entries_skipped,
            "Record folder scanned"
        );
        Ok(stats)
    }

    fn load_data(&self, entry: &RecordIndexEntry) -> Result<Document> {
        let mut file = File::open(&entry.file)?;
        file.seek(SeekFrom::Start(entry.byte_start))?;

        let mut body = Vec::with_capacity(entry.len() as usize);
        file.read_to_end(&mut body)?;

        serde_json::from_slice(&body).map_err(|e| AtlasError::corrupt(&entry.key, e))
    }

    fn load(&self, key: &str) -> Result<Option<Document>> {
        // Held across the read so remove/clear cannot delete the file first
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
        let mut state = self.state.write();

        // The file goes first; a failed delete leaves the key indexed
        let path = match state.entry(key) {
            Some(entry) => entry.file.to_path_buf(),
            None => self.path_for(key),
        };
        remove_if_exists(&path)?;
        state.remove(key);
        Ok(())
    }

    fn unload(&self, key: &str) {
        self.state.write().unstage(key);
    }

    fn clear(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        let mut state = self.state.write();

        let indexed: Vec<RecordIndexEntry> = state.entries().cloned().collect();
        for entry in indexed {
            remove_if_exists(&entry.file)?;
            state.remove(&entry.key);
        }
        state.clear();

        tracing::debug!(folder = %self.folder.display(), "Record folder cleared");
        Ok(())
    }

    fn save_sections(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        fs::create_dir_all(&self.folder)?;

        let mut staged: Vec<(String, Document)> = self
            .state
            .read()
            .staged_documents()
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect();
        staged.sort_by(|a, b| a.0.cmp(&b.0));

        // One file at a time; a failed file does not stop the rest, the first
        // failure is reported once everything else has landed
        let mut failure = None;
        let mut written = Vec::with_capacity(staged.len());
        for (key, document) in &staged {
            match self.write_record(key, document) {
                Ok(entry) => written.push(entry),
                Err(e) => {
                    tracing::warn!(%key, error = %e, "Failed to write record file");
                    failure.get_or_insert(e);
                }
            }
        }

        if !written.is_empty() {
            if let Err(e) = sync_dir(&self.folder) {
                tracing::warn!(error = %e, folder = %self.folder.display(), "Failed to fsync record folder");
            }
        }

        let count = written.len();
        {
            let mut state = self.state.write();
            for entry in written {
                state.unstage(&entry.key);
                state.index(entry);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                tracing::debug!(folder = %self.folder.display(), records = count, "Record folder saved");
                Ok(())
            }
        }
    }

    fn check_record(&self, key: &str, _document: &Document) -> Result<()> {
        // Room for the ".json.tmp" suffix used while writing
        let name_len = escape_key(key).len() + EXTENSION.len() + ".tmp".len() + 1;
        if name_len > MAX_FILE_NAME {
            return Err(AtlasError::Encode {
                key: key.to_string(),
                reason: format!("file name would be {} bytes, limit is {}", name_len, MAX_FILE_NAME),
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

    fn key_set(&self) -> HashSet<String> {
        self.state.read().keys()
    }
}

/// Map a key to a file stem that is safe on every platform
///
/// "user/42" → "user%2F42", "" → "%"
pub fn escape_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }

    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' => stem.push(byte as char),
            _ => stem.push_str(&format!("%{:02X}", byte)),
        }
    }
    stem
}

//! Tests for the Manager object cache
//!
//! These tests verify:
//! - Hot/cold lookups and fault-in from each store layout
//! - put/insert/update/remove/unload semantics
//! - At most one save at a time
//! - Bulk loading with per-record failures
//! - Idle eviction
//! - remove and cold reads racing a save

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use atlasstore::storage::{FileStore, MemoryStore, SegmentFile};
use atlasstore::{AtlasError, Document, ManagerConfig, Manager, Record, RecordIndexEntry, ScanStats};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: String,
    name: String,
    #[serde(default)]
    count: u32,
}

impl Widget {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            count: 0,
        }
    }
}

impl Record for Widget {
    fn record_key(&self) -> String {
        self.id.clone()
    }
}

/// Memory store whose save blocks until released, counting rewrites
struct BlockingStore {
    inner: MemoryStore,
    saves: Arc<AtomicUsize>,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl FileStore for BlockingStore {
    fn read_file(&self) -> atlasstore::Result<ScanStats> {
        self.inner.read_file()
    }

    fn load_data(&self, entry: &RecordIndexEntry) -> atlasstore::Result<Document> {
        self.inner.load_data(entry)
    }

    fn put(&self, key: &str, document: Document) {
        self.inner.put(key, document)
    }

    fn remove(&self, key: &str) -> atlasstore::Result<()> {
        self.inner.remove(key)
    }

    fn unload(&self, key: &str) {
        self.inner.unload(key)
    }

    fn clear(&self) -> atlasstore::Result<()> {
        self.inner.clear()
    }

    fn save_sections(&self) -> atlasstore::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.entered.send(()).unwrap();
        self.release.recv().unwrap();
        self.inner.save_sections()
    }

    fn entry(&self, key: &str) -> Option<RecordIndexEntry> {
        self.inner.entry(key)
    }

    fn staged(&self, key: &str) -> Option<Document> {
        self.inner.staged(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    fn key_set(&self) -> HashSet<String> {
        self.inner.key_set()
    }

    fn load(&self, key: &str) -> atlasstore::Result<Option<Document>> {
        self.inner.load(key)
    }
}

/// Segment store whose first `put` blocks until released
struct GatedStore {
    inner: SegmentFile,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl GatedStore {
    fn new(inner: SegmentFile, entered: Sender<()>, release: Receiver<()>) -> Self {
        Self {
            inner,
            gate: Mutex::new(Some((entered, release))),
        }
    }
}

impl FileStore for GatedStore {
    fn read_file(&self) -> atlasstore::Result<ScanStats> {
        self.inner.read_file()
    }

    fn load_data(&self, entry: &RecordIndexEntry) -> atlasstore::Result<Document> {
        self.inner.load_data(entry)
    }

    fn put(&self, key: &str, document: Document) {
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        self.inner.put(key, document)
    }

    fn remove(&self, key: &str) -> atlasstore::Result<()> {
        self.inner.remove(key)
    }

    fn unload(&self, key: &str) {
        self.inner.unload(key)
    }

    fn clear(&self) -> atlasstore::Result<()> {
        self.inner.clear()
    }

    fn save_sections(&self) -> atlasstore::Result<()> {
        self.inner.save_sections()
    }

    fn check_record(&self, key: &str, document: &Document) -> atlasstore::Result<()> {
        self.inner.check_record(key, document)
    }

    fn entry(&self, key: &str) -> Option<RecordIndexEntry> {
        self.inner.entry(key)
    }

    fn staged(&self, key: &str) -> Option<Document> {
        self.inner.staged(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    fn key_set(&self) -> HashSet<String> {
        self.inner.key_set()
    }

    fn load(&self, key: &str) -> atlasstore::Result<Option<Document>> {
        self.inner.load(key)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("widgets.dat");
    (temp_dir, path)
}

fn open_segment(path: &Path, config: ManagerConfig) -> Manager<Widget> {
    let manager = Manager::segment("widgets", path, config);
    manager.load_storage().unwrap();
    manager
}

/// Write raw documents straight into a segment file
fn write_documents(path: &Path, documents: &[(&str, Document)]) {
    let store = SegmentFile::new(path);
    store.read_file().unwrap();
    for (key, document) in documents {
        store.put(key, document.clone());
    }
    store.save_sections().unwrap();
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_get_missing_returns_none() {
    let manager: Manager<Widget> = Manager::in_memory("widgets", ManagerConfig::default());

    assert!(manager.get("missing").unwrap().is_none());
    assert!(!manager.contains_key("missing"));
}

#[test]
fn test_put_then_get_is_hot() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());

    assert!(manager.put("abc", Widget::new("abc", "widget")).is_none());

    assert!(manager.is_hot("abc"));
    assert_eq!(manager.get("abc").unwrap(), Some(Widget::new("abc", "widget")));
}

#[test]
fn test_put_returns_previous_value() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());
    manager.put("abc", Widget::new("abc", "first"));

    let previous = manager.put("abc", Widget::new("abc", "second"));

    assert_eq!(previous.unwrap().name, "first");
    assert_eq!(manager.get("abc").unwrap().unwrap().name, "second");
}

#[test]
fn test_insert_uses_record_key() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());

    manager.insert(Widget::new("w-1", "gear"));

    assert!(manager.contains_key("w-1"));
}

#[test]
fn test_cold_record_faults_in() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("abc", Widget::new("abc", "widget"));
    manager.save().unwrap();

    let manager = open_segment(&path, ManagerConfig::default());
    assert!(!manager.is_hot("abc"));
    assert!(manager.contains_key("abc"));
    assert_eq!(manager.hot_count(), 0);

    let widget = manager.get("abc").unwrap().unwrap();

    assert_eq!(widget, Widget::new("abc", "widget"));
    assert!(manager.is_hot("abc"));
    assert_eq!(manager.hot_count(), 1);
}

#[test]
fn test_decode_failure_carries_document() {
    let (_temp, path) = setup_temp_segment();
    write_documents(&path, &[("bad", json!({ "id": 5 }))]);

    let manager = open_segment(&path, ManagerConfig::default());
    let result = manager.get("bad");

    match result {
        Err(AtlasError::Decode { key, document, .. }) => {
            assert_eq!(key, "bad");
            assert_eq!(*document, json!({ "id": 5 }));
        }
        other => panic!("expected a decode error, got {:?}", other),
    }
    assert!(!manager.is_hot("bad"));
}

#[test]
fn test_size_counts_hot_and_stored_keys_once() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("a", Widget::new("a", "a"));
    manager.put("b", Widget::new("b", "b"));
    manager.save().unwrap();

    let manager = open_segment(&path, ManagerConfig::default());
    manager.get("a").unwrap();
    manager.put("c", Widget::new("c", "c"));

    assert_eq!(manager.size(), 3);
    let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(manager.key_set(), expected);
    assert!(!manager.is_empty());
}

#[test]
fn test_unique_id_is_fresh_uuid() {
    let manager: Manager<Widget> = Manager::in_memory("widgets", ManagerConfig::default());

    let id = manager.unique_id();

    assert_eq!(id.len(), 36);
    assert!(!manager.contains_key(&id));
    assert_ne!(id, manager.unique_id());
}

#[test]
fn test_load_single_unknown_key_errors() {
    let manager: Manager<Widget> = Manager::in_memory("widgets", ManagerConfig::default());

    let result = manager.load_single("nobody");

    assert!(matches!(result, Err(AtlasError::KeyNotFound(k)) if k == "nobody"));
}

// =============================================================================
// Mutation Tests
// =============================================================================

#[test]
fn test_update_mutates_in_place() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());
    manager.put("abc", Widget::new("abc", "widget"));

    let count = manager
        .update("abc", |w| {
            w.count += 2;
            w.count
        })
        .unwrap();

    assert_eq!(count, Some(2));
    assert_eq!(manager.get("abc").unwrap().unwrap().count, 2);
    assert_eq!(manager.update("missing", |w| w.count).unwrap(), None);
}

#[test]
fn test_update_faults_in_cold_record() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("abc", Widget::new("abc", "widget"));
    manager.save().unwrap();

    let manager = open_segment(&path, ManagerConfig::default());
    manager.update("abc", |w| w.name = "renamed".to_string()).unwrap();

    assert_eq!(manager.get("abc").unwrap().unwrap().name, "renamed");
}

#[test]
fn test_remove_from_hot_and_store() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("abc", Widget::new("abc", "widget"));
    manager.save().unwrap();

    let removed = manager.remove("abc").unwrap();
    manager.save().unwrap();

    assert_eq!(removed, Some(Widget::new("abc", "widget")));
    let manager = open_segment(&path, ManagerConfig::default());
    assert!(!manager.contains_key("abc"));
}

#[test]
fn test_remove_absent_key_is_noop() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());
    manager.put("keep", Widget::new("keep", "k"));

    assert_eq!(manager.remove("missing").unwrap(), None);
    assert_eq!(manager.remove("missing").unwrap(), None);
    assert_eq!(manager.size(), 1);
}

#[test]
fn test_unload_then_get_faults_back_in() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());
    manager.put("abc", Widget::new("abc", "widget"));
    manager.save().unwrap();

    assert!(manager.unload("abc"));
    assert!(!manager.is_hot("abc"));
    assert!(manager.contains_key("abc"));

    assert_eq!(manager.get("abc").unwrap().unwrap().name, "widget");
    assert!(manager.is_hot("abc"));
}

#[test]
fn test_clear_persists_empty_state() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("a", Widget::new("a", "a"));
    manager.save().unwrap();

    manager.clear().unwrap();

    assert!(manager.is_empty());
    let manager = open_segment(&path, ManagerConfig::default());
    assert_eq!(manager.size(), 0);
}

#[test]
fn test_clear_persists_empty_state_in_folder() {
    let temp_dir = TempDir::new().unwrap();
    let folder = temp_dir.path().join("widgets");
    let manager: Manager<Widget> = Manager::folder("widgets", &folder, ManagerConfig::default());
    manager.load_storage().unwrap();
    manager.put("a", Widget::new("a", "a"));
    manager.put("b", Widget::new("b", "b"));
    manager.save().unwrap();

    manager.clear().unwrap();

    assert!(manager.is_empty());
    let manager: Manager<Widget> = Manager::folder("widgets", &folder, ManagerConfig::default());
    manager.load_storage().unwrap();
    assert_eq!(manager.size(), 0);
    assert!(manager.get("a").unwrap().is_none());
}

// =============================================================================
// Save Tests
// =============================================================================

#[test]
fn test_save_reports_stats() {
    let manager = Manager::in_memory("widgets", ManagerConfig::default());
    for i in 0..5 {
        manager.insert(Widget::new(&format!("w{}", i), "w"));
    }

    let stats = manager.save().unwrap();

    assert_eq!(stats.records_saved, 5);
    assert_eq!(stats.records_failed, 0);
}

#[test]
fn test_concurrent_save_is_rejected() {
    let (entered_tx, entered_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let saves = Arc::new(AtomicUsize::new(0));

    let store = BlockingStore {
        inner: MemoryStore::new(),
        saves: Arc::clone(&saves),
        entered: entered_tx,
        release: release_rx,
    };
    let manager = Arc::new(Manager::new("widgets", store, ManagerConfig::default()));
    manager.put("abc", Widget::new("abc", "widget"));

    let first = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.save())
    };

    // Wait until the first save is inside the rewrite
    entered_rx.recv().unwrap();
    assert!(manager.is_saving());

    let second = manager.save();
    assert!(matches!(
        second,
        Err(AtlasError::ConcurrentSave { ref manager, .. }) if manager == "widgets"
    ));

    release_tx.send(()).unwrap();
    assert!(first.join().unwrap().is_ok());

    assert_eq!(saves.load(Ordering::SeqCst), 1);
    assert!(!manager.is_saving());
}

#[test]
fn test_failed_save_releases_guard() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("a", Widget::new("a", "a"));

    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::create_dir(&tmp).unwrap();

    assert!(matches!(manager.save(), Err(AtlasError::StoreWrite { .. })));
    assert!(!manager.is_saving());

    fs::remove_dir(&tmp).unwrap();
    assert!(manager.save().is_ok());
}

#[test]
fn test_oversized_key_does_not_block_save() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    let long_id = "x".repeat(70 * 1024);
    manager.insert(Widget::new("good", "kept"));
    manager.insert(Widget::new(&long_id, "too long"));

    let stats = manager.save().unwrap();

    assert_eq!(stats.records_saved, 1);
    assert_eq!(stats.records_failed, 1);
    let manager = open_segment(&path, ManagerConfig::default());
    assert_eq!(manager.get("good").unwrap().unwrap().name, "kept");
    assert!(!manager.contains_key(&long_id));
}

#[test]
fn test_save_with_multiple_threads() {
    let (_temp, path) = setup_temp_segment();
    let config = ManagerConfig::builder().saving_threads(4).build();
    let manager = open_segment(&path, config);
    for i in 0..100 {
        manager.insert(Widget::new(&format!("w{:03}", i), "w"));
    }

    let stats = manager.save().unwrap();
    assert_eq!(stats.records_saved, 100);

    let manager = open_segment(&path, ManagerConfig::default());
    assert_eq!(manager.size(), 100);
}

// =============================================================================
// Load Tests
// =============================================================================

#[test]
fn test_load_all_skips_undecodable_records() {
    let (_temp, path) = setup_temp_segment();
    write_documents(
        &path,
        &[
            ("a", json!({ "id": "a", "name": "a" })),
            ("b", json!({ "id": "b", "name": "b" })),
            ("bad", json!("not a widget")),
        ],
    );

    let config = ManagerConfig::builder().loading_threads(3).build();
    let manager = open_segment(&path, config);
    let stats = manager.load_all().unwrap();

    assert_eq!(stats.loaded, 2);
    assert_eq!(stats.failed, 1);
    assert!(manager.is_hot("a"));
    assert!(!manager.is_hot("bad"));
}

#[test]
fn test_initial_load_skipped_with_auto_cleanup() {
    let (_temp, path) = setup_temp_segment();
    write_documents(&path, &[("a", json!({ "id": "a", "name": "a" }))]);

    let config = ManagerConfig::builder().auto_cleanup(true).build();
    let manager = open_segment(&path, config);
    let stats = manager.initial_load().unwrap();

    assert_eq!(stats.loaded, 0);
    assert_eq!(manager.hot_count(), 0);
    assert!(manager.get("a").unwrap().is_some());
}

#[test]
fn test_initial_load_decodes_everything() {
    let (_temp, path) = setup_temp_segment();
    write_documents(
        &path,
        &[
            ("a", json!({ "id": "a", "name": "a" })),
            ("b", json!({ "id": "b", "name": "b" })),
        ],
    );

    let manager = open_segment(&path, ManagerConfig::default());
    let stats = manager.initial_load().unwrap();

    assert_eq!(stats.loaded, 2);
    assert_eq!(manager.hot_count(), 2);
}

#[test]
fn test_reload_discards_unsaved_changes_to_stored_records() {
    let (_temp, path) = setup_temp_segment();
    let manager = open_segment(&path, ManagerConfig::default());
    manager.put("a", Widget::new("a", "saved"));
    manager.save().unwrap();

    manager.put("a", Widget::new("a", "unsaved"));
    manager.put("new", Widget::new("new", "memory only"));
    manager.reload().unwrap();

    assert_eq!(manager.get("a").unwrap().unwrap().name, "saved");
    assert!(manager.is_hot("new"));
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_cleanup_evicts_idle_records() {
    let config = ManagerConfig::builder()
        .cleanup_time(Duration::from_millis(200))
        .build();
    let manager = Manager::in_memory("widgets", config);
    manager.put("abc", Widget::new("abc", "widget"));

    thread::sleep(Duration::from_millis(500));
    manager.put("fresh", Widget::new("fresh", "f"));

    let evicted = manager.cleanup().unwrap();

    assert_eq!(evicted, 1);
    assert!(!manager.is_hot("abc"));
    assert!(manager.is_hot("fresh"));

    // Saved before eviction, so it can be faulted back in
    assert_eq!(manager.get("abc").unwrap().unwrap(), Widget::new("abc", "widget"));
    assert!(manager.is_hot("abc"));
}

#[test]
fn test_access_refreshes_idle_time() {
    let config = ManagerConfig::builder()
        .cleanup_time(Duration::from_millis(1000))
        .build();
    let manager = Manager::in_memory("widgets", config);
    manager.put("abc", Widget::new("abc", "widget"));

    thread::sleep(Duration::from_millis(600));
    manager.get("abc").unwrap();
    thread::sleep(Duration::from_millis(600));

    assert!(manager.idle_time("abc").unwrap() < Duration::from_millis(1000));
    assert_eq!(manager.cleanup().unwrap(), 0);
    assert!(manager.is_hot("abc"));
}

#[test]
fn test_cleanup_persists_before_evicting() {
    let (_temp, path) = setup_temp_segment();
    let config = ManagerConfig::builder()
        .cleanup_time(Duration::from_millis(100))
        .build();
    let manager = open_segment(&path, config);
    manager.put("abc", Widget::new("abc", "widget"));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(manager.cleanup().unwrap(), 1);

    let reopened = open_segment(&path, ManagerConfig::default());
    assert_eq!(reopened.get("abc").unwrap().unwrap().name, "widget");
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_and_writers() {
    let manager = Arc::new(Manager::in_memory("widgets", ManagerConfig::default()));
    for i in 0..50 {
        manager.insert(Widget::new(&format!("w{}", i), "w"));
    }

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("w{}", i);
                    assert!(manager.get(&key).unwrap().is_some());
                    manager.update(&key, |w| w.count += 1).unwrap();
                }
                manager.insert(Widget::new(&format!("t{}", t), "t"));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.size(), 58);
    assert_eq!(manager.get("w0").unwrap().unwrap().count, 8);
}

#[test]
fn test_remove_during_save_stays_removed() {
    let (_temp, path) = setup_temp_segment();
    let (entered_tx, entered_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let store = GatedStore::new(SegmentFile::new(&path), entered_tx, release_rx);
    let manager = Arc::new(Manager::new("widgets", store, ManagerConfig::default()));
    manager.load_storage().unwrap();
    manager.put("k", Widget::new("k", "doomed"));
    manager.put("keep", Widget::new("keep", "kept"));

    let saver = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.save())
    };

    // The save has snapshotted the hot set and is staging records
    entered_rx.recv().unwrap();

    let remover = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.remove("k"))
    };
    thread::sleep(Duration::from_millis(50));
    release_tx.send(()).unwrap();

    assert!(saver.join().unwrap().is_ok());
    assert_eq!(remover.join().unwrap().unwrap(), Some(Widget::new("k", "doomed")));
    assert!(!manager.contains_key("k"));
    assert!(manager.get("k").unwrap().is_none());

    manager.save().unwrap();
    let reopened = open_segment(&path, ManagerConfig::default());
    assert!(!reopened.contains_key("k"));
    assert_eq!(reopened.get("keep").unwrap().unwrap().name, "kept");
}

#[test]
fn test_cold_reads_during_saves() {
    let (_temp, path) = setup_temp_segment();
    let manager = Arc::new(open_segment(&path, ManagerConfig::default()));
    for i in 0..20 {
        manager.insert(Widget::new(&format!("k{:02}", i), "cold"));
    }
    manager.save().unwrap();
    for i in 0..20 {
        manager.unload(&format!("k{:02}", i));
    }

    // Each save adds a record that sorts first, shifting every cold offset
    let writer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for round in 0..30 {
                manager.insert(Widget::new(&format!("a{:03}", round), "shift"));
                manager.save().unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k{:02}", (i + t * 5) % 20);
                    manager.unload(&key);
                    let widget = manager.get(&key).unwrap().unwrap();
                    assert_eq!(widget.name, "cold");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let reopened = open_segment(&path, ManagerConfig::default());
    assert_eq!(reopened.size(), 50);
}

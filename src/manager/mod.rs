//! Manager Module
//!
//! A per-type object cache in front of a [`FileStore`].
//!
//! ## Responsibilities
//! - Serve get/put/remove from the hot set, faulting cold records in on demand
//! - Track when each hot record was last touched
//! - Encode and rewrite everything on save (one save at a time)
//! - Background auto-save and idle eviction (see `workers`)
//!
//! ## Record Lifecycle
//! ```text
//!            get (fault-in)            cleanup / unload
//!   Cold ─────────────────────► Hot ─────────────────────► Evicted (= Cold)
//!     ▲                          │ ▲                            │
//!     │                          │ └──── put ◄── (new key)      │
//!     └──────────────────────────┴─────── remove ──► Removed ◄──┘
//! ```

mod pool;
mod workers;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::error::{AtlasError, Result};
use crate::record::Record;
use crate::storage::{FileStore, FolderStore, MemoryStore, ScanStats, SegmentFile};

// =============================================================================
// Cached Record
// =============================================================================

/// A decoded record in the hot set
#[derive(Debug)]
pub struct CachedRecord<T> {
    value: T,
    /// Milliseconds since the manager's epoch
    last_access: AtomicU64,
}

impl<T> CachedRecord<T> {
    fn new(value: T, now: u64) -> Self {
        Self {
            value,
            last_access: AtomicU64::new(now),
        }
    }

    fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Pass Statistics
// =============================================================================

/// Outcome of a bulk load
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    /// Records decoded into the hot set
    pub loaded: u64,
    /// Records that could not be read or decoded
    pub failed: u64,
}

/// Outcome of a save
#[derive(Debug, Default, Clone)]
pub struct SaveStats {
    /// Records encoded and written
    pub records_saved: u64,
    /// Records skipped because they failed to encode
    pub records_failed: u64,
    /// Wall time of the whole save
    pub elapsed: Duration,
}

// =============================================================================
// Manager
// =============================================================================

/// Concurrent cache of `T` records keyed by string ids
///
/// ## Concurrency:
/// - `hot`: RwLock over the hot set; access stamps are atomics, so hot reads
///   only take the read lock
/// - `saving`: fail-fast guard, a second concurrent save is rejected
/// - The store serializes its own index mutations
pub struct Manager<T: Record> {
    /// Name used for registration and logging
    name: String,

    /// Backing store (owned, never shared)
    store: Box<dyn FileStore>,

    /// Hot set: decoded records with their last access time
    hot: RwLock<HashMap<String, CachedRecord<T>>>,

    /// Runtime-adjustable settings
    config: RwLock<ManagerConfig>,

    /// Start time of the save in flight, if any
    saving: Mutex<Option<Instant>>,

    /// Reference point for access stamps
    epoch: Instant,

    /// Background worker threads alive
    auto_save_running: AtomicBool,
    auto_cleanup_running: AtomicBool,
}

impl<T: Record> Manager<T> {
    /// Create a manager over any store
    pub fn new(name: impl Into<String>, store: impl FileStore + 'static, config: ManagerConfig) -> Self {
        Self {
            name: name.into(),
            store: Box::new(store),
            hot: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            saving: Mutex::new(None),
            epoch: Instant::now(),
            auto_save_running: AtomicBool::new(false),
            auto_cleanup_running: AtomicBool::new(false),
        }
    }

    /// Manager backed by a single segment file
    pub fn segment(name: impl Into<String>, path: impl Into<PathBuf>, config: ManagerConfig) -> Self {
        Self::new(name, SegmentFile::new(path), config)
    }

    /// Manager backed by one file per record
    pub fn folder(name: impl Into<String>, folder: impl Into<PathBuf>, config: ManagerConfig) -> Self {
        Self::new(name, FolderStore::new(folder), config)
    }

    /// Manager whose records never touch disk
    pub fn in_memory(name: impl Into<String>, config: ManagerConfig) -> Self {
        Self::new(name, MemoryStore::new(), config)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a record by key
    ///
    /// Returns:
    /// - `Ok(Some(value))` — hot, or faulted in from the store
    /// - `Ok(None)` — unknown key
    /// - `Err(Decode)` — stored document could not be decoded; the key stays cold
    pub fn get(&self, key: &str) -> Result<Option<T>> {
        // Step 1: Hot path (read lock only)
        if let Some(record) = self.hot.read().get(key) {
            record.touch(self.now());
            return Ok(Some(record.value.clone()));
        }

        // Step 2: Cold path
        self.fault_in(key)
    }

    /// Mutate a record in place, faulting it in first when cold
    ///
    /// Returns `Ok(None)` for an unknown key.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<Option<R>> {
        if !self.is_hot(key) && self.fault_in(key)?.is_none() {
            return Ok(None);
        }

        let now = self.now();
        let mut hot = self.hot.write();
        Ok(hot.get_mut(key).map(|record| {
            record.touch(now);
            f(&mut record.value)
        }))
    }

    /// Load one key into the hot set, failing when the store does not know it
    pub fn load_single(&self, key: &str) -> Result<T> {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        Err(AtlasError::KeyNotFound(key.to_string()))
    }

    /// Decode a cold record into the hot set
    fn fault_in(&self, key: &str) -> Result<Option<T>> {
        let Some(document) = self.store.load(key)? else {
            return Ok(None);
        };

        let value = T::decode(key, &document).map_err(|e| {
            tracing::error!(manager = %self.name, %key, error = %e, document = %document, "Failed to decode record");
            e
        })?;

        let now = self.now();
        let mut hot = self.hot.write();
        // A concurrent remove wins over this fault-in
        if !hot.contains_key(key) && !self.store.contains_key(key) {
            return Ok(None);
        }
        let record = hot
            .entry(key.to_string())
            .or_insert_with(|| CachedRecord::new(value, now));
        record.touch(now);
        Ok(Some(record.value.clone()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.hot.read().contains_key(key) || self.store.contains_key(key)
    }

    /// Hot and stored keys, without duplicates
    pub fn key_set(&self) -> HashSet<String> {
        let mut keys = self.store.key_set();
        keys.extend(self.hot.read().keys().cloned());
        keys
    }

    pub fn size(&self) -> usize {
        self.key_set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hot.read().is_empty() && self.store.size() == 0
    }

    /// Whether a key is currently decoded in memory
    pub fn is_hot(&self, key: &str) -> bool {
        self.hot.read().contains_key(key)
    }

    /// Number of records currently decoded in memory
    pub fn hot_count(&self) -> usize {
        self.hot.read().len()
    }

    /// Time since a hot record was last touched
    pub fn idle_time(&self, key: &str) -> Option<Duration> {
        let now = self.now();
        self.hot
            .read()
            .get(key)
            .map(|r| Duration::from_millis(now.saturating_sub(r.last_access())))
    }

    /// Random id not used by any hot or stored record
    pub fn unique_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.contains_key(&id) {
                return id;
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or overwrite a record; persisted on the next save
    pub fn put(&self, key: impl Into<String>, value: T) -> Option<T> {
        let now = self.now();
        self.hot
            .write()
            .insert(key.into(), CachedRecord::new(value, now))
            .map(|previous| previous.value)
    }

    /// Insert a record under its own key
    pub fn insert(&self, value: T) -> Option<T> {
        let key = value.record_key();
        self.put(key, value)
    }

    /// Forget a key everywhere; removing an unknown key is a no-op
    ///
    /// The hot write lock is held across the store removal, so a save that is
    /// staging records cannot put the key back.
    pub fn remove(&self, key: &str) -> Result<Option<T>> {
        let mut hot = self.hot.write();
        self.store.remove(key)?;
        Ok(hot.remove(key).map(|record| record.value))
    }

    /// Evict one key from memory; it stays fault-inable from the store
    pub fn unload(&self, key: &str) -> bool {
        let evicted = self.hot.write().remove(key).is_some();
        self.store.unload(key);
        evicted
    }

    /// Drop every record and persist the empty state
    pub fn clear(&self) -> Result<()> {
        let _save_guard = self.begin_save()?;
        self.hot.write().clear();
        self.store.clear()?;
        self.store.save_sections()
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Rebuild the store index from disk (no records are decoded)
    pub fn load_storage(&self) -> Result<ScanStats> {
        tracing::debug!(manager = %self.name, "Loading storage");
        self.store.read_file()
    }

    /// Eagerly decode everything, unless idle eviction is enabled
    pub fn initial_load(&self) -> Result<LoadStats> {
        if self.config.read().auto_cleanup {
            tracing::debug!(manager = %self.name, "Auto cleanup enabled, skipping eager load");
            return Ok(LoadStats::default());
        }
        self.load_all()
    }

    /// Decode every stored record that is not hot yet
    ///
    /// Records that fail to load are logged and counted, never fatal.
    pub fn load_all(&self) -> Result<LoadStats> {
        let keys: Vec<String> = {
            let hot = self.hot.read();
            self.store
                .key_set()
                .into_iter()
                .filter(|k| !hot.contains_key(k))
                .collect()
        };
        let threads = self.config.read().loading_threads;

        let results = pool::run(threads, keys, |key| {
            let result = self.fault_in(&key);
            (key, result)
        });

        let mut stats = LoadStats::default();
        for (key, result) in results {
            match result {
                Ok(Some(_)) => stats.loaded += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(manager = %self.name, %key, error = %e, "Skipping record that failed to load");
                    stats.failed += 1;
                }
            }
        }

        tracing::debug!(manager = %self.name, loaded = stats.loaded, failed = stats.failed, "Records loaded");
        Ok(stats)
    }

    /// Re-read the store and reload from disk
    ///
    /// Unsaved changes to records that exist on disk are discarded; records
    /// that only exist in memory are kept.
    pub fn reload(&self) -> Result<LoadStats> {
        self.load_storage()?;
        {
            let mut hot = self.hot.write();
            hot.retain(|key, _| !self.store.contains_key(key));
        }
        self.initial_load()
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Encode every hot record and rewrite the backing store
    ///
    /// Only one save runs at a time; a concurrent call fails immediately with
    /// `ConcurrentSave` and does no I/O.
    pub fn save(&self) -> Result<SaveStats> {
        let _save_guard = self.begin_save()?;
        let started = Instant::now();

        // Step 1: Snapshot the hot set
        let snapshot: Vec<(String, T)> = self
            .hot
            .read()
            .iter()
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect();
        let threads = self.config.read().saving_threads;

        // Step 2: Encode on the saving pool
        let results = pool::run(threads, snapshot, |(key, value)| {
            let result = value
                .encode()
                .and_then(|document| self.store.check_record(&key, &document).map(|()| document));
            (key, result)
        });

        // Step 3: Stage what is still hot; keys removed or evicted since the
        // snapshot are left alone
        let mut stats = SaveStats::default();
        {
            let hot = self.hot.read();
            for (key, result) in results {
                match result {
                    Ok(document) => {
                        if hot.contains_key(&key) {
                            self.store.put(&key, document);
                            stats.records_saved += 1;
                        }
                    }
                    Err(e) => {
                        tracing::error!(manager = %self.name, %key, error = %e, "Failed to encode record, skipping it");
                        stats.records_failed += 1;
                    }
                }
            }
        }

        // Step 4: Rewrite backing files
        self.store.save_sections().map_err(|e| {
            tracing::error!(manager = %self.name, error = %e, "Save failed, previous files kept");
            e
        })?;

        stats.elapsed = started.elapsed();
        tracing::debug!(
            manager = %self.name,
            saved = stats.records_saved,
            failed = stats.records_failed,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Manager saved"
        );
        Ok(stats)
    }

    /// Claim the save slot or report how long the current save has run
    fn begin_save(&self) -> Result<SaveGuard<'_>> {
        let mut saving = self.saving.lock();
        if let Some(started) = *saving {
            return Err(AtlasError::ConcurrentSave {
                manager: self.name.clone(),
                elapsed: started.elapsed(),
            });
        }
        *saving = Some(Instant::now());
        Ok(SaveGuard { slot: &self.saving })
    }

    /// Whether a save is in flight
    pub fn is_saving(&self) -> bool {
        self.saving.lock().is_some()
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// One cleanup pass: save, then evict records idle longer than `cleanup_time`
    ///
    /// Nothing is evicted when the save fails. Returns the number evicted.
    pub fn cleanup(&self) -> Result<usize> {
        // Step 1: Persist dirty state first
        self.save()?;

        // Step 2: Evict idle records
        let threshold = self.config.read().cleanup_time.as_millis() as u64;
        let now = self.now();

        let evicted: Vec<String> = {
            let mut hot = self.hot.write();
            let idle: Vec<String> = hot
                .iter()
                .filter(|(_, record)| now.saturating_sub(record.last_access()) > threshold)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &idle {
                hot.remove(key);
            }
            idle
        };
        for key in &evicted {
            self.store.unload(key);
        }

        if !evicted.is_empty() {
            tracing::debug!(manager = %self.name, evicted = evicted.len(), "Evicted idle records");
        }
        Ok(evicted.len())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current settings
    pub fn config(&self) -> ManagerConfig {
        self.config.read().clone()
    }

    /// Backing store (lookups only; the manager owns all mutations)
    pub fn store(&self) -> &dyn FileStore {
        self.store.as_ref()
    }

    /// Takes effect on the next `start_workers`; disabling stops the worker
    /// after its current pass
    pub fn set_auto_save(&self, enabled: bool) {
        self.config.write().auto_save = enabled;
    }

    pub fn set_auto_save_interval(&self, interval: Duration) {
        self.config.write().auto_save_interval = interval;
    }

    /// Takes effect on the next `start_workers`; disabling stops the worker
    /// after its current pass
    pub fn set_auto_cleanup(&self, enabled: bool) {
        self.config.write().auto_cleanup = enabled;
    }

    pub fn set_cleanup_time(&self, idle: Duration) {
        self.config.write().cleanup_time = idle;
    }

    pub fn set_cleanup_interval(&self, interval: Duration) {
        self.config.write().cleanup_interval = interval;
    }

    pub fn set_loading_threads(&self, count: usize) {
        self.config.write().loading_threads = count.max(1);
    }

    pub fn set_saving_threads(&self, count: usize) {
        self.config.write().saving_threads = count.max(1);
    }

    /// Milliseconds since this manager was created
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Releases the save slot on every exit path, including panics
struct SaveGuard<'a> {
    slot: &'a Mutex<Option<Instant>>,
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

// =============================================================================
// Type-erased Handle
// =============================================================================

/// What the startup sequencer and tools need from a manager of any type
pub trait ManagedStore: Send + Sync {
    fn name(&self) -> &str;

    fn load_storage(&self) -> Result<ScanStats>;

    fn initial_load(&self) -> Result<LoadStats>;

    fn start_workers(self: Arc<Self>);

    fn save(&self) -> Result<SaveStats>;

    fn contains_key(&self, key: &str) -> bool;

    fn key_set(&self) -> HashSet<String>;

    fn size(&self) -> usize;
}

impl<T: Record> ManagedStore for Manager<T> {
    fn name(&self) -> &str {
        Manager::name(self)
    }

    fn load_storage(&self) -> Result<ScanStats> {
        Manager::load_storage(self)
    }

    fn initial_load(&self) -> Result<LoadStats> {
        Manager::initial_load(self)
    }

    fn start_workers(self: Arc<Self>) {
        Manager::start_workers(&self)
    }

    fn save(&self) -> Result<SaveStats> {
        Manager::save(self)
    }

    fn contains_key(&self, key: &str) -> bool {
        Manager::contains_key(self, key)
    }

    fn key_set(&self) -> HashSet<String> {
        Manager::key_set(self)
    }

    fn size(&self) -> usize {
        Manager::size(self)
    }
}

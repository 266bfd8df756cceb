//! # AtlasStore
//!
//! An embedded object store for typed records:
//! - Per-type managers caching decoded records in memory
//! - Lazy fault-in from an index of byte spans on disk
//! - Atomic whole-store rewrites (temp file + rename)
//! - Background auto-save and idle eviction
//! - Priority-ordered startup with a per-step watchdog
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Sequencer                             │
//! │        (registration, ordered startup, type lookups)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ one per record type
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Manager<T>                              │
//! │     (hot set: RwLock + access stamps, save guard, workers)   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Document (serde_json::Value)
//!          ┌────────────┼─────────────────────┐
//!          │            │                     │
//!          ▼            ▼                     ▼
//!   ┌─────────────┐ ┌─────────────┐   ┌─────────────┐
//!   │ SegmentFile │ │ FolderStore │   │ MemoryStore │
//!   │ (one file)  │ │ (per key)   │   │ (volatile)  │
//!   └─────────────┘ └─────────────┘   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod storage;
pub mod manager;
pub mod startup;
pub mod settings;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::{ManagerConfig, SequencerConfig};
pub use record::{Document, Record, RecordIndexEntry};
pub use storage::{FileStore, FolderStore, MemoryStore, ScanStats, SegmentFile};
pub use manager::{LoadStats, ManagedStore, Manager, SaveStats};
pub use startup::{Priority, Sequencer, StartupReport, StepOutcome};
pub use settings::{SettingValue, Settings};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Configuration for AtlasStore
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

/// Per-manager configuration
///
/// Every field can also be changed at runtime through the setters on
/// [`Manager`](crate::manager::Manager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    // -------------------------------------------------------------------------
    // Auto-save Configuration
    // -------------------------------------------------------------------------
    /// Run the background auto-save worker
    pub auto_save: bool,

    /// Period between the start of two auto-saves
    pub auto_save_interval: Duration,

    // -------------------------------------------------------------------------
    // Auto-cleanup Configuration
    // -------------------------------------------------------------------------
    /// Run the background idle-eviction worker
    ///
    /// Also disables eager loading in `initial_load`.
    pub auto_cleanup: bool,

    /// A hot record idle for longer than this is evicted
    pub cleanup_time: Duration,

    /// Period between the start of two cleanup passes
    pub cleanup_interval: Duration,

    // -------------------------------------------------------------------------
    // Worker Pool Configuration
    // -------------------------------------------------------------------------
    /// Threads used to decode records in `load_all`
    pub loading_threads: usize,

    /// Threads used to encode records in `save`
    pub saving_threads: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auto_save: false,
            auto_save_interval: Duration::from_secs(5 * 60),
            auto_cleanup: false,
            cleanup_time: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(5 * 60),
            loading_threads: 1,
            saving_threads: 1,
        }
    }
}

impl ManagerConfig {
    /// Create a new config builder
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }
}

/// Builder for ManagerConfig
#[derive(Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Enable or disable the auto-save worker
    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.config.auto_save = enabled;
        self
    }

    /// Set the auto-save period
    pub fn auto_save_interval(mut self, interval: Duration) -> Self {
        self.config.auto_save_interval = interval;
        self
    }

    /// Enable or disable the idle-eviction worker
    pub fn auto_cleanup(mut self, enabled: bool) -> Self {
        self.config.auto_cleanup = enabled;
        self
    }

    /// Set how long a record may stay idle before eviction
    pub fn cleanup_time(mut self, idle: Duration) -> Self {
        self.config.cleanup_time = idle;
        self
    }

    /// Set the cleanup period
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set the number of loading threads (at least 1)
    pub fn loading_threads(mut self, count: usize) -> Self {
        self.config.loading_threads = count.max(1);
        self
    }

    /// Set the number of saving threads (at least 1)
    pub fn saving_threads(mut self, count: usize) -> Self {
        self.config.saving_threads = count.max(1);
        self
    }

    pub fn build(self) -> ManagerConfig {
        self.config
    }
}

/// Configuration for the startup sequencer
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Watchdog budget for a single startup step
    pub step_timeout: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(15),
        }
    }
}

impl SequencerConfig {
    /// Create a new config builder
    pub fn builder() -> SequencerConfigBuilder {
        SequencerConfigBuilder::default()
    }
}

/// Builder for SequencerConfig
#[derive(Default)]
pub struct SequencerConfigBuilder {
    config: SequencerConfig,
}

impl SequencerConfigBuilder {
    /// Set the per-step watchdog budget
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = timeout;
        self
    }

    pub fn build(self) -> SequencerConfig {
        self.config
    }
}

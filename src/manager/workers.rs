//! Background Workers
//!
//! Periodic auto-save and idle-eviction loops for a shared manager.
//!
//! ## Lifecycle
//! - Each loop runs a pass, then sleeps out the rest of its period
//! - A worker only holds a `Weak` reference; dropping the last `Arc` to the
//!   manager ends the loop after its current sleep
//! - Turning the feature off at runtime ends the loop before its next pass
//! - Periods are measured start-to-start; an overrunning pass is followed
//!   immediately by the next one

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::record::Record;

use super::Manager;

/// Which periodic job a worker runs
#[derive(Debug, Clone, Copy)]
enum Job {
    AutoSave,
    AutoCleanup,
}

impl Job {
    fn label(self) -> &'static str {
        match self {
            Job::AutoSave => "autosave",
            Job::AutoCleanup => "cleanup",
        }
    }

    fn running_flag<T: Record>(self, manager: &Manager<T>) -> &AtomicBool {
        match self {
            Job::AutoSave => &manager.auto_save_running,
            Job::AutoCleanup => &manager.auto_cleanup_running,
        }
    }

    /// Whether the job is enabled and its current period
    fn schedule<T: Record>(self, manager: &Manager<T>) -> (bool, Duration) {
        let config = manager.config.read();
        match self {
            Job::AutoSave => (config.auto_save, config.auto_save_interval),
            Job::AutoCleanup => (config.auto_cleanup, config.cleanup_interval),
        }
    }

    fn run_once<T: Record>(self, manager: &Manager<T>) {
        match self {
            Job::AutoSave => {
                if let Err(e) = manager.save() {
                    tracing::warn!(manager = %manager.name, error = %e, "Auto-save failed");
                }
            }
            Job::AutoCleanup => {
                if let Err(e) = manager.cleanup() {
                    tracing::warn!(manager = %manager.name, error = %e, "Cleanup pass failed, nothing evicted");
                }
            }
        }
    }
}

impl<T: Record> Manager<T> {
    /// Start the background workers enabled in the current config
    ///
    /// Calling this again while a worker is alive does not start a second one.
    pub fn start_workers(self: &Arc<Self>) {
        for job in [Job::AutoSave, Job::AutoCleanup] {
            let (enabled, _) = job.schedule(self);
            if enabled {
                spawn_worker(self, job);
            }
        }
    }

    /// Whether the auto-save worker thread is alive
    pub fn auto_save_running(&self) -> bool {
        self.auto_save_running.load(Ordering::SeqCst)
    }

    /// Whether the idle-eviction worker thread is alive
    pub fn auto_cleanup_running(&self) -> bool {
        self.auto_cleanup_running.load(Ordering::SeqCst)
    }
}

fn spawn_worker<T: Record>(manager: &Arc<Manager<T>>, job: Job) {
    if job.running_flag(manager).swap(true, Ordering::SeqCst) {
        return;
    }

    let weak = Arc::downgrade(manager);
    let name = format!("{}-{}", manager.name, job.label());

    let spawned = thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(weak, job));

    match spawned {
        Ok(_) => tracing::debug!(worker = %name, "Background worker started"),
        Err(e) => {
            tracing::error!(worker = %name, error = %e, "Failed to spawn background worker");
            job.running_flag(manager).store(false, Ordering::SeqCst);
        }
    }
}

fn worker_loop<T: Record>(weak: Weak<Manager<T>>, job: Job) {
    // First pass runs right away
    let mut delay = Duration::ZERO;

    loop {
        thread::sleep(delay);

        let Some(manager) = weak.upgrade() else {
            return;
        };

        let (enabled, period) = job.schedule(&manager);
        if !enabled {
            job.running_flag(&manager).store(false, Ordering::SeqCst);
            tracing::debug!(manager = %manager.name, job = job.label(), "Background worker stopped");
            return;
        }

        let started = Instant::now();
        job.run_once(&manager);
        let elapsed = started.elapsed();

        delay = match period.checked_sub(elapsed) {
            Some(remaining) => remaining,
            None => {
                tracing::warn!(
                    manager = %manager.name,
                    job = job.label(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    period_ms = period.as_millis() as u64,
                    "Pass took longer than its period"
                );
                Duration::ZERO
            }
        };
    }
}

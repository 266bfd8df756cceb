//! Startup Module
//!
//! Brings registered managers and ad-hoc steps up in priority order.
//!
//! ## Responsibilities
//! - Keep the registry of managers (by name and by record type)
//! - Run startup steps one at a time, each under a watchdog
//! - Type-safe object lookups across all registered managers
//!
//! ## Startup Flow
//! ```text
//! register_manager / register_step
//!            │
//!            ▼
//! stable sort by Priority (Early → Settings → Manager → Late)
//!            │
//!            ▼
//! for each step:  spawn "startup-<name>" ──► recv_timeout(step_timeout)
//!                       │                        │
//!                       │ Ok / Err / panic       │ timeout
//!                       ▼                        ▼
//!                 record outcome          log, leave detached
//!                       └──────────┬─────────────┘
//!                                  ▼
//!                             next step
//! ```
//! A failing or slow step never stops the remaining steps, and nothing is
//! rolled back.

mod step;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::channel::{self, RecvTimeoutError};

use crate::config::SequencerConfig;
use crate::error::{AtlasError, Result};
use crate::manager::{ManagedStore, Manager, SaveStats};
use crate::record::Record;

pub use step::{Priority, StartupReport, StartupStep, StepAction, StepOutcome, StepReport};

/// Registry of managers plus the ordered startup queue
pub struct Sequencer {
    config: SequencerConfig,

    /// Steps not yet run
    steps: Vec<StartupStep>,

    /// Managers by name, in registration order
    managers: Vec<Arc<dyn ManagedStore>>,
    by_name: HashMap<String, usize>,

    /// `Arc<Manager<T>>` keyed by `TypeId::of::<T>()`
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(SequencerConfig::default())
    }
}

impl Sequencer {
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            steps: Vec::new(),
            managers: Vec::new(),
            by_name: HashMap::new(),
            by_type: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a manager and queue its startup step
    ///
    /// The step loads the store index, runs `initial_load` and starts the
    /// background workers. Each name and each record type may be registered
    /// only once.
    pub fn register_manager<T: Record>(&mut self, manager: Arc<Manager<T>>, priority: Priority) -> Result<()> {
        let name = manager.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(AtlasError::Config(format!("manager '{}' is already registered", name)));
        }
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Err(AtlasError::Config(format!(
                "a manager for {} is already registered",
                std::any::type_name::<T>()
            )));
        }

        self.by_name.insert(name.clone(), self.managers.len());
        self.managers.push(Arc::clone(&manager) as Arc<dyn ManagedStore>);
        self.by_type.insert(type_id, Arc::clone(&manager) as Arc<dyn Any + Send + Sync>);

        self.steps.push(StartupStep::new(name, priority, move || {
            let scan = manager.load_storage()?;
            let loaded = manager.initial_load()?;
            Manager::start_workers(&manager);
            tracing::info!(
                manager = %manager.name(),
                indexed = scan.entries_indexed,
                skipped = scan.entries_skipped,
                loaded = loaded.loaded,
                failed = loaded.failed,
                "Manager loaded"
            );
            Ok(())
        }));
        Ok(())
    }

    /// Queue an arbitrary startup step
    pub fn register_step(
        &mut self,
        name: impl Into<String>,
        priority: Priority,
        action: impl FnOnce() -> Result<()> + Send + 'static,
    ) {
        self.steps.push(StartupStep::new(name, priority, action));
    }

    /// Steps waiting for `startup`
    pub fn pending(&self) -> usize {
        self.steps.len()
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Run every queued step in priority order
    ///
    /// Steps are consumed; calling this again only runs steps registered
    /// since the previous call.
    pub fn startup(&mut self) -> StartupReport {
        let started = Instant::now();

        // Step 1: Stable sort keeps registration order within a priority
        let mut steps = std::mem::take(&mut self.steps);
        steps.sort_by_key(|s| s.priority);

        tracing::info!(steps = steps.len(), "Starting up");

        // Step 2: One step at a time, each bounded by the watchdog
        let mut report = StartupReport::default();
        for step in steps {
            let outcome = self.run_step(&step.name, step.action);
            report.steps.push(StepReport {
                name: step.name,
                priority: step.priority,
                outcome,
            });
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            completed = report.completed(),
            failed = report.failed(),
            timed_out = report.timed_out(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Startup finished"
        );
        report
    }

    fn run_step(&self, name: &str, action: StepAction) -> StepOutcome {
        let timeout = self.config.step_timeout;
        let started = Instant::now();
        let (tx, rx) = channel::bounded(1);

        tracing::debug!(step = %name, "Running startup step");

        let spawned = thread::Builder::new()
            .name(format!("startup-{}", name))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(action));
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            let err = AtlasError::StartupStep {
                step: name.to_string(),
                reason: format!("could not spawn thread: {}", e),
            };
            tracing::error!(error = %err, "Startup step skipped");
            return StepOutcome::Failed(err.to_string());
        }

        let failure = match rx.recv_timeout(timeout) {
            Ok(Ok(Ok(()))) => {
                let elapsed = started.elapsed();
                tracing::debug!(step = %name, elapsed_ms = elapsed.as_millis() as u64, "Startup step completed");
                return StepOutcome::Completed(elapsed);
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(payload)) => format!("panicked: {}", panic_message(&*payload)),
            Err(RecvTimeoutError::Timeout) => {
                let err = AtlasError::StartupTimeout {
                    step: name.to_string(),
                    timeout,
                };
                tracing::error!(error = %err, "Startup step timed out, continuing without it");
                return StepOutcome::TimedOut;
            }
            Err(RecvTimeoutError::Disconnected) => "step thread exited without reporting".to_string(),
        };

        let err = AtlasError::StartupStep {
            step: name.to_string(),
            reason: failure,
        };
        tracing::error!(error = %err, "Startup step failed, continuing");
        StepOutcome::Failed(err.to_string())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Manager for a record type
    pub fn manager<T: Record>(&self) -> Option<Arc<Manager<T>>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<Manager<T>>().ok())
    }

    /// Type-erased manager by name
    pub fn manager_by_name(&self, name: &str) -> Option<Arc<dyn ManagedStore>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.managers[i]))
    }

    /// Every registered manager, in registration order
    pub fn managers(&self) -> Vec<Arc<dyn ManagedStore>> {
        self.managers.clone()
    }

    /// Get a record from the manager for its type
    pub fn get_object<T: Record>(&self, key: &str) -> Result<Option<T>> {
        self.require::<T>()?.get(key)
    }

    /// Put a record under its own key into the manager for its type
    pub fn put_object<T: Record>(&self, value: T) -> Result<Option<T>> {
        Ok(self.require::<T>()?.insert(value))
    }

    /// Remove a record from the manager for its type
    pub fn remove_object<T: Record>(&self, key: &str) -> Result<Option<T>> {
        self.require::<T>()?.remove(key)
    }

    /// Save every manager; one failure does not stop the others
    pub fn save_all(&self) -> Vec<(String, Result<SaveStats>)> {
        self.managers
            .iter()
            .map(|manager| {
                let result = manager.save();
                if let Err(e) = &result {
                    tracing::error!(manager = %manager.name(), error = %e, "Save failed");
                }
                (manager.name().to_string(), result)
            })
            .collect()
    }

    fn require<T: Record>(&self) -> Result<Arc<Manager<T>>> {
        self.manager::<T>().ok_or_else(|| {
            AtlasError::Config(format!(
                "no manager registered for {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

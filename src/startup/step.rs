//! Startup steps and their outcomes.

use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Coarse startup phase; lower phases run first
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Before anything else (environment checks, directories)
    Early,
    /// Settings stores, so managers can read them
    Settings,
    /// Ordinary managers
    #[default]
    Manager,
    /// After every manager is loaded
    Late,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Early => "early",
            Priority::Settings => "settings",
            Priority::Manager => "manager",
            Priority::Late => "late",
        };
        f.write_str(label)
    }
}

/// Work run once by the sequencer on its own thread
pub type StepAction = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A named unit of startup work
pub struct StartupStep {
    pub name: String,
    pub priority: Priority,
    pub(crate) action: StepAction,
}

impl StartupStep {
    pub fn new(
        name: impl Into<String>,
        priority: Priority,
        action: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            action: Box::new(action),
        }
    }
}

impl fmt::Debug for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupStep")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// How a step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Finished within its budget
    Completed(Duration),
    /// Returned an error or panicked
    Failed(String),
    /// Still running when the watchdog fired; left detached
    TimedOut,
}

/// One line of a startup report
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub priority: Priority,
    pub outcome: StepOutcome,
}

/// Everything `startup` did, in execution order
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub steps: Vec<StepReport>,
    pub elapsed: Duration,
}

impl StartupReport {
    /// Step names in the order they ran
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Completed(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::Failed(_)))
    }

    pub fn timed_out(&self) -> usize {
        self.count(|o| matches!(o, StepOutcome::TimedOut))
    }

    /// Whether every step completed
    pub fn is_clean(&self) -> bool {
        self.completed() == self.steps.len()
    }

    /// Outcome of a step by name
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.outcome)
    }

    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.outcome)).count()
    }
}

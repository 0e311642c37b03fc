use chrono::{DateTime, Utc};
use course_core::model::{ModuleId, Progress};
use course_core::schedule::{WeekLockInfo, WeekSchedule};

use crate::error::SessionError;

/// Whether a learner may open a module right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleAccess {
    Granted,
    /// The previous module is not completed yet.
    Locked { requires: ModuleId },
    /// Completion allows it but the calendar does not.
    TimeLocked(WeekLockInfo),
}

impl ModuleAccess {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, ModuleAccess::Granted)
    }

    /// Convert a denial into the matching session error.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ModuleLocked` or `SessionError::TimeLocked`.
    pub fn into_result(self, module: ModuleId) -> Result<(), SessionError> {
        match self {
            ModuleAccess::Granted => Ok(()),
            ModuleAccess::Locked { requires } => {
                Err(SessionError::ModuleLocked { module, requires })
            }
            ModuleAccess::TimeLocked(info) => Err(SessionError::TimeLocked(Box::new(info))),
        }
    }
}

/// Module 1 is always open; module `n` needs module `n - 1` completed and its unlock date reached.
///
/// The completion gate is reported before the calendar gate.
#[must_use]
pub fn module_access(
    progress: &Progress,
    schedule: &WeekSchedule,
    module: ModuleId,
    now: DateTime<Utc>,
) -> ModuleAccess {
    let Some(previous) = module.previous() else {
        return ModuleAccess::Granted;
    };
    if !progress.is_module_completed(previous) {
        return ModuleAccess::Locked { requires: previous };
    }
    if schedule.is_time_locked(module, now) {
        return ModuleAccess::TimeLocked(schedule.lock_info(module, now));
    }
    ModuleAccess::Granted
}

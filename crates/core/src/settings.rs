use std::time::Duration;

use thiserror::Error;

use crate::model::NavigationConfig;
use crate::schedule::WeekSchedule;

/// Modules in the course when the catalog does not say otherwise.
pub const DEFAULT_TOTAL_MODULES: u32 = 6;

/// Delay during which a step transition swallows further navigation requests.
pub const DEFAULT_TRANSITION_DEBOUNCE: Duration = Duration::from_millis(300);

/// Longest a new session waits for the first remote load before continuing
/// from local defaults.
pub const DEFAULT_INITIAL_LOAD_TIMEOUT: Duration = Duration::from_secs(3);

/// Consecutive failures of one queued write before the status reports it as stuck.
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CourseSettings {
    navigation: NavigationConfig,
    transition_debounce: Duration,
    initial_load_timeout: Duration,
    total_modules: u32,
    max_write_attempts: u32,
    schedule: WeekSchedule,
}

#[derive(Clone, Debug, Default)]
pub struct CourseSettingsDraft {
    pub navigation: Option<NavigationConfig>,
    pub transition_debounce: Option<Duration>,
    pub initial_load_timeout: Option<Duration>,
    pub total_modules: Option<u32>,
    pub max_write_attempts: Option<u32>,
    pub schedule: Option<WeekSchedule>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("a course needs at least one module")]
    NoModules,
    #[error("max write attempts must be at least 1")]
    NoWriteAttempts,
}

impl CourseSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill unset values with defaults and validate.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the module count or write attempt limit is zero.
    pub fn validate(self) -> Result<CourseSettings, SettingsError> {
        let total_modules = self.total_modules.unwrap_or(DEFAULT_TOTAL_MODULES);
        if total_modules == 0 {
            return Err(SettingsError::NoModules);
        }
        let max_write_attempts = self
            .max_write_attempts
            .unwrap_or(DEFAULT_MAX_WRITE_ATTEMPTS);
        if max_write_attempts == 0 {
            return Err(SettingsError::NoWriteAttempts);
        }

        Ok(CourseSettings {
            navigation: self.navigation.unwrap_or_default(),
            transition_debounce: self
                .transition_debounce
                .unwrap_or(DEFAULT_TRANSITION_DEBOUNCE),
            initial_load_timeout: self
                .initial_load_timeout
                .unwrap_or(DEFAULT_INITIAL_LOAD_TIMEOUT),
            total_modules,
            max_write_attempts,
            schedule: self.schedule.unwrap_or_default(),
        })
    }
}

impl CourseSettings {
    #[must_use]
    pub fn navigation(&self) -> NavigationConfig {
        self.navigation
    }

    #[must_use]
    pub fn transition_debounce(&self) -> Duration {
        self.transition_debounce
    }

    #[must_use]
    pub fn initial_load_timeout(&self) -> Duration {
        self.initial_load_timeout
    }

    /// Denominator of the overall progress percentage.
    #[must_use]
    pub fn total_modules(&self) -> u32 {
        self.total_modules
    }

    #[must_use]
    pub fn max_write_attempts(&self) -> u32 {
        self.max_write_attempts
    }

    #[must_use]
    pub fn schedule(&self) -> &WeekSchedule {
        &self.schedule
    }
}

impl Default for CourseSettings {
    fn default() -> Self {
        Self {
            navigation: NavigationConfig::default(),
            transition_debounce: DEFAULT_TRANSITION_DEBOUNCE,
            initial_load_timeout: DEFAULT_INITIAL_LOAD_TIMEOUT,
            total_modules: DEFAULT_TOTAL_MODULES,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            schedule: WeekSchedule::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_draft_matches_defaults() {
        let settings = CourseSettingsDraft::new().validate().unwrap();
        assert_eq!(settings, CourseSettings::default());
        assert_eq!(settings.transition_debounce(), Duration::from_millis(300));
        assert_eq!(settings.initial_load_timeout(), Duration::from_secs(3));
        assert!(settings.navigation().require_quiz_completion);
    }

    #[test]
    fn rejects_zero_modules() {
        let draft = CourseSettingsDraft {
            total_modules: Some(0),
            ..CourseSettingsDraft::default()
        };
        assert_eq!(draft.validate().unwrap_err(), SettingsError::NoModules);
    }

    #[test]
    fn keeps_overrides() {
        let draft = CourseSettingsDraft {
            navigation: Some(NavigationConfig {
                allow_back_navigation: false,
                ..NavigationConfig::default()
            }),
            total_modules: Some(4),
            ..CourseSettingsDraft::default()
        };
        let settings = draft.validate().unwrap();
        assert!(!settings.navigation().allow_back_navigation);
        assert_eq!(settings.total_modules(), 4);
    }
}

//! Calendar-based module unlocking.
//!
//! Every module opens a fixed number of days after the course launch. This
//! gate is independent of completion: access needs both.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ModuleId;

/// Launch of the first module: 2025-01-01T00:00:00Z.
pub const DEFAULT_LAUNCH_TIMESTAMP: i64 = 1_735_689_600;

/// Days after launch at which modules 1..=6 open.
pub const DEFAULT_OFFSETS: [(u32, u32); 6] = [(1, 0), (2, 6), (3, 13), (4, 20), (5, 27), (6, 34)];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    #[error("module 1 must unlock at launch, got an offset of {0} days")]
    FirstModuleOffset(u32),
    #[error("invalid launch date: {0}")]
    InvalidLaunchDate(String),
}

/// Remaining time until an unlock, floor-divided into whole units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRemaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub total_ms: i64,
}

impl TimeRemaining {
    /// Time from `now` until `target`, all zero once `target` has passed.
    #[must_use]
    pub fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let total_ms = (target - now).num_milliseconds();
        if total_ms <= 0 {
            return Self::default();
        }

        const MINUTE: i64 = 60 * 1000;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;

        Self {
            days: total_ms / DAY,
            hours: (total_ms % DAY) / HOUR,
            minutes: (total_ms % HOUR) / MINUTE,
            seconds: (total_ms % MINUTE) / 1000,
            total_ms,
        }
    }

    /// Whether nothing remains.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.total_ms == 0
    }
}

/// Derived lock status of one module at one instant. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekLockInfo {
    pub week_id: ModuleId,
    pub is_locked: bool,
    pub unlock_date: DateTime<Utc>,
    pub days_remaining: i64,
    pub hours_remaining: i64,
    pub minutes_remaining: i64,
    pub countdown_text: String,
}

/// Launch date plus per-module day offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekSchedule {
    launch: DateTime<Utc>,
    offsets: BTreeMap<ModuleId, u32>,
}

impl Default for WeekSchedule {
    fn default() -> Self {
        let launch = Utc
            .timestamp_opt(DEFAULT_LAUNCH_TIMESTAMP, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            launch,
            offsets: DEFAULT_OFFSETS
                .iter()
                .map(|(module, days)| (ModuleId::new(*module), *days))
                .collect(),
        }
    }
}

impl WeekSchedule {
    /// # Errors
    ///
    /// Returns `ScheduleError::FirstModuleOffset` when module 1 does not open at launch.
    pub fn new(
        launch: DateTime<Utc>,
        offsets: impl IntoIterator<Item = (ModuleId, u32)>,
    ) -> Result<Self, ScheduleError> {
        let offsets: BTreeMap<_, _> = offsets.into_iter().collect();
        if let Some(days) = offsets.get(&ModuleId::FIRST).copied().filter(|days| *days != 0) {
            return Err(ScheduleError::FirstModuleOffset(days));
        }
        Ok(Self { launch, offsets })
    }

    /// The default offsets shifted to another launch date.
    #[must_use]
    pub fn with_launch(launch: DateTime<Utc>) -> Self {
        Self {
            launch,
            ..Self::default()
        }
    }

    /// Parses an RFC 3339 launch date such as `2025-01-01T00:00:00Z`.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidLaunchDate` if the value does not parse.
    pub fn parse_launch(value: &str) -> Result<DateTime<Utc>, ScheduleError> {
        DateTime::parse_from_rfc3339(value.trim())
            .map(|date| date.with_timezone(&Utc))
            .map_err(|err| ScheduleError::InvalidLaunchDate(format!("{value}: {err}")))
    }

    #[must_use]
    pub fn launch(&self) -> DateTime<Utc> {
        self.launch
    }

    /// Scheduled modules in ascending order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.offsets.keys().copied()
    }

    /// Days after launch. Modules missing from the table open at launch.
    #[must_use]
    pub fn offset_days(&self, module: ModuleId) -> u32 {
        self.offsets.get(&module).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn unlock_date(&self, module: ModuleId) -> DateTime<Utc> {
        self.launch + Duration::days(i64::from(self.offset_days(module)))
    }

    /// `false` for module 1 always, otherwise `now < unlock_date`.
    #[must_use]
    pub fn is_time_locked(&self, module: ModuleId, now: DateTime<Utc>) -> bool {
        if module == ModuleId::FIRST {
            return false;
        }
        now < self.unlock_date(module)
    }

    #[must_use]
    pub fn time_remaining(&self, module: ModuleId, now: DateTime<Utc>) -> TimeRemaining {
        TimeRemaining::until(self.unlock_date(module), now)
    }

    #[must_use]
    pub fn lock_info(&self, module: ModuleId, now: DateTime<Utc>) -> WeekLockInfo {
        let unlock_date = self.unlock_date(module);
        let remaining = TimeRemaining::until(unlock_date, now);
        let is_locked = self.is_time_locked(module, now);
        let countdown_text = if is_locked {
            format_countdown(remaining.days, remaining.hours, remaining.minutes)
        } else {
            "Unlocked".to_string()
        };

        WeekLockInfo {
            week_id: module,
            is_locked,
            unlock_date,
            days_remaining: remaining.days,
            hours_remaining: remaining.hours,
            minutes_remaining: remaining.minutes,
            countdown_text,
        }
    }

    /// Lock info for every scheduled module.
    #[must_use]
    pub fn all_lock_info(&self, now: DateTime<Utc>) -> Vec<WeekLockInfo> {
        self.modules()
            .map(|module| self.lock_info(module, now))
            .collect()
    }
}

/// Coarsest nonzero unit first: days, then hours and minutes, then minutes.
#[must_use]
pub fn format_countdown(days: i64, hours: i64, minutes: i64) -> String {
    match (days, hours) {
        (1, _) => "Unlocks in 1 day".to_string(),
        (d, _) if d > 0 => format!("Unlocks in {d} days"),
        (_, h) if h > 0 => format!("Unlocks in {h}h {minutes}m"),
        _ => format!("Unlocks in {minutes} minutes"),
    }
}

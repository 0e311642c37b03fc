use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ModuleId, ModuleProgressData, StepId, StepState, StepStatePatch};
use crate::step_state;

/// Where the learner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub module: ModuleId,
    pub step: StepId,
}

/// All learning progress for one user.
///
/// Created with defaults on the first authenticated session and persisted
/// remotely under the user's id. Mutating methods keep the derived caches of
/// every touched module consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    completed_modules: BTreeSet<ModuleId>,
    #[serde(default = "first_module")]
    current_module: ModuleId,
    #[serde(default = "first_step")]
    current_step: StepId,
    #[serde(default)]
    module_progress: BTreeMap<ModuleId, ModuleProgressData>,
    #[serde(default)]
    last_active_session: Option<i64>,
}

fn first_module() -> ModuleId {
    ModuleId::FIRST
}

fn first_step() -> StepId {
    StepId::FIRST
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            completed_modules: BTreeSet::new(),
            current_module: ModuleId::FIRST,
            current_step: StepId::FIRST,
            module_progress: BTreeMap::new(),
            last_active_session: None,
        }
    }
}

impl Progress {
    /// Fresh progress for a first session.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_active_session: Some(now.timestamp_millis()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completed_modules(&self) -> &BTreeSet<ModuleId> {
        &self.completed_modules
    }

    #[must_use]
    pub fn current_module(&self) -> ModuleId {
        self.current_module
    }

    #[must_use]
    pub fn current_step(&self) -> StepId {
        self.current_step
    }

    #[must_use]
    pub fn position(&self) -> Position {
        Position {
            module: self.current_module,
            step: self.current_step,
        }
    }

    #[must_use]
    pub fn module_progress(&self) -> &BTreeMap<ModuleId, ModuleProgressData> {
        &self.module_progress
    }

    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&ModuleProgressData> {
        self.module_progress.get(&id)
    }

    #[must_use]
    pub fn step(&self, module: ModuleId, step: StepId) -> Option<&StepState> {
        self.module(module).and_then(|data| data.step(step))
    }

    #[must_use]
    pub fn last_active_session(&self) -> Option<i64> {
        self.last_active_session
    }

    #[must_use]
    pub fn is_module_completed(&self, module: ModuleId) -> bool {
        self.completed_modules.contains(&module)
    }

    /// True when the learner has started anything at all.
    #[must_use]
    pub fn has_in_progress(&self) -> bool {
        self.current_step > StepId::FIRST || !self.module_progress.is_empty()
    }

    /// Share of `total_modules` that are completed, rounded to a whole percent.
    #[must_use]
    pub fn overall_progress(&self, total_modules: u32) -> u8 {
        let completed = u32::try_from(self.completed_modules.len()).unwrap_or(u32::MAX);
        step_state::percent(completed, total_modules)
    }

    /// Merge `patch` into the state of `step`, creating missing structures on the way.
    ///
    /// Returns the merged step state.
    pub fn apply_step_patch(
        &mut self,
        module: ModuleId,
        step: StepId,
        patch: &StepStatePatch,
        now: DateTime<Utc>,
    ) -> &StepState {
        let current = self.module(module);
        let merged = step_state::update_step_state(
            current.and_then(|data| data.step(step)),
            step,
            patch,
            now,
        );
        let updated = step_state::update_module_progress(current, step, merged, now);
        self.last_active_session = Some(now.timestamp_millis());
        self.module_progress.insert(module, updated);
        &self.module_progress[&module].step_states[&step]
    }

    /// Add `module` to the completed set. Returns `false` if it already was.
    pub fn complete_module(&mut self, module: ModuleId, now: DateTime<Utc>) -> bool {
        let at = now.timestamp_millis();
        self.last_active_session = Some(at);
        let data = self
            .module_progress
            .entry(module)
            .or_insert_with(|| ModuleProgressData::started(at));
        if data.completed_at.is_none() {
            data.completed_at = Some(at);
        }
        self.completed_modules.insert(module)
    }

    /// Move the learner's bookmark.
    pub fn set_position(&mut self, position: Position, now: DateTime<Utc>) {
        self.current_module = position.module;
        self.current_step = position.step;
        self.last_active_session = Some(now.timestamp_millis());
    }

    /// Rebuild every derived cache after loading a remote document.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.module_progress = std::mem::take(&mut self.module_progress)
            .into_iter()
            .map(|(id, data)| (id, data.normalized()))
            .collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn new_progress_has_defaults() {
        let progress = Progress::new(fixed_now());
        assert!(progress.completed_modules().is_empty());
        assert_eq!(progress.position().module, ModuleId::FIRST);
        assert_eq!(progress.position().step, StepId::FIRST);
        assert!(progress.module_progress().is_empty());
        assert!(!progress.has_in_progress());
    }

    #[test]
    fn apply_step_patch_creates_module_on_first_access() {
        let mut progress = Progress::new(fixed_now());
        let state = progress.apply_step_patch(
            ModuleId::new(1),
            StepId::new(2),
            &StepStatePatch::new().video_watched(true),
            fixed_now(),
        );
        assert!(state.video_watched());

        let module = progress.module(ModuleId::new(1)).unwrap();
        assert_eq!(module.current_step(), StepId::new(2));
        assert!(module.completed_steps().contains(&StepId::new(2)));
        assert!(progress.has_in_progress());
    }

    #[test]
    fn complete_module_is_idempotent() {
        let mut progress = Progress::new(fixed_now());
        assert!(progress.complete_module(ModuleId::new(1), fixed_now()));
        assert!(!progress.complete_module(ModuleId::new(1), fixed_now()));
        assert_eq!(progress.overall_progress(6), 17);
    }

    #[test]
    fn overall_progress_handles_zero_total() {
        let progress = Progress::new(fixed_now());
        assert_eq!(progress.overall_progress(0), 0);
    }

    #[test]
    fn normalized_document_from_field_writes() {
        let json = r#"{
            "moduleProgress": {
                "2": { "stepStates": { "1": { "quizAnswer": { "selectedAnswer": 1, "isCorrect": true, "timestamp": 0, "attempts": 1 } } } }
            }
        }"#;
        let progress: Progress = serde_json::from_str(json).unwrap();
        let progress = progress.normalized();
        let module = progress.module(ModuleId::new(2)).unwrap();
        assert!(module.completed_steps().contains(&StepId::FIRST));
        assert_eq!(progress.current_module(), ModuleId::FIRST);
    }
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{StepId, StepState};
use crate::step_state;

/// Progress for one module.
///
/// `completed_steps` and `total_time_spent` are caches derived from
/// `step_states`; they are rebuilt on every update and on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgressData {
    #[serde(default)]
    pub(crate) completed_steps: BTreeSet<StepId>,
    #[serde(default)]
    pub(crate) step_states: BTreeMap<StepId, StepState>,
    #[serde(default = "first_step")]
    pub(crate) current_step: StepId,
    #[serde(default)]
    pub(crate) started_at: Option<i64>,
    #[serde(default)]
    pub(crate) completed_at: Option<i64>,
    #[serde(default)]
    pub(crate) total_time_spent: Option<u64>,
}

fn first_step() -> StepId {
    StepId::FIRST
}

impl ModuleProgressData {
    /// Empty progress for a module first opened at `started_at` (ms epoch).
    #[must_use]
    pub fn started(started_at: i64) -> Self {
        Self {
            completed_steps: BTreeSet::new(),
            step_states: BTreeMap::new(),
            current_step: StepId::FIRST,
            started_at: Some(started_at),
            completed_at: None,
            total_time_spent: None,
        }
    }

    /// Sorted step numbers whose state satisfies the completion predicate.
    #[must_use]
    pub fn completed_steps(&self) -> &BTreeSet<StepId> {
        &self.completed_steps
    }

    #[must_use]
    pub fn step_states(&self) -> &BTreeMap<StepId, StepState> {
        &self.step_states
    }

    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&StepState> {
        self.step_states.get(&id)
    }

    /// Furthest step reached in this module.
    #[must_use]
    pub fn current_step(&self) -> StepId {
        self.current_step
    }

    #[must_use]
    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    /// Set once, when the first step became complete.
    #[must_use]
    pub fn completed_at(&self) -> Option<i64> {
        self.completed_at
    }

    #[must_use]
    pub fn total_time_spent(&self) -> u64 {
        self.total_time_spent.unwrap_or(0)
    }

    /// Rebuild derived caches after loading a document that was written field by field.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for (id, state) in &mut self.step_states {
            state.id = *id;
        }
        step_state::refresh_derived(&mut self);
        self
    }
}

//! Local progress mutations and the remote writes that mirror them.

use chrono::{DateTime, Utc};
use course_core::model::{ModuleId, Position, Progress, StepId, StepStatePatch};
use serde_json::Value;
use storage::repository::{FieldPath, FieldWrite};
use uuid::Uuid;

/// One named change to a learner's progress.
///
/// Carries its own timestamp so replaying it over a newer remote snapshot
/// produces the same result as the original application.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LocalMutation {
    StepPatch {
        module: ModuleId,
        step: StepId,
        patch: StepStatePatch,
        at: DateTime<Utc>,
    },
    CompleteModule {
        module: ModuleId,
        at: DateTime<Utc>,
    },
    Position {
        position: Position,
        at: DateTime<Utc>,
    },
}

impl LocalMutation {
    pub(crate) fn apply(&self, progress: &mut Progress) {
        match self {
            LocalMutation::StepPatch {
                module,
                step,
                patch,
                at,
            } => {
                progress.apply_step_patch(*module, *step, patch, *at);
            }
            LocalMutation::CompleteModule { module, at } => {
                progress.complete_module(*module, *at);
            }
            LocalMutation::Position { position, at } => {
                progress.set_position(*position, *at);
            }
        }
    }

    /// Field writes that reproduce this mutation remotely.
    ///
    /// `after` is the local view with the mutation applied; derived module
    /// fields are copied from it. Set members are added with a union and the
    /// module's furthest step with a max, so a batch queued against an old
    /// view never drops what other sessions stored meanwhile. Sending the
    /// batch twice is harmless.
    pub(crate) fn field_writes(&self, after: &Progress) -> Vec<FieldWrite> {
        let mut writes = Vec::new();
        match self {
            LocalMutation::StepPatch {
                module,
                step,
                patch,
                at,
            } => {
                writes.push(FieldWrite::new(
                    FieldPath::step(*module, *step, "id"),
                    step.value(),
                ));
                for (field, value) in patch.field_values() {
                    writes.push(FieldWrite::new(FieldPath::step(*module, *step, field), value));
                }
                writes.push(FieldWrite::new(
                    FieldPath::step(*module, *step, "lastAccessed"),
                    at.timestamp_millis(),
                ));
                module_summary_writes(after, *module, &mut writes);
            }
            LocalMutation::CompleteModule { module, .. } => {
                writes.push(FieldWrite::array_union(
                    FieldPath::root("completedModules"),
                    vec![Value::from(module.value())],
                ));
                module_summary_writes(after, *module, &mut writes);
            }
            LocalMutation::Position { position, .. } => {
                writes.push(FieldWrite::new(
                    FieldPath::root("currentModule"),
                    position.module.value(),
                ));
                writes.push(FieldWrite::new(
                    FieldPath::root("currentStep"),
                    position.step.value(),
                ));
            }
        }

        if let Some(active) = after.last_active_session() {
            writes.push(FieldWrite::new(
                FieldPath::root("lastActiveSession"),
                active,
            ));
        }
        writes
    }
}

fn module_summary_writes(after: &Progress, module: ModuleId, writes: &mut Vec<FieldWrite>) {
    let Some(data) = after.module(module) else {
        return;
    };

    let completed: Vec<Value> = data
        .completed_steps()
        .iter()
        .map(|id| Value::from(id.value()))
        .collect();
    writes.push(FieldWrite::new(
        FieldPath::module(module, "completedSteps"),
        Value::Array(completed),
    ));
    writes.push(FieldWrite::max(
        FieldPath::module(module, "currentStep"),
        data.current_step().value(),
    ));
    writes.push(FieldWrite::new(
        FieldPath::module(module, "totalTimeSpent"),
        data.total_time_spent(),
    ));
    if let Some(started) = data.started_at() {
        writes.push(FieldWrite::new(
            FieldPath::module(module, "startedAt"),
            started,
        ));
    }
    if let Some(completed_at) = data.completed_at() {
        writes.push(FieldWrite::new(
            FieldPath::module(module, "completedAt"),
            completed_at,
        ));
    }
}

/// A mutation waiting to be written remotely.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub(crate) id: Uuid,
    pub(crate) mutation: LocalMutation,
    pub(crate) writes: Vec<FieldWrite>,
    pub(crate) attempts: u32,
}

impl PendingWrite {
    pub(crate) fn new(mutation: LocalMutation, after: &Progress) -> Self {
        let writes = mutation.field_writes(after);
        Self {
            id: Uuid::new_v4(),
            mutation,
            writes,
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_now;
    use storage::repository::FieldOp;

    fn paths(writes: &[FieldWrite]) -> Vec<String> {
        writes.iter().map(|write| write.path.to_string()).collect()
    }

    #[test]
    fn step_patch_writes_only_touched_fields_and_summary() {
        let mutation = LocalMutation::StepPatch {
            module: ModuleId::new(1),
            step: StepId::new(2),
            patch: StepStatePatch::new().video_watched(true),
            at: fixed_now(),
        };
        let mut progress = Progress::new(fixed_now());
        mutation.apply(&mut progress);

        let writes = mutation.field_writes(&progress);
        assert_eq!(
            paths(&writes),
            vec![
                "moduleProgress.1.stepStates.2.id",
                "moduleProgress.1.stepStates.2.videoWatched",
                "moduleProgress.1.stepStates.2.lastAccessed",
                "moduleProgress.1.completedSteps",
                "moduleProgress.1.currentStep",
                "moduleProgress.1.totalTimeSpent",
                "moduleProgress.1.startedAt",
                "moduleProgress.1.completedAt",
                "lastActiveSession",
            ]
        );
        assert_eq!(writes[3].value, serde_json::json!([2]));
    }

    #[test]
    fn cleared_quiz_answer_becomes_a_null_write() {
        let mutation = LocalMutation::StepPatch {
            module: ModuleId::new(1),
            step: StepId::new(1),
            patch: StepStatePatch::new().clear_quiz_answer().completed(false),
            at: fixed_now(),
        };
        let mut progress = Progress::new(fixed_now());
        mutation.apply(&mut progress);

        let writes = mutation.field_writes(&progress);
        let quiz = writes
            .iter()
            .find(|write| write.path.to_string().ends_with("quizAnswer"))
            .unwrap();
        assert!(quiz.value.is_null());
    }

    #[test]
    fn module_completion_adds_only_its_own_id() {
        let mut progress = Progress::new(fixed_now());
        progress.complete_module(ModuleId::new(2), fixed_now());
        let mutation = LocalMutation::CompleteModule {
            module: ModuleId::new(1),
            at: fixed_now(),
        };
        mutation.apply(&mut progress);

        let writes = mutation.field_writes(&progress);
        assert_eq!(writes[0].path.to_string(), "completedModules");
        assert_eq!(writes[0].op, FieldOp::ArrayUnion);
        assert_eq!(writes[0].value, serde_json::json!([1]));
        let current = writes
            .iter()
            .find(|write| write.path.to_string() == "moduleProgress.1.currentStep")
            .unwrap();
        assert_eq!(current.op, FieldOp::Max);
    }

    #[test]
    fn position_writes_top_level_fields() {
        let mutation = LocalMutation::Position {
            position: Position {
                module: ModuleId::new(2),
                step: StepId::new(3),
            },
            at: fixed_now(),
        };
        let mut progress = Progress::new(fixed_now());
        mutation.apply(&mut progress);
        assert_eq!(
            paths(&mutation.field_writes(&progress)),
            vec!["currentModule", "currentStep", "lastActiveSession"]
        );
        assert_eq!(progress.current_step(), StepId::new(3));
    }
}

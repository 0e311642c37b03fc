//! Pure derivations over step and module progress.
//!
//! Nothing here performs I/O or reads the system clock; callers pass `now`.

use chrono::{DateTime, Utc};

use crate::model::{
    ModuleProgressData, QuizAnswer, QuizAnswerUpdate, StepId, StepState, StepStatePatch,
};

/// Where a learner should resume inside a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextIncompleteStep {
    /// No progress recorded for the module yet; start at step 1.
    NotStarted,
    /// First step, in order, that is not complete.
    Step(StepId),
    /// Every step is complete.
    AllComplete,
}

impl NextIncompleteStep {
    /// The step to open, if any remains.
    #[must_use]
    pub fn step(self) -> Option<StepId> {
        match self {
            NextIncompleteStep::NotStarted => Some(StepId::FIRST),
            NextIncompleteStep::Step(step) => Some(step),
            NextIncompleteStep::AllComplete => None,
        }
    }
}

/// A fresh state for `step_id`, touched at `now`.
#[must_use]
pub fn create_step_state(step_id: StepId, now: DateTime<Utc>) -> StepState {
    StepState {
        id: step_id,
        completed: false,
        video_watched: Some(false),
        pdf_downloaded: Some(false),
        quiz_answer: None,
        last_accessed: Some(now.timestamp_millis()),
        time_spent: Some(0),
    }
}

/// Shallow-merge `patch` onto `current` (or a fresh state), stamping `lastAccessed`.
#[must_use]
pub fn update_step_state(
    current: Option<&StepState>,
    step_id: StepId,
    patch: &StepStatePatch,
    now: DateTime<Utc>,
) -> StepState {
    let mut state = current
        .cloned()
        .unwrap_or_else(|| create_step_state(step_id, now));
    state.id = step_id;

    if let Some(completed) = patch.completed {
        state.completed = completed;
    }
    if let Some(watched) = patch.video_watched {
        state.video_watched = Some(watched);
    }
    if let Some(downloaded) = patch.pdf_downloaded {
        state.pdf_downloaded = Some(downloaded);
    }
    match &patch.quiz_answer {
        Some(QuizAnswerUpdate::Set(answer)) => state.quiz_answer = Some(answer.clone()),
        Some(QuizAnswerUpdate::Clear) => state.quiz_answer = None,
        None => {}
    }
    if let Some(seconds) = patch.time_spent {
        state.time_spent = Some(seconds);
    }
    state.last_accessed = Some(now.timestamp_millis());
    state
}

/// Completion predicate.
///
/// With `require_quiz`, an incorrect answer makes the step incomplete no
/// matter which other flags are set. Otherwise the stored flag, a correct
/// answer, or consumed content completes it.
#[must_use]
pub fn is_step_complete(state: Option<&StepState>, require_quiz: bool) -> bool {
    let Some(state) = state else {
        return false;
    };

    if require_quiz {
        if let Some(answer) = state.quiz_answer() {
            if !answer.is_correct() {
                return false;
            }
        }
    }

    if state.completed() {
        return true;
    }

    if require_quiz {
        if let Some(answer) = state.quiz_answer() {
            return answer.is_correct();
        }
    }

    state.content_consumed()
}

/// True once the learner did anything gradable on the step, successful or not.
#[must_use]
pub fn is_step_attempted(state: Option<&StepState>) -> bool {
    let Some(state) = state else {
        return false;
    };
    state.completed() || state.quiz_answer().is_some() || state.content_consumed()
}

/// Whole-percent share of `total_steps` that are complete.
#[must_use]
pub fn calculate_module_progress(module: Option<&ModuleProgressData>, total_steps: u32) -> u8 {
    let Some(module) = module else {
        return 0;
    };
    if total_steps == 0 {
        return 0;
    }

    let completed = module
        .step_states()
        .iter()
        .filter(|(id, state)| id.value() <= total_steps && is_step_complete(Some(state), true))
        .count();
    percent(u32::try_from(completed).unwrap_or(u32::MAX), total_steps)
}

/// First step in `1..=total_steps` that is not complete.
#[must_use]
pub fn next_incomplete_step(
    module: Option<&ModuleProgressData>,
    total_steps: u32,
) -> NextIncompleteStep {
    let Some(module) = module else {
        return NextIncompleteStep::NotStarted;
    };

    (1..=total_steps)
        .map(StepId::new)
        .find(|id| !is_step_complete(module.step(*id), true))
        .map_or(NextIncompleteStep::AllComplete, NextIncompleteStep::Step)
}

/// Forward-navigation gate: step 1 is always reachable, step `n` once step `n - 1` was attempted.
#[must_use]
pub fn can_navigate_to_step(module: Option<&ModuleProgressData>, target: StepId) -> bool {
    match target.previous() {
        None => target == StepId::FIRST,
        Some(previous) => is_step_attempted(module.and_then(|data| data.step(previous))),
    }
}

#[must_use]
pub fn create_quiz_answer(
    selected_answer: Option<u32>,
    is_correct: bool,
    attempts: u32,
    now: DateTime<Utc>,
) -> QuizAnswer {
    QuizAnswer::new(selected_answer, is_correct, attempts, now)
}

/// Store `new_state` for `step_id` and rebuild the module's derived fields.
///
/// `current_step` only moves forward and `completed_at` is set the first time
/// any step is complete.
#[must_use]
pub fn update_module_progress(
    module: Option<&ModuleProgressData>,
    step_id: StepId,
    new_state: StepState,
    now: DateTime<Utc>,
) -> ModuleProgressData {
    let at = now.timestamp_millis();
    let mut data = module
        .cloned()
        .unwrap_or_else(|| ModuleProgressData::started(at));
    data.started_at.get_or_insert(at);

    let mut state = new_state;
    state.id = step_id;
    data.step_states.insert(step_id, state);
    data.current_step = data.current_step.max(step_id);

    refresh_derived(&mut data);
    if data.completed_at.is_none() && !data.completed_steps.is_empty() {
        data.completed_at = Some(at);
    }
    data
}

/// The part of an imported step state that adds to `current`.
///
/// Flags only turn on, a quiz answer is taken only where none is stored and
/// time spent only grows. An empty patch means nothing new.
#[must_use]
pub fn import_patch(imported: &StepState, current: Option<&StepState>) -> StepStatePatch {
    let mut patch = StepStatePatch::new();
    if imported.completed() && !current.is_some_and(StepState::completed) {
        patch.completed = Some(true);
    }
    if imported.video_watched() && !current.is_some_and(StepState::video_watched) {
        patch.video_watched = Some(true);
    }
    if imported.pdf_downloaded() && !current.is_some_and(StepState::pdf_downloaded) {
        patch.pdf_downloaded = Some(true);
    }
    if current.and_then(StepState::quiz_answer).is_none() {
        if let Some(answer) = imported.quiz_answer() {
            patch.quiz_answer = Some(QuizAnswerUpdate::Set(answer.clone()));
        }
    }
    if imported.time_spent() > current.map_or(0, StepState::time_spent) {
        patch.time_spent = Some(imported.time_spent());
    }
    patch
}

pub(crate) fn refresh_derived(data: &mut ModuleProgressData) {
    data.completed_steps = data
        .step_states
        .iter()
        .filter(|(_, state)| is_step_complete(Some(state), true))
        .map(|(id, _)| *id)
        .collect();
    data.total_time_spent = Some(data.step_states.values().map(StepState::time_spent).sum());
}

/// `count / total` as a whole percent, rounding halves up. Zero when `total` is zero.
pub(crate) fn percent(count: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let count = u64::from(count.min(total));
    let total = u64::from(total);
    u8::try_from((200 * count + total) / (2 * total)).unwrap_or(100)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn step(id: u32) -> StepId {
        StepId::new(id)
    }

    fn apply(
        module: Option<&ModuleProgressData>,
        id: u32,
        patch: StepStatePatch,
    ) -> ModuleProgressData {
        let current = module.and_then(|data| data.step(step(id)));
        let merged = update_step_state(current, step(id), &patch, fixed_now());
        update_module_progress(module, step(id), merged, fixed_now())
    }

    fn wrong_answer() -> QuizAnswer {
        create_quiz_answer(Some(0), false, 1, fixed_now())
    }

    fn right_answer() -> QuizAnswer {
        create_quiz_answer(Some(2), true, 1, fixed_now())
    }

    #[test]
    fn create_step_state_has_defaults() {
        let state = create_step_state(step(3), fixed_now());
        assert_eq!(state.id(), step(3));
        assert!(!state.completed());
        assert!(!state.video_watched());
        assert!(!state.pdf_downloaded());
        assert_eq!(state.time_spent(), 0);
        assert_eq!(state.last_accessed(), Some(fixed_now().timestamp_millis()));
    }

    #[test]
    fn update_step_state_merges_and_restamps() {
        let earlier = fixed_now() - Duration::minutes(5);
        let original = update_step_state(
            None,
            step(1),
            &StepStatePatch::new().video_watched(true),
            earlier,
        );
        let updated = update_step_state(
            Some(&original),
            step(1),
            &StepStatePatch::new().time_spent(42),
            fixed_now(),
        );

        assert!(updated.video_watched());
        assert_eq!(updated.time_spent(), 42);
        assert_eq!(updated.last_accessed(), Some(fixed_now().timestamp_millis()));
        // input untouched
        assert_eq!(original.time_spent(), 0);
        assert_eq!(original.last_accessed(), Some(earlier.timestamp_millis()));
    }

    #[test]
    fn incorrect_quiz_answer_is_never_complete() {
        let state = update_step_state(
            None,
            step(1),
            &StepStatePatch::new()
                .quiz_answer(wrong_answer())
                .completed(true)
                .video_watched(true)
                .pdf_downloaded(true),
            fixed_now(),
        );
        assert!(!is_step_complete(Some(&state), true));
        assert!(is_step_attempted(Some(&state)));
        // without the quiz requirement the explicit flag wins
        assert!(is_step_complete(Some(&state), false));
    }

    #[test]
    fn completion_sources() {
        let quiz = update_step_state(
            None,
            step(1),
            &StepStatePatch::new().quiz_answer(right_answer()),
            fixed_now(),
        );
        assert!(is_step_complete(Some(&quiz), true));

        let video = update_step_state(
            None,
            step(1),
            &StepStatePatch::new().video_watched(true),
            fixed_now(),
        );
        assert!(is_step_complete(Some(&video), true));

        let explicit = update_step_state(
            None,
            step(1),
            &StepStatePatch::new().completed(true),
            fixed_now(),
        );
        assert!(is_step_complete(Some(&explicit), true));

        let touched = update_step_state(None, step(1), &StepStatePatch::new(), fixed_now());
        assert!(!is_step_complete(Some(&touched), true));
        assert!(!is_step_attempted(Some(&touched)));
        assert!(!is_step_complete(None, true));
    }

    #[test]
    fn completed_steps_match_recomputation_after_any_sequence() {
        let patches = vec![
            (2, StepStatePatch::new().video_watched(true)),
            (1, StepStatePatch::new().quiz_answer(wrong_answer())),
            (3, StepStatePatch::new().completed(true)),
            (1, StepStatePatch::new().quiz_answer(right_answer()).completed(true)),
            (2, StepStatePatch::new().video_watched(false)),
            (4, StepStatePatch::new().pdf_downloaded(true)),
            (3, StepStatePatch::new().quiz_answer(wrong_answer()).completed(false)),
        ];

        let mut module: Option<ModuleProgressData> = None;
        for (id, patch) in patches {
            let next = apply(module.as_ref(), id, patch);
            let expected: Vec<StepId> = next
                .step_states()
                .iter()
                .filter(|(_, state)| is_step_complete(Some(state), true))
                .map(|(id, _)| *id)
                .collect();
            let actual: Vec<StepId> = next.completed_steps().iter().copied().collect();
            assert_eq!(actual, expected);
            module = Some(next);
        }

        let module = module.unwrap();
        let completed: Vec<u32> = module.completed_steps().iter().map(StepId::value).collect();
        assert_eq!(completed, vec![1, 4]);
    }

    #[test]
    fn repeated_patch_is_idempotent() {
        let patch = StepStatePatch::new().video_watched(true);
        let once = apply(None, 1, patch.clone());
        let twice = apply(Some(&once), 1, patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn current_step_only_moves_forward() {
        let module = apply(None, 3, StepStatePatch::new());
        let module = apply(Some(&module), 1, StepStatePatch::new().completed(true));
        assert_eq!(module.current_step(), step(3));
    }

    #[test]
    fn completed_at_is_set_once() {
        let start = fixed_now();
        let module = update_module_progress(
            None,
            step(1),
            create_step_state(step(1), start),
            start,
        );
        assert_eq!(module.completed_at(), None);
        assert_eq!(module.started_at(), Some(start.timestamp_millis()));

        let first = start + Duration::minutes(1);
        let done = update_step_state(
            module.step(step(1)),
            step(1),
            &StepStatePatch::new().completed(true),
            first,
        );
        let module = update_module_progress(Some(&module), step(1), done, first);
        assert_eq!(module.completed_at(), Some(first.timestamp_millis()));

        let later = start + Duration::minutes(2);
        let undone = update_step_state(
            module.step(step(1)),
            step(1),
            &StepStatePatch::new().completed(false),
            later,
        );
        let module = update_module_progress(Some(&module), step(1), undone, later);
        assert!(module.completed_steps().is_empty());
        assert_eq!(module.completed_at(), Some(first.timestamp_millis()));
    }

    #[test]
    fn module_progress_rounds_and_handles_missing_data() {
        assert_eq!(calculate_module_progress(None, 4), 0);
        let module = apply(None, 1, StepStatePatch::new().completed(true));
        assert_eq!(calculate_module_progress(Some(&module), 0), 0);
        assert_eq!(calculate_module_progress(Some(&module), 4), 25);
        assert_eq!(calculate_module_progress(Some(&module), 3), 33);
        let module = apply(Some(&module), 2, StepStatePatch::new().completed(true));
        assert_eq!(calculate_module_progress(Some(&module), 3), 67);
    }

    #[test]
    fn module_progress_ignores_steps_beyond_total() {
        let module = apply(None, 9, StepStatePatch::new().completed(true));
        assert_eq!(calculate_module_progress(Some(&module), 4), 0);
    }

    #[test]
    fn next_incomplete_step_distinguishes_not_started_from_finished() {
        assert_eq!(next_incomplete_step(None, 4), NextIncompleteStep::NotStarted);
        assert_eq!(NextIncompleteStep::NotStarted.step(), Some(StepId::FIRST));

        let mut module = apply(None, 1, StepStatePatch::new().completed(true));
        assert_eq!(
            next_incomplete_step(Some(&module), 2),
            NextIncompleteStep::Step(step(2))
        );

        module = apply(Some(&module), 2, StepStatePatch::new().pdf_downloaded(true));
        let next = next_incomplete_step(Some(&module), 2);
        assert_eq!(next, NextIncompleteStep::AllComplete);
        assert_eq!(next.step(), None);
    }

    #[test]
    fn navigation_requires_previous_step_attempted() {
        assert!(can_navigate_to_step(None, StepId::FIRST));
        assert!(!can_navigate_to_step(None, step(2)));
        assert!(!can_navigate_to_step(None, StepId::new(0)));

        let module = apply(None, 1, StepStatePatch::new().quiz_answer(wrong_answer()));
        assert!(can_navigate_to_step(Some(&module), step(2)));
        assert!(!can_navigate_to_step(Some(&module), step(3)));
    }

    #[test]
    fn navigability_covers_every_step_up_to_attempted_one() {
        let mut module: Option<ModuleProgressData> = None;
        for k in 1..=5 {
            let next = apply(module.as_ref(), k, StepStatePatch::new().video_watched(true));
            for n in 1..=k {
                assert!(can_navigate_to_step(Some(&next), step(n)), "k={k} n={n}");
            }
            assert!(can_navigate_to_step(Some(&next), step(k + 1)));
            assert!(!can_navigate_to_step(Some(&next), step(k + 2)));
            module = Some(next);
        }
    }

    #[test]
    fn import_patch_only_adds_information() {
        let imported = apply(
            None,
            1,
            StepStatePatch::new()
                .quiz_answer(wrong_answer())
                .video_watched(true)
                .time_spent(30),
        );
        let imported = imported.step(step(1)).unwrap();

        let patch = import_patch(imported, None);
        assert_eq!(patch.video_watched, Some(true));
        assert_eq!(patch.quiz_answer, Some(QuizAnswerUpdate::Set(wrong_answer())));
        assert_eq!(patch.time_spent, Some(30));
        assert_eq!(patch.completed, None);

        let stored = apply(
            None,
            1,
            StepStatePatch::new()
                .quiz_answer(right_answer())
                .completed(true)
                .time_spent(60),
        );
        let patch = import_patch(imported, stored.step(step(1)));
        assert_eq!(patch, StepStatePatch::new().video_watched(true));
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 4), 100);
        assert_eq!(percent(0, 0), 0);
    }
}

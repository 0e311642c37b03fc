use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{QuizAnswer, StepId};

//
// ─── STEP STATE ────────────────────────────────────────────────────────────────
//

/// Progress for one step of one module.
///
/// Values are produced by `step_state` functions only; `completed` is never
/// assigned by callers directly. Every field tolerates being absent in a
/// persisted document because remote writes land field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    #[serde(default = "first_step")]
    pub(crate) id: StepId,
    #[serde(default)]
    pub(crate) completed: bool,
    #[serde(default)]
    pub(crate) video_watched: Option<bool>,
    #[serde(default)]
    pub(crate) pdf_downloaded: Option<bool>,
    #[serde(default)]
    pub(crate) quiz_answer: Option<QuizAnswer>,
    #[serde(default)]
    pub(crate) last_accessed: Option<i64>,
    #[serde(default)]
    pub(crate) time_spent: Option<u64>,
}

fn first_step() -> StepId {
    StepId::FIRST
}

impl StepState {
    #[must_use]
    pub fn id(&self) -> StepId {
        self.id
    }

    /// The stored completion flag (explicit completion or correct quiz).
    ///
    /// Use `step_state::is_step_complete` for the derived predicate.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn video_watched(&self) -> bool {
        self.video_watched.unwrap_or(false)
    }

    #[must_use]
    pub fn pdf_downloaded(&self) -> bool {
        self.pdf_downloaded.unwrap_or(false)
    }

    #[must_use]
    pub fn quiz_answer(&self) -> Option<&QuizAnswer> {
        self.quiz_answer.as_ref()
    }

    /// Milliseconds since the Unix epoch of the last touch, if any.
    #[must_use]
    pub fn last_accessed(&self) -> Option<i64> {
        self.last_accessed
    }

    /// Seconds spent on the step.
    #[must_use]
    pub fn time_spent(&self) -> u64 {
        self.time_spent.unwrap_or(0)
    }

    /// True when some content of the step has been consumed.
    #[must_use]
    pub fn content_consumed(&self) -> bool {
        self.video_watched() || self.pdf_downloaded()
    }
}

//
// ─── PARTIAL UPDATES ───────────────────────────────────────────────────────────
//

/// Replacement of the quiz answer carried by a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizAnswerUpdate {
    Set(QuizAnswer),
    Clear,
}

/// A partial `StepState`: only the `Some` fields are merged.
///
/// `lastAccessed` is not part of the patch; merging always stamps it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepStatePatch {
    pub completed: Option<bool>,
    pub video_watched: Option<bool>,
    pub pdf_downloaded: Option<bool>,
    pub quiz_answer: Option<QuizAnswerUpdate>,
    pub time_spent: Option<u64>,
}

impl StepStatePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    #[must_use]
    pub fn video_watched(mut self, watched: bool) -> Self {
        self.video_watched = Some(watched);
        self
    }

    #[must_use]
    pub fn pdf_downloaded(mut self, downloaded: bool) -> Self {
        self.pdf_downloaded = Some(downloaded);
        self
    }

    #[must_use]
    pub fn quiz_answer(mut self, answer: QuizAnswer) -> Self {
        self.quiz_answer = Some(QuizAnswerUpdate::Set(answer));
        self
    }

    #[must_use]
    pub fn clear_quiz_answer(mut self) -> Self {
        self.quiz_answer = Some(QuizAnswerUpdate::Clear);
        self
    }

    #[must_use]
    pub fn time_spent(mut self, seconds: u64) -> Self {
        self.time_spent = Some(seconds);
        self
    }

    /// True when the patch only touches `lastAccessed`.
    #[must_use]
    pub fn is_touch_only(&self) -> bool {
        self == &Self::default()
    }

    /// Persisted field names and values carried by this patch, in declaration order.
    ///
    /// A cleared quiz answer is reported as `null`.
    #[must_use]
    pub fn field_values(&self) -> Vec<(&'static str, Value)> {
        let mut fields = Vec::new();
        if let Some(completed) = self.completed {
            fields.push(("completed", Value::Bool(completed)));
        }
        if let Some(watched) = self.video_watched {
            fields.push(("videoWatched", Value::Bool(watched)));
        }
        if let Some(downloaded) = self.pdf_downloaded {
            fields.push(("pdfDownloaded", Value::Bool(downloaded)));
        }
        if let Some(update) = &self.quiz_answer {
            let value = match update {
                QuizAnswerUpdate::Set(answer) => {
                    serde_json::to_value(answer).unwrap_or(Value::Null)
                }
                QuizAnswerUpdate::Clear => Value::Null,
            };
            fields.push(("quizAnswer", value));
        }
        if let Some(seconds) = self.time_spent {
            fields.push(("timeSpent", Value::from(seconds)));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn partial_document_deserializes_with_defaults() {
        let state: StepState = serde_json::from_str(r#"{"videoWatched": true}"#).unwrap();
        assert_eq!(state.id(), StepId::FIRST);
        assert!(!state.completed());
        assert!(state.video_watched());
        assert!(!state.pdf_downloaded());
        assert!(state.quiz_answer().is_none());
        assert_eq!(state.time_spent(), 0);
    }

    #[test]
    fn empty_patch_is_touch_only() {
        assert!(StepStatePatch::new().is_touch_only());
        assert!(!StepStatePatch::new().video_watched(true).is_touch_only());
    }

    #[test]
    fn field_values_follow_persisted_names() {
        let answer = QuizAnswer::new(Some(2), true, 1, fixed_now());
        let patch = StepStatePatch::new()
            .completed(true)
            .quiz_answer(answer)
            .time_spent(30);

        let fields = patch.field_values();
        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["completed", "quizAnswer", "timeSpent"]);
        assert_eq!(fields[1].1["selectedAnswer"], 2);
    }

    #[test]
    fn cleared_quiz_answer_is_null() {
        let fields = StepStatePatch::new().clear_quiz_answer().field_values();
        assert_eq!(fields, vec![("quizAnswer", Value::Null)]);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A learner's recorded answer to a step quiz.
///
/// Answers are never edited in place: a retry or reset replaces the whole
/// value on the owning `StepState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    selected_answer: Option<u32>,
    is_correct: bool,
    timestamp: i64,
    attempts: u32,
}

impl QuizAnswer {
    /// Record an answer given at `answered_at`. `attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        selected_answer: Option<u32>,
        is_correct: bool,
        attempts: u32,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            selected_answer,
            is_correct,
            timestamp: answered_at.timestamp_millis(),
            attempts: attempts.max(1),
        }
    }

    /// Placeholder left by a retry: the next attempt is pending and counts as unanswered.
    #[must_use]
    pub fn awaiting_retry(previous: &QuizAnswer, at: DateTime<Utc>) -> Self {
        Self::new(None, false, previous.attempts.saturating_add(1), at)
    }

    #[must_use]
    pub fn selected_answer(&self) -> Option<u32> {
        self.selected_answer
    }

    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once a choice has been made for the current attempt.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.selected_answer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn attempts_never_drop_below_one() {
        let answer = QuizAnswer::new(Some(1), false, 0, fixed_now());
        assert_eq!(answer.attempts(), 1);
    }

    #[test]
    fn retry_placeholder_bumps_attempts_and_is_unanswered() {
        let first = QuizAnswer::new(Some(0), false, 1, fixed_now());
        let retry = QuizAnswer::awaiting_retry(&first, fixed_now());
        assert_eq!(retry.attempts(), 2);
        assert!(!retry.is_answered());
        assert!(!retry.is_correct());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let answer = QuizAnswer::new(Some(2), true, 1, fixed_now());
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["selectedAnswer"], 2);
        assert_eq!(json["isCorrect"], true);
        assert_eq!(json["attempts"], 1);
        assert_eq!(json["timestamp"], fixed_now().timestamp_millis());
    }
}

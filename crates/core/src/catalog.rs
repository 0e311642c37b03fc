//! Static course content: modules, their steps and step quizzes.
//!
//! Read-only. Supplies step counts to progress derivations and grades quiz
//! answers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ModuleId, StepId};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("module {0} appears more than once")]
    DuplicateModule(ModuleId),
    #[error("module {module} declares {declared} steps but lists {actual}")]
    StepCountMismatch {
        module: ModuleId,
        declared: u32,
        actual: usize,
    },
    #[error("module {module} step {step}: {reason}")]
    InvalidQuiz {
        module: ModuleId,
        step: StepId,
        reason: &'static str,
    },
}

//
// ─── CONTENT TYPES ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
    modules: Vec<ModuleInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_learning: Vec<String>,
    pub total_steps: u32,
    #[serde(default)]
    pub steps: Vec<StepInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub id: StepId,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub quiz: Option<Quiz>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizKind {
    Multiple,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuizOption {
    Text(String),
    Detailed {
        text: String,
        #[serde(default)]
        explanation: Option<String>,
    },
}

impl QuizOption {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            QuizOption::Text(text) | QuizOption::Detailed { text, .. } => text,
        }
    }
}

/// The expected answer: an option index for `multiple`, a truth value for `boolean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectAnswer {
    Index(u32),
    Flag(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub question: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(rename = "type")]
    pub kind: QuizKind,
    #[serde(default)]
    pub options: Vec<QuizOption>,
    pub correct: CorrectAnswer,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub correct_explanation: Option<String>,
    #[serde(default)]
    pub incorrect_explanation: Option<String>,
}

impl Quiz {
    /// Whether choosing option `selected` is correct.
    ///
    /// Boolean quizzes present "true" as option 0 and "false" as option 1.
    #[must_use]
    pub fn grade(&self, selected: u32) -> bool {
        match (self.kind, self.correct) {
            (QuizKind::Multiple, CorrectAnswer::Index(correct)) => selected == correct,
            (QuizKind::Boolean, CorrectAnswer::Flag(correct)) => (selected == 0) == correct,
            _ => false,
        }
    }

    /// Explanation shown after grading.
    #[must_use]
    pub fn feedback(&self, is_correct: bool) -> Option<&str> {
        let specific = if is_correct {
            self.correct_explanation.as_deref()
        } else {
            self.incorrect_explanation.as_deref()
        };
        specific.or(self.explanation.as_deref())
    }

    fn check(&self) -> Result<(), &'static str> {
        match (self.kind, self.correct) {
            (QuizKind::Multiple, CorrectAnswer::Index(index)) => {
                if (index as usize) < self.options.len() {
                    Ok(())
                } else {
                    Err("correct answer index is out of range")
                }
            }
            (QuizKind::Boolean, CorrectAnswer::Flag(_)) => Ok(()),
            (QuizKind::Multiple, CorrectAnswer::Flag(_)) => {
                Err("multiple-choice quiz needs an option index")
            }
            (QuizKind::Boolean, CorrectAnswer::Index(_)) => {
                Err("true/false quiz needs a boolean answer")
            }
        }
    }
}

//
// ─── LOOKUPS ───────────────────────────────────────────────────────────────────
//

impl Catalog {
    /// Parses and validates a `{ "modules": [...] }` document.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` when the JSON is malformed, a module repeats,
    /// a listed step count disagrees with `totalSteps`, or a quiz answer key
    /// does not fit its quiz type.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        catalog.validate()
    }

    /// # Errors
    ///
    /// See [`Catalog::from_json`].
    pub fn from_modules(modules: Vec<ModuleInfo>) -> Result<Self, CatalogError> {
        Catalog { modules }.validate()
    }

    fn validate(mut self) -> Result<Self, CatalogError> {
        self.modules.sort_by_key(|module| module.id);
        for pair in self.modules.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(CatalogError::DuplicateModule(pair[0].id));
            }
        }

        for module in &self.modules {
            if !module.steps.is_empty() && module.steps.len() != module.total_steps as usize {
                return Err(CatalogError::StepCountMismatch {
                    module: module.id,
                    declared: module.total_steps,
                    actual: module.steps.len(),
                });
            }
            for step in &module.steps {
                if let Some(quiz) = &step.quiz {
                    quiz.check().map_err(|reason| CatalogError::InvalidQuiz {
                        module: module.id,
                        step: step.id,
                        reason,
                    })?;
                }
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.iter().find(|module| module.id == id)
    }

    /// Number of steps in `module`; zero for unknown modules.
    #[must_use]
    pub fn step_count(&self, module: ModuleId) -> u32 {
        self.module(module).map_or(0, |info| info.total_steps)
    }

    #[must_use]
    pub fn step(&self, module: ModuleId, step: StepId) -> Option<&StepInfo> {
        self.module(module)
            .and_then(|info| info.steps.iter().find(|candidate| candidate.id == step))
    }

    #[must_use]
    pub fn quiz(&self, module: ModuleId, step: StepId) -> Option<&Quiz> {
        self.step(module, step).and_then(|info| info.quiz.as_ref())
    }

    #[must_use]
    pub fn step_has_quiz(&self, module: ModuleId, step: StepId) -> bool {
        self.quiz(module, step).is_some()
    }

    #[must_use]
    pub fn total_modules(&self) -> u32 {
        u32::try_from(self.modules.len()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "modules": [
            {
                "id": 2,
                "title": "Prompting",
                "totalSteps": 1,
                "steps": [
                    { "id": 1, "title": "Intro", "quiz": {
                        "question": "Is context useful?", "type": "boolean", "correct": true
                    } }
                ]
            },
            {
                "id": 1,
                "title": "Foundations",
                "description": "What models are",
                "keyLearning": ["tokens"],
                "totalSteps": 2,
                "steps": [
                    { "id": 1, "title": "Welcome", "quiz": {
                        "question": "Pick one", "type": "multiple",
                        "options": ["a", { "text": "b", "explanation": "because" }, "c"],
                        "correct": 2,
                        "correctExplanation": "Right",
                        "explanation": "General"
                    } },
                    { "id": 2, "title": "Video" }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_and_sorts_modules() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let ids: Vec<u32> = catalog.modules().iter().map(|m| m.id.value()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(catalog.step_count(ModuleId::new(1)), 2);
        assert_eq!(catalog.step_count(ModuleId::new(9)), 0);
        assert_eq!(catalog.total_modules(), 2);
        assert!(catalog.step_has_quiz(ModuleId::new(1), StepId::new(1)));
        assert!(!catalog.step_has_quiz(ModuleId::new(1), StepId::new(2)));
    }

    #[test]
    fn grades_multiple_choice_by_index() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let quiz = catalog.quiz(ModuleId::new(1), StepId::FIRST).unwrap();
        assert!(quiz.grade(2));
        assert!(!quiz.grade(0));
        assert_eq!(quiz.options[1].text(), "b");
        assert_eq!(quiz.feedback(true), Some("Right"));
        assert_eq!(quiz.feedback(false), Some("General"));
    }

    #[test]
    fn grades_boolean_with_first_option_as_true() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let quiz = catalog.quiz(ModuleId::new(2), StepId::FIRST).unwrap();
        assert!(quiz.grade(0));
        assert!(!quiz.grade(1));
    }

    #[test]
    fn rejects_step_count_mismatch() {
        let json = r#"{ "modules": [ { "id": 1, "title": "x", "totalSteps": 3, "steps": [ { "id": 1, "title": "a" } ] } ] }"#;
        let err = Catalog::from_json(json).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::StepCountMismatch { declared: 3, actual: 1, .. }
        ));
    }

    #[test]
    fn rejects_out_of_range_answer_key() {
        let json = r#"{ "modules": [ { "id": 1, "title": "x", "totalSteps": 1, "steps": [
            { "id": 1, "title": "a", "quiz": { "question": "q", "type": "multiple", "options": ["a"], "correct": 4 } }
        ] } ] }"#;
        assert!(matches!(
            Catalog::from_json(json).unwrap_err(),
            CatalogError::InvalidQuiz { .. }
        ));
    }

    #[test]
    fn rejects_duplicate_modules() {
        let json = r#"{ "modules": [
            { "id": 1, "title": "x", "totalSteps": 0 },
            { "id": 1, "title": "y", "totalSteps": 0 }
        ] }"#;
        assert!(matches!(
            Catalog::from_json(json).unwrap_err(),
            CatalogError::DuplicateModule(_)
        ));
    }
}

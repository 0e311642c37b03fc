//! Step navigation inside one module.
//!
//! `NavigationEngine` is a small reducer: every learner request goes through
//! `dispatch` as a `NavigationAction` and comes back as zero or more
//! `NavigationEvent`s. Requests that fail a gate are no-ops and produce no
//! events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use course_core::model::{ModuleId, NavigationConfig, QuizAnswer, StepId, StepStatePatch};
use course_core::step_state;
use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::progress_store::ProgressStore;

/// A learner request inside a module view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationAction {
    Next,
    Previous,
    GoTo(StepId),
    AnswerQuiz { selected: u32 },
    /// Drop the answer entirely; the next answer counts as attempt 1.
    ResetQuiz,
    /// Keep the attempt count and wait for a new answer.
    RetryQuiz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    /// "Next" completed `from` and moved on.
    StepAdvanced {
        module: ModuleId,
        from: StepId,
        to: StepId,
    },
    StepChanged {
        module: ModuleId,
        from: StepId,
        to: StepId,
        direction: Direction,
    },
    QuizAnswered {
        module: ModuleId,
        step: StepId,
        selected: u32,
        is_correct: bool,
        attempts: u32,
        feedback: Option<String>,
    },
    QuizReset {
        module: ModuleId,
        step: StepId,
    },
    QuizRetry {
        module: ModuleId,
        step: StepId,
        attempts: u32,
    },
    ModuleCompleted {
        module: ModuleId,
    },
    /// An observer failed while handling another event.
    Error {
        context: String,
        message: String,
    },
}

/// Where the engine is. `Transitioning` swallows navigation until `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationPhase {
    Idle {
        step: StepId,
    },
    Transitioning {
        from: StepId,
        to: StepId,
        until: DateTime<Utc>,
    },
}

impl NavigationPhase {
    /// The step on screen, which is the target while transitioning.
    #[must_use]
    pub fn step(&self) -> StepId {
        match self {
            NavigationPhase::Idle { step } => *step,
            NavigationPhase::Transitioning { to, .. } => *to,
        }
    }
}

/// Receives the events produced by `NavigationEngine::dispatch`.
pub trait NavigationObserver: Send + Sync {
    /// # Errors
    ///
    /// A failure is reported back as a `NavigationEvent::Error`; committed progress is kept.
    fn on_event(&self, event: &NavigationEvent) -> Result<(), ObserverError>;
}

type TransitionGuard = Box<dyn Fn(StepId, StepId) -> bool + Send + Sync>;

pub struct NavigationEngine {
    store: ProgressStore,
    module: ModuleId,
    total_steps: u32,
    config: NavigationConfig,
    debounce: Duration,
    phase: NavigationPhase,
    observers: Vec<Arc<dyn NavigationObserver>>,
    guard: Option<TransitionGuard>,
}

impl fmt::Debug for NavigationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationEngine")
            .field("module", &self.module)
            .field("total_steps", &self.total_steps)
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl NavigationEngine {
    /// Open `module` at the learner's bookmark when it points into this
    /// module, otherwise at step 1.
    #[must_use]
    pub fn new(store: ProgressStore, module: ModuleId) -> Self {
        let total_steps = store.catalog().step_count(module);
        let config = store.settings().navigation();
        let debounce =
            Duration::from_std(store.settings().transition_debounce()).unwrap_or(Duration::zero());

        let position = store.current_position();
        let start = if position.module == module
            && position.step.value() >= 1
            && position.step.value() <= total_steps
        {
            position.step
        } else {
            StepId::FIRST
        };
        if position.module != module || position.step != start {
            store.set_current_position(module, start);
        }

        Self {
            store,
            module,
            total_steps,
            config,
            debounce,
            phase: NavigationPhase::Idle { step: start },
            observers: Vec::new(),
            guard: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: NavigationConfig) -> Self {
        self.config = config;
        self
    }

    /// Veto step changes: `guard(from, to)` returning `false` cancels the move.
    #[must_use]
    pub fn with_transition_guard(
        mut self,
        guard: impl Fn(StepId, StepId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn NavigationObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    #[must_use]
    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    #[must_use]
    pub fn config(&self) -> NavigationConfig {
        self.config
    }

    /// Current phase, with an elapsed transition already settled.
    #[must_use]
    pub fn phase(&self) -> NavigationPhase {
        match self.phase {
            NavigationPhase::Transitioning { to, until, .. } if self.now() >= until => {
                NavigationPhase::Idle { step: to }
            }
            phase => phase,
        }
    }

    #[must_use]
    pub fn current_step(&self) -> StepId {
        self.phase.step()
    }

    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        matches!(self.phase(), NavigationPhase::Transitioning { .. })
    }

    /// End a pending transition now, e.g. when the view finished animating.
    pub fn finish_transition(&mut self) {
        if let NavigationPhase::Transitioning { to, .. } = self.phase {
            self.phase = NavigationPhase::Idle { step: to };
        }
    }

    #[must_use]
    pub fn is_last_step(&self) -> bool {
        self.current_step().value() >= self.total_steps
    }

    /// Whether the current step's requirement for "Next" is met.
    #[must_use]
    pub fn step_requirement_met(&self) -> bool {
        if !self.config.require_quiz_completion {
            return true;
        }
        let step = self.current_step();
        let state = self.store.step_state(self.module, step);
        let answer = state.as_ref().and_then(|state| state.quiz_answer());
        let has_quiz = self.store.catalog().step_has_quiz(self.module, step) || answer.is_some();

        if has_quiz {
            answer.is_some_and(|answer| answer.is_answered() && answer.is_correct())
        } else {
            step_state::is_step_complete(state.as_ref(), true)
        }
    }

    /// State of the "Next" button.
    #[must_use]
    pub fn next_enabled(&self) -> bool {
        !self.is_transitioning()
            && self.step_requirement_met()
            && (self.is_last_step() || self.config.allow_forward_navigation)
    }

    /// State of the "Previous" button.
    #[must_use]
    pub fn previous_enabled(&self) -> bool {
        !self.is_transitioning()
            && self.config.allow_back_navigation
            && self.current_step() > StepId::FIRST
    }

    /// Apply `action` and notify observers. Returns every event it produced.
    pub fn dispatch(&mut self, action: NavigationAction) -> Vec<NavigationEvent> {
        self.settle();
        let mut events = Vec::new();
        self.reduce(action, &mut events);
        if events.is_empty() {
            debug!(module = %self.module, ?action, "navigation request ignored");
        }
        self.notify(&mut events);
        events
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    fn settle(&mut self) {
        self.phase = self.phase();
    }

    fn reduce(&mut self, action: NavigationAction, events: &mut Vec<NavigationEvent>) {
        match action {
            NavigationAction::Next => self.next(events),
            NavigationAction::Previous => {
                if self.previous_enabled() {
                    let from = self.current_step();
                    if let Some(to) = from.previous() {
                        self.change_step(from, to, Direction::Backward, events);
                    }
                }
            }
            NavigationAction::GoTo(target) => self.go_to(target, events),
            NavigationAction::AnswerQuiz { selected } => self.answer_quiz(selected, events),
            NavigationAction::ResetQuiz => self.reset_quiz(events),
            NavigationAction::RetryQuiz => self.retry_quiz(events),
        }
    }

    fn next(&mut self, events: &mut Vec<NavigationEvent>) {
        if !self.next_enabled() {
            return;
        }
        let from = self.current_step();

        if self.is_last_step() {
            self.store.complete_step(self.module, from);
            self.store.complete_module(self.module);
            events.push(NavigationEvent::ModuleCompleted {
                module: self.module,
            });
            return;
        }

        let to = from.next();
        if !self.guard_allows(from, to) {
            return;
        }
        self.store.complete_step(self.module, from);
        self.begin_transition(from, to);
        events.push(NavigationEvent::StepAdvanced {
            module: self.module,
            from,
            to,
        });
    }

    fn go_to(&mut self, target: StepId, events: &mut Vec<NavigationEvent>) {
        if self.is_transitioning() {
            return;
        }
        let from = self.current_step();
        if target == from || target.value() == 0 || target.value() > self.total_steps {
            return;
        }

        if target < from {
            if self.config.allow_back_navigation {
                self.change_step(from, target, Direction::Backward, events);
            }
            return;
        }

        if self.config.allow_forward_navigation
            && self.store.can_navigate_to_step(self.module, target)
        {
            self.change_step(from, target, Direction::Forward, events);
        }
    }

    fn change_step(
        &mut self,
        from: StepId,
        to: StepId,
        direction: Direction,
        events: &mut Vec<NavigationEvent>,
    ) {
        if !self.guard_allows(from, to) {
            return;
        }
        self.begin_transition(from, to);
        events.push(NavigationEvent::StepChanged {
            module: self.module,
            from,
            to,
            direction,
        });
    }

    fn guard_allows(&self, from: StepId, to: StepId) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(from, to))
    }

    fn begin_transition(&mut self, from: StepId, to: StepId) {
        self.store.set_current_position(self.module, to);
        self.phase = if self.debounce > Duration::zero() {
            NavigationPhase::Transitioning {
                from,
                to,
                until: self.now() + self.debounce,
            }
        } else {
            NavigationPhase::Idle { step: to }
        };
    }

    fn answer_quiz(&mut self, selected: u32, events: &mut Vec<NavigationEvent>) {
        let step = self.current_step();
        let Some(quiz) = self.store.catalog().quiz(self.module, step) else {
            return;
        };
        let previous = self.store.quiz_answer(self.module, step);
        if previous.as_ref().is_some_and(QuizAnswer::is_answered) {
            return;
        }

        let attempts = previous.as_ref().map_or(1, QuizAnswer::attempts);
        let is_correct = quiz.grade(selected);
        let feedback = quiz.feedback(is_correct).map(str::to_owned);
        let answer = step_state::create_quiz_answer(Some(selected), is_correct, attempts, self.now());
        self.store.save_quiz_answer(self.module, step, answer);

        events.push(NavigationEvent::QuizAnswered {
            module: self.module,
            step,
            selected,
            is_correct,
            attempts,
            feedback,
        });

        if is_correct && self.config.auto_advance_on_complete {
            self.next(events);
        }
    }

    fn reset_quiz(&mut self, events: &mut Vec<NavigationEvent>) {
        let step = self.current_step();
        if self.store.quiz_answer(self.module, step).is_none() {
            return;
        }
        self.store.clear_quiz_answer(self.module, step);
        events.push(NavigationEvent::QuizReset {
            module: self.module,
            step,
        });
    }

    fn retry_quiz(&mut self, events: &mut Vec<NavigationEvent>) {
        let step = self.current_step();
        let Some(previous) = self.store.quiz_answer(self.module, step) else {
            return;
        };
        if !previous.is_answered() {
            return;
        }

        let placeholder = QuizAnswer::awaiting_retry(&previous, self.now());
        let attempts = placeholder.attempts();
        self.store.update_step_state(
            self.module,
            step,
            StepStatePatch::new()
                .quiz_answer(placeholder)
                .completed(false),
        );
        events.push(NavigationEvent::QuizRetry {
            module: self.module,
            step,
            attempts,
        });
    }

    fn notify(&self, events: &mut Vec<NavigationEvent>) {
        let mut failures = Vec::new();
        for event in events.iter() {
            for observer in &self.observers {
                if let Err(err) = observer.on_event(event) {
                    warn!(module = %self.module, error = %err, "navigation observer failed");
                    failures.push(NavigationEvent::Error {
                        context: event_name(event).to_owned(),
                        message: err.to_string(),
                    });
                }
            }
        }

        for failure in &failures {
            for observer in &self.observers {
                // errors about errors are dropped
                let _ = observer.on_event(failure);
            }
        }
        events.extend(failures);
    }
}

fn event_name(event: &NavigationEvent) -> &'static str {
    match event {
        NavigationEvent::StepAdvanced { .. } => "step_advanced",
        NavigationEvent::StepChanged { .. } => "step_changed",
        NavigationEvent::QuizAnswered { .. } => "quiz_answered",
        NavigationEvent::QuizReset { .. } => "quiz_reset",
        NavigationEvent::QuizRetry { .. } => "quiz_retry",
        NavigationEvent::ModuleCompleted { .. } => "module_completed",
        NavigationEvent::Error { .. } => "error",
    }
}

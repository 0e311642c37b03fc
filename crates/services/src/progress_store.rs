use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use course_core::Clock;
use course_core::catalog::Catalog;
use course_core::model::{
    ModuleId, ModuleProgressData, Position, Progress, QuizAnswer, StepId, StepState,
    StepStatePatch, UserId,
};
use course_core::schedule::WeekLockInfo;
use course_core::settings::CourseSettings;
use course_core::step_state::{self, NextIncompleteStep};
use storage::repository::ProgressRepository;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::access::{self, ModuleAccess};
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;
use crate::sync::engine::{Command, SyncEngine};
use crate::sync::mutation::LocalMutation;
use crate::sync::{SyncState, SyncStatus};

/// A learner's progress, readable and writable without waiting on the network.
///
/// Every mutation applies to the local view at once and is queued for the
/// remote store. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    user: UserId,
    catalog: Arc<Catalog>,
    settings: CourseSettings,
    clock: Clock,
    state: Arc<Mutex<SyncState>>,
    status: Arc<watch::Sender<SyncStatus>>,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl ProgressStore {
    /// Start syncing `user`'s progress.
    ///
    /// Returns once the initial remote load has been attempted, or after the
    /// settings' initial load timeout when the store is slow to answer; the
    /// load then finishes in the background and `SyncStatus::attached` turns
    /// true. When offline or when the load fails the store starts from an
    /// empty document and keeps retrying on the next connectivity change or
    /// explicit sync.
    pub async fn open(
        user: UserId,
        repo: Arc<dyn ProgressRepository>,
        connectivity: &ConnectivityMonitor,
        catalog: Arc<Catalog>,
        settings: CourseSettings,
        clock: Clock,
    ) -> Self {
        let state = Arc::new(Mutex::new(SyncState::new(Progress::new(clock.now()))));
        let (status, _) = watch::channel(SyncStatus::default());
        let status = Arc::new(status);
        let (commands, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let engine = SyncEngine::new(
            user.clone(),
            repo,
            Arc::clone(&state),
            Arc::clone(&status),
            clock,
            settings.max_write_attempts(),
        );
        let task = tokio::spawn(engine.run(receiver, connectivity.subscribe(), ready_tx));
        if tokio::time::timeout(settings.initial_load_timeout(), ready_rx)
            .await
            .is_err()
        {
            warn!(user = %user, "remote progress still loading, continuing with local view");
        }
        info!(user = %user, "progress store opened");

        Self {
            inner: Arc::new(StoreInner {
                user,
                catalog,
                settings,
                clock,
                state,
                status,
                commands,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.inner.user
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    #[must_use]
    pub fn settings(&self) -> &CourseSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.inner.clock
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, mutation: LocalMutation) {
        let pending = {
            let mut state = self.lock();
            state.record(mutation);
            state.pending_len()
        };
        self.inner
            .status
            .send_modify(|status| status.pending_writes = pending);
        // A closed engine leaves the write queued locally.
        let _ = self.inner.commands.send(Command::Flush(None));
    }

    fn patch_step(&self, module: ModuleId, step: StepId, patch: StepStatePatch) {
        debug!(user = %self.inner.user, %module, %step, ?patch, "step update");
        self.record(LocalMutation::StepPatch {
            module,
            step,
            patch,
            at: self.inner.clock.now(),
        });
    }

    //
    // ─── MUTATIONS ──────────────────────────────────────────────────────────────
    //

    /// Merge `patch` into the step's state. An empty patch only touches `lastAccessed`.
    pub fn update_step_state(&self, module: ModuleId, step: StepId, patch: StepStatePatch) {
        self.patch_step(module, step, patch);
    }

    /// Record `answer`; the step counts as completed exactly when the answer is correct.
    pub fn save_quiz_answer(&self, module: ModuleId, step: StepId, answer: QuizAnswer) {
        let completed = answer.is_correct();
        self.patch_step(
            module,
            step,
            StepStatePatch::new().quiz_answer(answer).completed(completed),
        );
    }

    pub fn complete_step(&self, module: ModuleId, step: StepId) {
        self.patch_step(module, step, StepStatePatch::new().completed(true));
    }

    pub fn complete_module(&self, module: ModuleId) {
        info!(user = %self.inner.user, %module, "module completed");
        self.record(LocalMutation::CompleteModule {
            module,
            at: self.inner.clock.now(),
        });
    }

    pub fn mark_video_watched(&self, module: ModuleId, step: StepId) {
        self.patch_step(module, step, StepStatePatch::new().video_watched(true));
    }

    pub fn mark_pdf_downloaded(&self, module: ModuleId, step: StepId) {
        self.patch_step(module, step, StepStatePatch::new().pdf_downloaded(true));
    }

    /// Store the total seconds spent on a step (not an increment).
    pub fn record_time_spent(&self, module: ModuleId, step: StepId, seconds: u64) {
        self.patch_step(module, step, StepStatePatch::new().time_spent(seconds));
    }

    /// Remove the quiz answer and reopen the step.
    pub fn clear_quiz_answer(&self, module: ModuleId, step: StepId) {
        self.patch_step(
            module,
            step,
            StepStatePatch::new().clear_quiz_answer().completed(false),
        );
    }

    pub fn set_current_position(&self, module: ModuleId, step: StepId) {
        self.record(LocalMutation::Position {
            position: Position { module, step },
            at: self.inner.clock.now(),
        });
    }

    /// Merge progress kept on this device before it was tied to the learner.
    ///
    /// Only what adds to the current view is queued: newly set step flags,
    /// quiz answers where none is stored, longer time spent and missing
    /// module completions. The bookmark moves only when nothing was started
    /// yet. Returns the number of queued changes.
    pub fn import_local(&self, local: &Progress) -> usize {
        let view = self.snapshot();
        let mut queued = 0;

        for (&module, data) in local.module_progress() {
            for (&step, state) in data.step_states() {
                let patch = step_state::import_patch(state, view.step(module, step));
                if !patch.is_touch_only() {
                    self.patch_step(module, step, patch);
                    queued += 1;
                }
            }
        }
        for &module in local.completed_modules() {
            if !view.is_module_completed(module) {
                self.complete_module(module);
                queued += 1;
            }
        }
        if !view.has_in_progress() && local.has_in_progress() {
            let position = local.position();
            self.set_current_position(position.module, position.step);
            queued += 1;
        }

        info!(user = %self.inner.user, queued, "imported local progress");
        queued
    }

    //
    // ─── QUERIES ────────────────────────────────────────────────────────────────
    //

    /// Copy of the current local view.
    #[must_use]
    pub fn snapshot(&self) -> Progress {
        self.lock().view().clone()
    }

    #[must_use]
    pub fn step_state(&self, module: ModuleId, step: StepId) -> Option<StepState> {
        self.lock().view().step(module, step).cloned()
    }

    #[must_use]
    pub fn quiz_answer(&self, module: ModuleId, step: StepId) -> Option<QuizAnswer> {
        self.lock()
            .view()
            .step(module, step)
            .and_then(|state| state.quiz_answer().cloned())
    }

    #[must_use]
    pub fn is_step_attempted(&self, module: ModuleId, step: StepId) -> bool {
        step_state::is_step_attempted(self.lock().view().step(module, step))
    }

    #[must_use]
    pub fn is_step_complete(&self, module: ModuleId, step: StepId, require_quiz: bool) -> bool {
        step_state::is_step_complete(self.lock().view().step(module, step), require_quiz)
    }

    #[must_use]
    pub fn can_navigate_to_step(&self, module: ModuleId, step: StepId) -> bool {
        step_state::can_navigate_to_step(self.lock().view().module(module), step)
    }

    /// Completion percentage of `module` against its catalog step count.
    #[must_use]
    pub fn module_progress(&self, module: ModuleId) -> u8 {
        let total = self.inner.catalog.step_count(module);
        step_state::calculate_module_progress(self.lock().view().module(module), total)
    }

    #[must_use]
    pub fn module_data(&self, module: ModuleId) -> Option<ModuleProgressData> {
        self.lock().view().module(module).cloned()
    }

    #[must_use]
    pub fn next_incomplete_step(&self, module: ModuleId) -> NextIncompleteStep {
        let total = self.inner.catalog.step_count(module);
        step_state::next_incomplete_step(self.lock().view().module(module), total)
    }

    #[must_use]
    pub fn current_position(&self) -> Position {
        self.lock().view().position()
    }

    #[must_use]
    pub fn overall_progress(&self) -> u8 {
        self.lock()
            .view()
            .overall_progress(self.inner.settings.total_modules())
    }

    #[must_use]
    pub fn is_module_completed(&self, module: ModuleId) -> bool {
        self.lock().view().is_module_completed(module)
    }

    #[must_use]
    pub fn has_in_progress(&self) -> bool {
        self.lock().view().has_in_progress()
    }

    #[must_use]
    pub fn week_lock_info(&self, module: ModuleId) -> WeekLockInfo {
        self.inner
            .settings
            .schedule()
            .lock_info(module, self.inner.clock.now())
    }

    #[must_use]
    pub fn all_lock_info(&self) -> Vec<WeekLockInfo> {
        self.inner
            .settings
            .schedule()
            .all_lock_info(self.inner.clock.now())
    }

    /// Whether the learner may open `module` now.
    #[must_use]
    pub fn module_access(&self, module: ModuleId) -> ModuleAccess {
        let progress = self.snapshot();
        access::module_access(
            &progress,
            self.inner.settings.schedule(),
            module,
            self.inner.clock.now(),
        )
    }

    //
    // ─── SYNC CONTROL ───────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn watch_sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Drop the advisory error from the status.
    pub fn clear_error(&self) {
        self.inner.status.send_modify(|status| status.last_error = None);
    }

    /// Send every queued write now.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Offline` while disconnected, the storage error that
    /// stopped the queue, or `SyncError::Closed` after `close`.
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        let (ack, result) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Flush(Some(ack)))
            .map_err(|_| SyncError::Closed)?;
        result.await.map_err(|_| SyncError::Closed)?
    }

    /// Merge the whole local view into the remote document.
    ///
    /// # Errors
    ///
    /// Same as `sync_now`.
    pub async fn force_sync(&self) -> Result<(), SyncError> {
        let (ack, result) = oneshot::channel();
        self.inner
            .commands
            .send(Command::ForceSync(ack))
            .map_err(|_| SyncError::Closed)?;
        result.await.map_err(|_| SyncError::Closed)?
    }

    /// Stop syncing. Queued writes stay in the local view but are not sent.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.inner.commands.send(Command::Close(ack)).is_ok() {
            let _ = done.await;
        }
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(user = %self.inner.user, "progress store closed");
    }
}

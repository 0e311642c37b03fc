use std::sync::Arc;

use course_core::Clock;
use course_core::catalog::Catalog;
use course_core::model::{ModuleId, UserId};
use course_core::settings::CourseSettings;
use storage::repository::Storage;
use tracing::info;

use crate::connectivity::ConnectivityMonitor;
use crate::countdown::WeekCountdown;
use crate::error::{CourseServicesError, SessionError};
use crate::navigation::NavigationEngine;
use crate::progress_store::ProgressStore;

/// Course-wide collaborators shared by every learner session.
#[derive(Clone)]
pub struct CourseServices {
    storage: Storage,
    catalog: Arc<Catalog>,
    settings: CourseSettings,
    clock: Clock,
    connectivity: ConnectivityMonitor,
}

impl CourseServices {
    #[must_use]
    pub fn new(storage: Storage, catalog: Catalog, settings: CourseSettings, clock: Clock) -> Self {
        Self {
            storage,
            catalog: Arc::new(catalog),
            settings,
            clock,
            connectivity: ConnectivityMonitor::online(),
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `CourseServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        db_url: &str,
        catalog: Catalog,
        settings: CourseSettings,
        clock: Clock,
    ) -> Result<Self, CourseServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(storage, catalog, settings, clock))
    }

    /// Share an existing monitor, e.g. one fed by the host's network events.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn settings(&self) -> &CourseSettings {
        &self.settings
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Open a session for `user`: loads (or creates) their progress and subscribes to remote changes.
    pub async fn login(&self, user: UserId) -> LearnerSession {
        let progress = ProgressStore::open(
            user.clone(),
            Arc::clone(&self.storage.progress),
            &self.connectivity,
            Arc::clone(&self.catalog),
            self.settings.clone(),
            self.clock,
        )
        .await;
        info!(user = %user, "learner session started");
        LearnerSession { user, progress }
    }
}

/// Everything scoped to one authenticated learner. Ends with `logout`.
pub struct LearnerSession {
    user: UserId,
    progress: ProgressStore,
}

impl LearnerSession {
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Enter `module` if both the completion and the calendar gates allow it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` when the module is unknown or locked.
    pub fn navigation(&self, module: ModuleId) -> Result<NavigationEngine, SessionError> {
        if self.progress.catalog().module(module).is_none() {
            return Err(SessionError::UnknownModule(module));
        }
        self.progress.module_access(module).into_result(module)?;
        Ok(NavigationEngine::new(self.progress.clone(), module))
    }

    #[must_use]
    pub fn countdown(&self, module: ModuleId) -> WeekCountdown {
        WeekCountdown::start(
            self.progress.settings().schedule().clone(),
            module,
            self.progress.clock(),
        )
    }

    /// Stop syncing and discard the local progress.
    pub async fn logout(self) {
        self.progress.close().await;
        info!(user = %self.user, "learner session ended");
    }
}

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use course_core::Clock;
use course_core::model::UserId;
use storage::repository::{ProgressRepository, ProgressSubscription, RemoteSnapshot};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::state::{SyncState, SyncStatus};
use crate::error::SyncError;

pub(crate) type Ack = oneshot::Sender<Result<(), SyncError>>;

/// Requests from a `ProgressStore` to its engine task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send queued writes. Local mutations enqueue this without an ack.
    Flush(Option<Ack>),
    /// Push the whole local view with merge semantics.
    ForceSync(Ack),
    Close(oneshot::Sender<()>),
}

enum EngineEvent {
    Command(Option<Command>),
    Connectivity { monitor_alive: bool },
    Remote(Option<RemoteSnapshot>),
}

/// Single task owning all remote I/O for one learner.
///
/// Outbound writes leave strictly in queue order, one at a time. Inbound
/// snapshots rebase the shared state between writes.
pub(crate) struct SyncEngine {
    user: UserId,
    repo: Arc<dyn ProgressRepository>,
    state: Arc<Mutex<SyncState>>,
    status: Arc<watch::Sender<SyncStatus>>,
    clock: Clock,
    max_write_attempts: u32,
    online: bool,
    attached: bool,
}

impl SyncEngine {
    pub(crate) fn new(
        user: UserId,
        repo: Arc<dyn ProgressRepository>,
        state: Arc<Mutex<SyncState>>,
        status: Arc<watch::Sender<SyncStatus>>,
        clock: Clock,
        max_write_attempts: u32,
    ) -> Self {
        Self {
            user,
            repo,
            state,
            status,
            clock,
            max_write_attempts,
            online: false,
            attached: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut connectivity: watch::Receiver<bool>,
        ready: oneshot::Sender<()>,
    ) {
        let mut subscription: Option<ProgressSubscription> = None;

        self.online = *connectivity.borrow_and_update();
        self.publish_status(|_| {});
        if self.online {
            if let Err(err) = self.flush(&mut subscription).await {
                self.record_error("initial load", &err);
            }
        } else {
            debug!(user = %self.user, "starting offline, remote load deferred");
        }
        let _ = ready.send(());

        let mut watching = true;
        loop {
            let event = tokio::select! {
                command = commands.recv() => EngineEvent::Command(command),
                changed = connectivity.changed(), if watching => EngineEvent::Connectivity {
                    monitor_alive: changed.is_ok(),
                },
                snapshot = next_snapshot(&mut subscription) => EngineEvent::Remote(snapshot),
            };

            match event {
                EngineEvent::Command(None) => break,
                EngineEvent::Command(Some(Command::Close(ack))) => {
                    let _ = ack.send(());
                    break;
                }
                EngineEvent::Command(Some(Command::Flush(ack))) => {
                    let result = self.flush(&mut subscription).await;
                    match ack {
                        Some(ack) => {
                            let _ = ack.send(result);
                        }
                        None => {
                            if let Err(err) = result {
                                self.record_error("sync", &err);
                            }
                        }
                    }
                }
                EngineEvent::Command(Some(Command::ForceSync(ack))) => {
                    let result = self.force_sync(&mut subscription).await;
                    if let Err(err) = &result {
                        self.record_error("force sync", err);
                    }
                    let _ = ack.send(result);
                }
                EngineEvent::Connectivity { monitor_alive } => {
                    if !monitor_alive {
                        watching = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    self.on_connectivity(online, &mut subscription).await;
                }
                EngineEvent::Remote(Some(snapshot)) => self.apply_remote(snapshot),
                EngineEvent::Remote(None) => {
                    warn!(user = %self.user, "progress subscription ended");
                    subscription = None;
                    self.attached = false;
                    self.publish_status(|_| {});
                }
            }
        }

        self.attached = false;
        self.publish_status(|_| {});
        info!(user = %self.user, "progress sync stopped");
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_status(&self, edit: impl FnOnce(&mut SyncStatus)) {
        let pending = self.lock().pending_len();
        self.status.send_modify(|status| {
            status.online = self.online;
            status.attached = self.attached;
            status.pending_writes = pending;
            edit(status);
        });
    }

    fn record_error(&self, context: &str, err: &SyncError) {
        match err {
            SyncError::Offline => debug!(user = %self.user, context, "deferred while offline"),
            _ => warn!(user = %self.user, context, error = %err, "progress sync failed"),
        }
        let message = format!("{context}: {err}");
        self.publish_status(|status| status.last_error = Some(message));
    }

    async fn on_connectivity(
        &mut self,
        online: bool,
        subscription: &mut Option<ProgressSubscription>,
    ) {
        if online == self.online {
            return;
        }
        self.online = online;
        info!(user = %self.user, online, "connectivity changed");
        self.publish_status(|_| {});

        if online {
            if let Err(err) = self.flush(subscription).await {
                self.record_error("reconnect", &err);
            }
        }
    }

    /// Load the remote document (creating it on first session) and subscribe.
    async fn attach(
        &mut self,
        subscription: &mut Option<ProgressSubscription>,
    ) -> Result<(), SyncError> {
        let live = self.repo.subscribe(&self.user).await?;

        match self.repo.get_progress(&self.user).await? {
            Some(snapshot) => {
                let revision = snapshot.revision;
                self.lock().apply_snapshot(snapshot);
                info!(user = %self.user, revision, "attached to remote progress");
            }
            None => {
                let (view, covered) = {
                    let state = self.lock();
                    (state.view().clone(), state.pending_len())
                };
                let revision = self.repo.set_progress(&self.user, &view).await?;
                self.lock().front_acknowledged(covered, revision);
                info!(user = %self.user, revision, "created progress for first session");
            }
        }

        *subscription = Some(live);
        self.attached = true;
        let now = self.clock.now();
        self.publish_status(|status| {
            status.last_synced_at = Some(now);
        });
        Ok(())
    }

    async fn flush(
        &mut self,
        subscription: &mut Option<ProgressSubscription>,
    ) -> Result<(), SyncError> {
        if !self.online {
            return Err(SyncError::Offline);
        }
        if !self.attached {
            self.attach(subscription).await?;
        }

        loop {
            let head = self
                .lock()
                .head()
                .map(|pending| (pending.id, pending.writes.clone()));
            let Some((id, writes)) = head else {
                break;
            };

            match self.repo.update_fields(&self.user, &writes).await {
                Ok(revision) => {
                    self.lock().head_acknowledged(id, revision);
                    debug!(user = %self.user, write = %id, revision, "write stored");
                    let now = self.clock.now();
                    self.publish_status(|status| {
                        status.head_attempts = 0;
                        status.last_error = None;
                        status.last_synced_at = Some(now);
                    });
                }
                Err(err) => {
                    let attempts = self.lock().head_failed(id);
                    if attempts >= self.max_write_attempts {
                        warn!(user = %self.user, write = %id, attempts, "write keeps failing");
                    }
                    self.publish_status(|status| status.head_attempts = attempts);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    async fn force_sync(
        &mut self,
        subscription: &mut Option<ProgressSubscription>,
    ) -> Result<(), SyncError> {
        if !self.online {
            return Err(SyncError::Offline);
        }
        if !self.attached {
            self.attach(subscription).await?;
        }

        let (view, covered) = {
            let state = self.lock();
            (state.view().clone(), state.pending_len())
        };
        let revision = self.repo.set_progress(&self.user, &view).await?;
        self.lock().front_acknowledged(covered, revision);
        info!(user = %self.user, revision, "pushed full progress");

        let now = self.clock.now();
        self.publish_status(|status| {
            status.head_attempts = 0;
            status.last_error = None;
            status.last_synced_at = Some(now);
        });
        Ok(())
    }

    fn apply_remote(&self, snapshot: RemoteSnapshot) {
        let revision = snapshot.revision;
        let (applied, confirmed) = {
            let mut state = self.lock();
            let applied = state.apply_snapshot(snapshot);
            (applied, state.confirmed_revision())
        };
        if applied {
            debug!(user = %self.user, revision, "applied remote progress");
        } else {
            debug!(user = %self.user, revision, confirmed, "ignored stale remote progress");
        }
    }
}

async fn next_snapshot(subscription: &mut Option<ProgressSubscription>) -> Option<RemoteSnapshot> {
    match subscription {
        Some(live) => live.recv().await,
        None => std::future::pending().await,
    }
}

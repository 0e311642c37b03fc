use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use course_core::model::Progress;
use storage::repository::RemoteSnapshot;
use uuid::Uuid;

use super::mutation::{LocalMutation, PendingWrite};

/// Observable health of the link between a progress store and the remote.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub online: bool,
    /// Initial load and subscription succeeded.
    pub attached: bool,
    pub pending_writes: usize,
    /// Failed sends of the write at the head of the queue.
    pub head_attempts: u32,
    /// Advisory only; local progress stays usable.
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// True when nothing is waiting to be written and the store is attached.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.attached && self.pending_writes == 0
    }
}

#[derive(Debug, Clone)]
struct Acknowledged {
    revision: u64,
    mutation: LocalMutation,
}

/// Confirmed remote state plus local mutations not yet seen in it.
///
/// `view` is always `confirmed` with acknowledged and pending mutations
/// replayed in order.
#[derive(Debug)]
pub(crate) struct SyncState {
    confirmed: Progress,
    confirmed_revision: u64,
    acknowledged: Vec<Acknowledged>,
    pending: VecDeque<PendingWrite>,
    view: Progress,
}

impl SyncState {
    pub(crate) fn new(initial: Progress) -> Self {
        Self {
            confirmed: initial.clone(),
            confirmed_revision: 0,
            acknowledged: Vec::new(),
            pending: VecDeque::new(),
            view: initial,
        }
    }

    pub(crate) fn view(&self) -> &Progress {
        &self.view
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn confirmed_revision(&self) -> u64 {
        self.confirmed_revision
    }

    /// Apply `mutation` locally and queue it for the remote.
    pub(crate) fn record(&mut self, mutation: LocalMutation) {
        mutation.apply(&mut self.view);
        let pending = PendingWrite::new(mutation, &self.view);
        self.pending.push_back(pending);
    }

    pub(crate) fn head(&self) -> Option<&PendingWrite> {
        self.pending.front()
    }

    pub(crate) fn head_failed(&mut self, id: Uuid) -> u32 {
        match self.pending.front_mut() {
            Some(head) if head.id == id => {
                head.attempts += 1;
                head.attempts
            }
            _ => 0,
        }
    }

    /// The head write was stored at `revision`.
    ///
    /// It stays in the replay list until a snapshot at least that new arrives.
    pub(crate) fn head_acknowledged(&mut self, id: Uuid, revision: u64) {
        if self.pending.front().is_none_or(|head| head.id != id) {
            return;
        }
        let Some(head) = self.pending.pop_front() else {
            return;
        };
        if revision > self.confirmed_revision {
            self.acknowledged.push(Acknowledged {
                revision,
                mutation: head.mutation,
            });
        }
    }

    /// The first `count` queued writes were covered by a whole-document write at `revision`.
    pub(crate) fn front_acknowledged(&mut self, count: usize, revision: u64) {
        let count = count.min(self.pending.len());
        let drained: Vec<PendingWrite> = self.pending.drain(..count).collect();
        if revision > self.confirmed_revision {
            self.acknowledged
                .extend(drained.into_iter().map(|pending| Acknowledged {
                    revision,
                    mutation: pending.mutation,
                }));
        }
    }

    /// Rebase on a remote snapshot. Returns `false` for stale revisions.
    pub(crate) fn apply_snapshot(&mut self, snapshot: RemoteSnapshot) -> bool {
        if snapshot.revision <= self.confirmed_revision {
            return false;
        }
        self.confirmed = snapshot.progress;
        self.confirmed_revision = snapshot.revision;
        self.acknowledged
            .retain(|acknowledged| acknowledged.revision > snapshot.revision);
        self.rebuild_view();
        true
    }

    fn rebuild_view(&mut self) {
        let mut view = self.confirmed.clone();
        for acknowledged in &self.acknowledged {
            acknowledged.mutation.apply(&mut view);
        }
        for pending in &self.pending {
            pending.mutation.apply(&mut view);
        }
        self.view = view;
    }
}

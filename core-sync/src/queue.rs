//! FIFO of offline edits, persisted on every change

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::mutation::{Mutation, PendingMutation};
use crate::snapshot::SnapshotStore;

/// Ordered list of edits awaiting a flush.
///
/// Every change is written through to the [`SnapshotStore`] before the call
/// returns.
pub struct MutationQueue {
    store: SnapshotStore,
    entries: Mutex<Vec<PendingMutation>>,
}

impl MutationQueue {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Restores whatever was queued by a previous session.
    pub async fn load(store: SnapshotStore) -> Self {
        let entries = store.load_pending().await;
        debug!(pending = entries.len(), "Loaded pending mutations");
        Self {
            store,
            entries: Mutex::new(entries),
        }
    }

    /// Appends `mutation` under a fresh id and persists the queue.
    ///
    /// Nothing is kept in memory if the write fails.
    pub async fn enqueue(&self, mutation: Mutation) -> Result<PendingMutation> {
        let pending = PendingMutation {
            id: Uuid::new_v4().to_string(),
            mutation,
        };

        let mut entries = self.entries.lock().await;
        entries.push(pending.clone());
        if let Err(e) = self.store.save_pending(&entries).await {
            entries.pop();
            warn!(kind = pending.mutation.kind(), error = %e, "Failed to persist offline change");
            return Err(e);
        }

        debug!(
            mutation_id = %pending.id,
            kind = pending.mutation.kind(),
            pending = entries.len(),
            "Queued offline change"
        );
        Ok(pending)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<PendingMutation> {
        self.entries.lock().await.clone()
    }

    /// Working copy for a flush. Pair with [`finish_drain`](Self::finish_drain).
    pub async fn begin_drain(&self) -> Vec<PendingMutation> {
        self.snapshot().await
    }

    /// Replaces the first `taken` entries with `remaining` and persists.
    ///
    /// Entries appended while the flush was running stay queued after
    /// `remaining`. Returns the new queue length.
    ///
    /// The server has already seen the applied entries, so memory is updated
    /// even when the write fails; the error is still returned.
    pub async fn finish_drain(&self, remaining: Vec<PendingMutation>, taken: usize) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let taken = taken.min(entries.len());
        let appended = entries.split_off(taken);

        let mut next = remaining;
        next.extend(appended);
        *entries = next;

        if let Err(e) = self.store.save_pending(&entries).await {
            warn!(pending = entries.len(), error = %e, "Failed to persist drained queue");
            return Err(e);
        }
        Ok(entries.len())
    }
}

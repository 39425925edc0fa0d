//! # Sync Engine
//!
//! Replays queued offline edits against the remote repertoire service.
//!
//! ## Flush cycle
//!
//! 1. Skip when offline, when another flush is running, or when nothing is
//!    queued. A skipped flush makes no calls and changes nothing.
//! 2. Take the queued entries and start a fresh [`IdRemapper`].
//! 3. Dispatch each entry in order, resolving placeholders first:
//!    - success removes it and records any id the server assigned
//!    - a connectivity failure stops the cycle, leaving it and everything
//!      after it queued
//!    - any other failure drops it for good and the cycle continues
//!    - an entry that still references an unconfirmed placeholder stays
//!      queued and the cycle continues
//! 4. Write the leftovers back as the new queue head.
//! 5. If anything was applied, re-read the server view and save it as the
//!    offline snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bridge_traits::time::Clock;
use core_library::{fetch_all_songs, RepertoireApi, SetlistId};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, RepertoireEvent, SyncEvent};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::mutation::{Mutation, PendingMutation};
use crate::queue::MutationQueue;
use crate::remap::{IdRemapper, ResourceKind};
use crate::snapshot::{OfflineSnapshot, SnapshotStore};

/// Confirmation shown after a flush that applied something.
pub const SYNCED_MESSAGE: &str = "Offline changes synced.";

/// How a flush call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every entry was either applied, dropped or deferred.
    Completed,
    /// Stopped at the first connectivity failure.
    Halted,
    Offline,
    Empty,
    AlreadyRunning,
}

impl FlushOutcome {
    pub fn is_skipped(self) -> bool {
        matches!(
            self,
            FlushOutcome::Offline | FlushOutcome::Empty | FlushOutcome::AlreadyRunning
        )
    }
}

/// Summary of one flush call.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    pub applied: usize,
    pub dropped: usize,
    /// Entries kept because a placeholder they use was never confirmed
    pub deferred: usize,
    /// Queue length after the flush
    pub remaining: usize,
    pub halted_on_connectivity: bool,
    /// Fresh server view, when the post-flush refresh succeeded
    pub snapshot: Option<OfflineSnapshot>,
    /// Placeholders confirmed during this flush
    pub ids: IdRemapper,
    pub message: Option<String>,
}

impl FlushReport {
    fn skipped(outcome: FlushOutcome, remaining: usize) -> Self {
        Self {
            outcome,
            applied: 0,
            dropped: 0,
            deferred: 0,
            remaining,
            halted_on_connectivity: false,
            snapshot: None,
            ids: IdRemapper::new(),
            message: None,
        }
    }
}

enum Dispatch {
    Applied,
    /// References a placeholder that has no server id yet
    NotReady,
    /// Nothing left to send after resolution
    Empty,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the [`MutationQueue`] against a [`RepertoireApi`].
pub struct SyncEngine {
    api: Arc<dyn RepertoireApi>,
    queue: Arc<MutationQueue>,
    store: SnapshotStore,
    event_bus: EventBus,
    online: watch::Receiver<bool>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    running: AtomicBool,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn RepertoireApi>,
        queue: Arc<MutationQueue>,
        store: SnapshotStore,
        event_bus: EventBus,
        online: watch::Receiver<bool>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            api,
            queue,
            store,
            event_bus,
            online,
            clock,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }

    /// Runs one flush cycle. `active` is the selected setlist, possibly a
    /// placeholder, whose detail is included in the refreshed snapshot.
    #[instrument(skip(self), fields(active = ?active))]
    pub async fn flush(&self, active: Option<SetlistId>) -> Result<FlushReport> {
        if !*self.online.borrow() {
            debug!("Offline, flush skipped");
            return Ok(FlushReport::skipped(
                FlushOutcome::Offline,
                self.queue.len().await,
            ));
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already running");
            return Ok(FlushReport::skipped(
                FlushOutcome::AlreadyRunning,
                self.queue.len().await,
            ));
        }
        let _guard = RunningGuard(&self.running);

        let working = self.queue.begin_drain().await;
        if working.is_empty() {
            return Ok(FlushReport::skipped(FlushOutcome::Empty, 0));
        }

        let taken = working.len();
        info!(pending = taken, "Flushing offline changes");
        self.emit(SyncEvent::FlushStarted { pending: taken });

        let mut ids = IdRemapper::new();
        let mut remaining: Vec<PendingMutation> = Vec::new();
        let (mut applied, mut dropped, mut deferred) = (0, 0, 0);
        let mut halted = false;

        let mut entries = working.into_iter();
        while let Some(pending) = entries.next() {
            match self.dispatch(&pending.mutation, &mut ids).await {
                Ok(Dispatch::Applied) => {
                    applied += 1;
                    debug!(mutation_id = %pending.id, kind = pending.mutation.kind(), "Applied");
                }
                Ok(Dispatch::NotReady) => {
                    deferred += 1;
                    warn!(
                        mutation_id = %pending.id,
                        kind = pending.mutation.kind(),
                        "Change references an unsynced item, keeping it queued"
                    );
                    remaining.push(pending);
                }
                Ok(Dispatch::Empty) => {
                    dropped += 1;
                    self.drop_mutation(&pending, "Nothing left to reorder".to_string());
                }
                Err(e) if e.is_connectivity() => {
                    halted = true;
                    debug!(error = %e, "Server unreachable, stopping flush");
                    remaining.push(pending);
                    remaining.extend(entries.by_ref());
                    break;
                }
                Err(e) => {
                    dropped += 1;
                    self.drop_mutation(&pending, e.user_message());
                }
            }
        }

        let remaining: Vec<PendingMutation> =
            remaining.into_iter().map(|p| p.remapped(&ids)).collect();
        let left = match self.queue.finish_drain(remaining, taken).await {
            Ok(left) => left,
            Err(e) => {
                warn!(error = %e, "Drained queue not persisted");
                self.queue.len().await
            }
        };

        if halted {
            self.emit(SyncEvent::FlushHalted {
                applied,
                remaining: left,
            });
        }

        let mut snapshot = None;
        let mut message = None;
        if applied > 0 {
            let active = active.map(|id| ids.setlist(id));
            match self.refresh_with(active, &ids).await {
                Ok(fresh) => snapshot = Some(fresh),
                Err(e) => warn!(error = %e, "Refresh after flush failed"),
            }

            message = Some(SYNCED_MESSAGE.to_string());
            self.emit(SyncEvent::FlushCompleted {
                applied,
                dropped,
                remaining: left,
                message: SYNCED_MESSAGE.to_string(),
            });
        }

        info!(applied, dropped, deferred, remaining = left, halted, "Flush finished");

        Ok(FlushReport {
            outcome: if halted {
                FlushOutcome::Halted
            } else {
                FlushOutcome::Completed
            },
            applied,
            dropped,
            deferred,
            remaining: left,
            halted_on_connectivity: halted,
            snapshot,
            ids,
            message,
        })
    }

    fn drop_mutation(&self, pending: &PendingMutation, reason: String) {
        warn!(
            mutation_id = %pending.id,
            kind = pending.mutation.kind(),
            reason = %reason,
            "Dropping offline change"
        );
        self.emit(SyncEvent::MutationDropped {
            mutation_id: pending.id.clone(),
            kind: pending.mutation.kind().to_string(),
            reason,
        });
    }

    async fn dispatch(
        &self,
        mutation: &Mutation,
        ids: &mut IdRemapper,
    ) -> core_library::Result<Dispatch> {
        match mutation {
            Mutation::CreateSong(p) => {
                let song = self.api.create_song(&p.title, &p.artist).await?;
                ids.record(ResourceKind::Song, p.temp_song_id.0, song.id.0);
            }
            Mutation::CreateSetlist(p) => {
                let setlist = self.api.create_setlist(&p.name).await?;
                ids.record(ResourceKind::Setlist, p.temp_setlist_id.0, setlist.id.0);
            }
            Mutation::RenameSetlist(p) => {
                let setlist_id = ids.setlist(p.setlist_id);
                if setlist_id.is_temporary() {
                    return Ok(Dispatch::NotReady);
                }
                self.api.update_setlist(setlist_id, &p.name).await?;
            }
            Mutation::AddSetlistItem(p) => {
                let setlist_id = ids.setlist(p.setlist_id);
                let song_id = ids.song(p.song_id);
                if setlist_id.is_temporary() || song_id.is_temporary() {
                    return Ok(Dispatch::NotReady);
                }
                let item = self.api.add_setlist_item(setlist_id, song_id).await?;
                ids.record(ResourceKind::Item, p.temp_item_id.0, item.id.0);
            }
            Mutation::DeleteSetlistItem(p) => {
                let item_id = ids.item(p.item_id);
                if item_id.is_temporary() {
                    return Ok(Dispatch::NotReady);
                }
                self.api.delete_setlist_item(item_id).await?;
            }
            Mutation::ReorderSetlist(p) => {
                let setlist_id = ids.setlist(p.setlist_id);
                if setlist_id.is_temporary() {
                    return Ok(Dispatch::NotReady);
                }
                let item_ids: Vec<_> = p
                    .item_ids
                    .iter()
                    .map(|&id| ids.item(id))
                    .filter(|id| !id.is_temporary())
                    .collect();
                if item_ids.is_empty() {
                    return Ok(Dispatch::Empty);
                }
                self.api.reorder_setlist(setlist_id, &item_ids).await?;
            }
        }
        Ok(Dispatch::Applied)
    }

    /// Re-reads the server view and saves it as the offline snapshot.
    pub async fn refresh(&self, active: Option<SetlistId>) -> Result<OfflineSnapshot> {
        self.refresh_with(active, &IdRemapper::new()).await
    }

    /// Songs (every page), setlists, and the detail of each setlist that was
    /// already cached plus the active one.
    async fn refresh_with(
        &self,
        active: Option<SetlistId>,
        ids: &IdRemapper,
    ) -> Result<OfflineSnapshot> {
        let previous = self.store.load().await;

        let songs = fetch_all_songs(self.api.as_ref(), self.settings.song_page_size).await?;
        let setlists = self.api.list_setlists().await?;

        let mut wanted: Vec<SetlistId> = previous
            .iter()
            .flat_map(|snapshot| snapshot.setlist_details_by_id.keys())
            .map(|&id| ids.setlist(id))
            .chain(active)
            .filter(|id| setlists.iter().any(|s| s.id == *id))
            .collect();
        wanted.sort();
        wanted.dedup();

        let mut snapshot = OfflineSnapshot::empty(self.clock.now());
        for id in wanted {
            match self.api.get_setlist(id).await {
                Ok(detail) => {
                    snapshot.setlist_details_by_id.insert(id, detail);
                }
                Err(e) if e.is_connectivity() => return Err(e.into()),
                Err(e) => debug!(setlist_id = %id, error = %e, "Skipping setlist detail"),
            }
        }

        snapshot.active_setlist_id = active.filter(|id| {
            id.is_temporary() || setlists.iter().any(|s| s.id == *id)
        });
        snapshot.songs = songs;
        snapshot.setlists = setlists;

        self.store.save(&snapshot).await?;
        self.event_bus
            .emit(CoreEvent::Repertoire(RepertoireEvent::SnapshotRefreshed {
                songs: snapshot.songs.len(),
                setlists: snapshot.setlists.len(),
            }))
            .ok();

        Ok(snapshot)
    }
}

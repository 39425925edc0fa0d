//! # Setlist Service
//!
//! Single entry point for hosts. Wires the repertoire API, the offline queue,
//! the sync engine and the realtime request client together.
//!
//! ## Edits
//!
//! Edits that can be made offline go straight to the server when online and
//! nothing is queued. Queued edits are sent first, so a direct edit never
//! overtakes them. When offline, when the server cannot be reached, or when
//! the edit refers to something that only exists locally, the edit is
//! applied to the local view and queued instead. A flush stopped by an
//! unreachable server is retried after a fixed delay.
//!
//! Deleting a setlist, editing song details and searching the library need
//! the server and fail with [`ServiceError::OfflineUnsupported`] offline.
//!
//! ## Local view
//!
//! The view is always the last confirmed server snapshot with the queued
//! edits replayed on top, so confirming or dropping a queued edit never
//! leaves stale placeholders behind.
//!
//! ## Audience requests
//!
//! The active setlist's requests are polled while online. The push channel
//! is only opened once the setlist's audience link is known.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bridge_traits::network::NetworkMonitor;
use bridge_traits::storage::SecureStore;
use bridge_traits::time::Clock;
use core_library::selection::{filter_songs_not_in_setlist, ids_ready_to_add};
use core_library::{
    models::require_text, AudienceLink, AudienceRequest, HttpRepertoireApi, ItemId, LibraryError,
    MoveDirection, RepertoireApi, RepertoireState, SetlistDetail, SetlistId, Setlist,
    SetlistItem, Song, SongId, SongPage, SongPatch, SongQuery, TempIdAllocator, ACCESS_TOKEN_KEY,
};
use core_realtime::{ConnectionState, RealtimeQueueClient, RealtimeTarget};
use core_runtime::config::CoreConfig;
use core_runtime::events::{
    CoreEvent, EventBus, RepertoireEvent, SyncEvent, DEFAULT_EVENT_BUFFER_SIZE,
};
use core_sync::{
    AddSetlistItemPayload, CreateSetlistPayload, CreateSongPayload, DeleteSetlistItemPayload,
    FlushOutcome, FlushReport, IdRemapper, Mutation, MutationQueue, OfflineSnapshot, PendingMutation,
    RenameSetlistPayload, ReorderSetlistPayload, ResourceKind, SnapshotStore, SyncEngine,
};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::confirmed;
use crate::error::{Result, ServiceError};

/// Where an edit goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Server,
    /// Queue it; flush right away when online
    Queue { flush: bool },
}

impl Route {
    /// Placeholders cannot be sent directly; they go through a flush.
    fn unless_placeholder(self, references_placeholder: bool) -> Route {
        match self {
            Route::Server if references_placeholder => Route::Queue { flush: true },
            route => route,
        }
    }
}

struct Inner {
    api: Arc<dyn RepertoireApi>,
    secure_store: Arc<dyn SecureStore>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    store: SnapshotStore,
    queue: Arc<MutationQueue>,
    engine: SyncEngine,
    realtime: RealtimeQueueClient,
    temp_ids: TempIdAllocator,
    /// Every placeholder confirmed since startup
    confirmed_ids: Mutex<IdRemapper>,
    online: watch::Sender<bool>,
    confirmed: Mutex<OfflineSnapshot>,
    state: RwLock<RepertoireState>,
    audience_link: RwLock<Option<AudienceLink>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    retry: Mutex<Option<JoinHandle<()>>>,
    retry_delay: Duration,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SetlistService {
    inner: Arc<Inner>,
}

impl SetlistService {
    /// Builds the service against the HTTP repertoire API.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let api = HttpRepertoireApi::new(
            config.http_client.clone(),
            config.secure_store.clone(),
            &config.api_root,
        )?;
        Self::bootstrap_with_api(config, Arc::new(api)).await
    }

    /// Builds the service against any [`RepertoireApi`].
    ///
    /// Loads the snapshot and pending queue, rebuilds the local view, starts
    /// the connectivity watcher and, when online, flushes and refreshes.
    #[instrument(skip_all, fields(api_root = %config.api_root))]
    pub async fn bootstrap_with_api(config: CoreConfig, api: Arc<dyn RepertoireApi>) -> Result<Self> {
        config.validate()?;

        let online_now = match &config.network_monitor {
            Some(monitor) => monitor.is_connected().await,
            None => true,
        };
        let (online, online_rx) = watch::channel(online_now);

        let store = SnapshotStore::new(config.settings_store.clone());
        let snapshot = store
            .load()
            .await
            .unwrap_or_else(|| OfflineSnapshot::empty(config.clock.now()));
        let queue = Arc::new(MutationQueue::load(store.clone()).await);

        let temp_ids = TempIdAllocator::new(config.clock.clone());
        for pending in queue.snapshot().await {
            if let Some(id) = pending.mutation.created_temp_id() {
                temp_ids.observe(id);
            }
        }

        let event_bus = EventBus::new(DEFAULT_EVENT_BUFFER_SIZE);
        let engine = SyncEngine::new(
            api.clone(),
            queue.clone(),
            store.clone(),
            event_bus.clone(),
            online_rx,
            config.clock.clone(),
            config.sync,
        );
        let realtime = RealtimeQueueClient::spawn(
            api.clone(),
            config.realtime_connector.clone(),
            event_bus.clone(),
            config.realtime_root.clone(),
            config.realtime,
            online_now,
        );

        let service = Self {
            inner: Arc::new(Inner {
                api,
                secure_store: config.secure_store.clone(),
                network_monitor: config.network_monitor.clone(),
                clock: config.clock.clone(),
                event_bus,
                store,
                queue,
                engine,
                realtime,
                temp_ids,
                confirmed_ids: Mutex::new(IdRemapper::new()),
                online,
                confirmed: Mutex::new(snapshot),
                state: RwLock::new(RepertoireState::new()),
                audience_link: RwLock::new(None),
                watcher: Mutex::new(None),
                retry: Mutex::new(None),
                retry_delay: config.sync.retry_delay,
            }),
        };

        service.rebuild().await;
        service.spawn_watcher().await;

        if online_now {
            service.catch_up().await;
        } else {
            service.retarget(service.active_setlist_id().await).await;
        }

        info!(
            online = online_now,
            pending = service.inner.queue.len().await,
            "Setlist service ready"
        );
        Ok(service)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    pub async fn songs(&self) -> Vec<Song> {
        self.inner.state.read().await.songs()
    }

    pub async fn setlists(&self) -> Vec<Setlist> {
        self.inner.state.read().await.setlists()
    }

    pub async fn active_setlist_id(&self) -> Option<SetlistId> {
        self.inner.state.read().await.active_setlist_id()
    }

    /// The selected setlist with its items, if they are known.
    pub async fn active_setlist(&self) -> Option<SetlistDetail> {
        let state = self.inner.state.read().await;
        state.active_setlist_id().and_then(|id| state.detail(id))
    }

    pub async fn active_items(&self) -> Vec<SetlistItem> {
        self.active_setlist()
            .await
            .map(|detail| detail.items)
            .unwrap_or_default()
    }

    pub async fn setlist_items(&self, id: SetlistId) -> Vec<SetlistItem> {
        self.inner.state.read().await.items(id)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.len().await
    }

    pub async fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.inner.queue.snapshot().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.realtime.connection_state()
    }

    pub fn audience_requests(&self) -> Vec<AudienceRequest> {
        self.inner.realtime.requests()
    }

    pub async fn audience_link(&self) -> Option<AudienceLink> {
        self.inner.audience_link.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Edits that work offline
    // ------------------------------------------------------------------

    pub async fn create_song(&self, title: &str, artist: &str) -> Result<Song> {
        let title = require_text("title", title)?;
        let artist = require_text("artist", artist)?;

        let (route, _) = self.route().await;
        if route == Route::Server {
            match self.inner.api.create_song(&title, &artist).await {
                Ok(song) => {
                    self.commit_confirmed(|s| confirmed::record_song(s, &song)).await;
                    return Ok(song);
                }
                Err(e) => self.fallback_or_fail(e)?,
            }
        }

        let temp_song_id = self.inner.temp_ids.song_id();
        let ids = self
            .queue_edit(
                Mutation::CreateSong(CreateSongPayload {
                    temp_song_id,
                    title,
                    artist,
                }),
                route == Route::Queue { flush: true },
            )
            .await?;
        self.local_song(ids.song(temp_song_id)).await
    }

    pub async fn create_setlist(&self, name: &str) -> Result<Setlist> {
        let name = require_text("name", name)?;

        let (route, _) = self.route().await;
        if route == Route::Server {
            match self.inner.api.create_setlist(&name).await {
                Ok(setlist) => {
                    self.commit_confirmed(|s| confirmed::record_setlist(s, &setlist))
                        .await;
                    return Ok(setlist);
                }
                Err(e) => self.fallback_or_fail(e)?,
            }
        }

        let temp_setlist_id = self.inner.temp_ids.setlist_id();
        let ids = self
            .queue_edit(
                Mutation::CreateSetlist(CreateSetlistPayload {
                    temp_setlist_id,
                    name,
                }),
                route == Route::Queue { flush: true },
            )
            .await?;
        self.local_setlist(ids.setlist(temp_setlist_id)).await
    }

    pub async fn rename_setlist(&self, id: SetlistId, name: &str) -> Result<()> {
        let name = require_text("name", name)?;

        let (route, ids) = self.route().await;
        let id = ids.setlist(id);
        let route = route.unless_placeholder(id.is_temporary());
        if route == Route::Server {
            match self.inner.api.update_setlist(id, &name).await {
                Ok(setlist) => {
                    self.commit_confirmed(|s| confirmed::record_setlist(s, &setlist))
                        .await;
                    return Ok(());
                }
                Err(e) => self.fallback_or_fail(e)?,
            }
        }

        self.queue_edit(
            Mutation::RenameSetlist(RenameSetlistPayload {
                setlist_id: id,
                name,
            }),
            route == Route::Queue { flush: true },
        )
        .await?;
        Ok(())
    }

    pub async fn add_song_to_setlist(&self, setlist_id: SetlistId, song_id: SongId) -> Result<SetlistItem> {
        let (route, ids) = self.route().await;
        let (setlist_id, song_id) = (ids.setlist(setlist_id), ids.song(song_id));
        let route = route.unless_placeholder(setlist_id.is_temporary() || song_id.is_temporary());
        if route == Route::Server {
            match self.inner.api.add_setlist_item(setlist_id, song_id).await {
                Ok(item) => {
                    self.commit_confirmed(|s| confirmed::record_item(s, setlist_id, &item))
                        .await;
                    return Ok(item);
                }
                Err(e) => self.fallback_or_fail(e)?,
            }
        }

        let temp_item_id = self.inner.temp_ids.item_id();
        let ids = self
            .queue_edit(
                Mutation::AddSetlistItem(AddSetlistItemPayload {
                    setlist_id,
                    song_id,
                    temp_item_id,
                }),
                route == Route::Queue { flush: true },
            )
            .await?;

        let item_id = ids.item(temp_item_id);
        self.inner
            .state
            .read()
            .await
            .items(ids.setlist(setlist_id))
            .into_iter()
            .find(|item| item.id == item_id)
            .ok_or_else(|| LibraryError::not_found("setlist item", item_id).into())
    }

    /// Adds every selected song that is not already in the setlist, in
    /// selection order.
    pub async fn add_songs_to_setlist(
        &self,
        setlist_id: SetlistId,
        song_ids: &[SongId],
    ) -> Result<Vec<SetlistItem>> {
        let ids = self.confirmed_ids().await;
        let setlist_id = ids.setlist(setlist_id);
        let song_ids: Vec<SongId> = song_ids.iter().map(|&id| ids.song(id)).collect();
        let ready = {
            let state = self.inner.state.read().await;
            let available = filter_songs_not_in_setlist(&state.songs(), &state.items(setlist_id));
            ids_ready_to_add(&song_ids, &available)
        };

        let mut added = Vec::with_capacity(ready.len());
        for song_id in ready {
            added.push(self.add_song_to_setlist(setlist_id, song_id).await?);
        }
        Ok(added)
    }

    pub async fn remove_setlist_item(&self, item_id: ItemId) -> Result<()> {
        let (route, ids) = self.route().await;
        let item_id = ids.item(item_id);
        let route = route.unless_placeholder(item_id.is_temporary());
        if route == Route::Server {
            match self.inner.api.delete_setlist_item(item_id).await {
                Ok(()) => {
                    self.commit_confirmed(|s| confirmed::forget_item(s, item_id))
                        .await;
                    return Ok(());
                }
                Err(e) => self.fallback_or_fail(e)?,
            }
        }

        self.queue_edit(
            Mutation::DeleteSetlistItem(DeleteSetlistItemPayload { item_id }),
            route == Route::Queue { flush: true },
        )
        .await?;
        Ok(())
    }

    /// Puts the setlist's items in exactly the given order.
    pub async fn reorder_setlist(&self, setlist_id: SetlistId, item_ids: &[ItemId]) -> Result<Vec<SetlistItem>> {
        let (route, ids) = self.route().await;
        let setlist_id = ids.setlist(setlist_id);
        let item_ids: Vec<ItemId> = item_ids.iter().map(|&id| ids.item(id)).collect();
        let placeholder = setlist_id.is_temporary() || item_ids.iter().any(|id| id.is_temporary());
        let route = route.unless_placeholder(placeholder);
        if route == Route::Server {
            match self.inner.api.reorder_setlist(setlist_id, &item_ids).await {
                Ok(detail) => {
                    self.commit_confirmed(|s| confirmed::record_detail(s, &detail))
                        .await;
                    return Ok(detail.items);
                }
                Err(e) => self.fallback_or_fail(e)?,
            }
        }

        let ids = self
            .queue_edit(
                Mutation::ReorderSetlist(ReorderSetlistPayload {
                    setlist_id,
                    item_ids,
                }),
                route == Route::Queue { flush: true },
            )
            .await?;
        Ok(self.setlist_items(ids.setlist(setlist_id)).await)
    }

    /// Moves one item a single slot up or down. At an edge nothing changes.
    pub async fn move_item(
        &self,
        setlist_id: SetlistId,
        item_id: ItemId,
        direction: MoveDirection,
    ) -> Result<Vec<SetlistItem>> {
        let ids = self.confirmed_ids().await;
        let (setlist_id, item_id) = (ids.setlist(setlist_id), ids.item(item_id));
        let order = self
            .inner
            .state
            .read()
            .await
            .moved_order(setlist_id, item_id, direction)?;
        match order {
            Some(order) => self.reorder_setlist(setlist_id, &order).await,
            None => Ok(self.setlist_items(setlist_id).await),
        }
    }

    // ------------------------------------------------------------------
    // Edits that need the server
    // ------------------------------------------------------------------

    pub async fn delete_setlist(&self, id: SetlistId) -> Result<()> {
        if !self.is_online() {
            return Err(ServiceError::offline("Deleting a setlist"));
        }
        // Queued edits go first
        let (_, ids) = self.route().await;
        let id = ids.setlist(id);
        if id.is_temporary() {
            return Err(LibraryError::invalid("setlist_id", "Setlist has not been synced yet").into());
        }

        self.inner.api.delete_setlist(id).await?;
        let was_active = self.active_setlist_id().await == Some(id);
        self.commit_confirmed(|s| confirmed::forget_setlist(s, id))
            .await;

        if was_active {
            *self.inner.audience_link.write().await = None;
            self.emit_active_changed(None);
            self.retarget(None).await;
        }
        Ok(())
    }

    pub async fn update_song(&self, id: SongId, patch: &SongPatch) -> Result<Song> {
        patch.validate()?;
        if !self.is_online() {
            return Err(ServiceError::offline("Editing a song"));
        }
        let (_, ids) = self.route().await;
        let id = ids.song(id);
        if id.is_temporary() {
            return Err(LibraryError::invalid("song_id", "Song has not been synced yet").into());
        }

        let song = self.inner.api.update_song(id, patch).await?;
        self.commit_confirmed(|s| confirmed::record_song(s, &song))
            .await;
        Ok(song)
    }

    pub async fn search_songs(&self, query: &SongQuery) -> Result<SongPage> {
        if !self.is_online() {
            return Err(ServiceError::offline("Searching songs"));
        }
        Ok(self.inner.api.list_songs(query).await?)
    }

    // ------------------------------------------------------------------
    // Selection, connectivity and sync
    // ------------------------------------------------------------------

    /// Makes `id` the active setlist, persists the choice and points the
    /// realtime client at it.
    #[instrument(skip(self))]
    pub async fn select_setlist(&self, id: Option<SetlistId>) -> Result<()> {
        let id = match id {
            Some(id) => Some(self.confirmed_ids().await.setlist(id)),
            None => None,
        };
        {
            let mut state = self.inner.state.write().await;
            if let Some(id) = id {
                if state.setlist(id).is_none() {
                    return Err(LibraryError::not_found("setlist", id).into());
                }
            }
            state.set_active_setlist(id);
        }
        self.inner.confirmed.lock().await.active_setlist_id = id;
        self.inner
            .store
            .save_active(id, self.inner.clock.now())
            .await?;
        *self.inner.audience_link.write().await = None;
        self.emit_active_changed(id);

        if let Some(id) = id {
            self.load_active(id).await;
        }
        self.retarget(id).await;
        Ok(())
    }

    /// Updates the connectivity signal. Coming back online flushes the queue
    /// and refreshes the view.
    pub async fn set_online(&self, online: bool) -> Result<()> {
        let was_online = self.inner.online.send_replace(online);
        if was_online == online {
            return Ok(());
        }

        info!(online, "Connectivity changed");
        self.inner.realtime.set_online(online).await?;
        if online {
            self.catch_up().await;
        }
        Ok(())
    }

    /// Sends queued edits to the server.
    pub async fn flush(&self) -> Result<FlushReport> {
        let active = self.active_setlist_id().await;
        let report = self.inner.engine.flush(active).await?;
        self.absorb(&report, active).await;

        let stalled = report.halted_on_connectivity
            || report.outcome == FlushOutcome::AlreadyRunning;
        if stalled && self.is_online() {
            self.schedule_retry().await;
        }
        Ok(report)
    }

    /// Re-reads the server view.
    pub async fn refresh(&self) -> Result<()> {
        if !self.is_online() {
            return Err(ServiceError::offline("Refreshing"));
        }

        let active = self.active_setlist_id().await;
        let snapshot = self.inner.engine.refresh(active).await?;
        let mut confirmed = self.inner.confirmed.lock().await;
        *confirmed = snapshot;
        self.rebuild_from(&confirmed).await;
        Ok(())
    }

    /// Re-reads the audience requests of the active setlist.
    pub async fn refresh_requests(&self) -> Result<()> {
        Ok(self.inner.realtime.refresh().await?)
    }

    /// Stops background work. The service must not be used afterwards.
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.inner.watcher.lock().await.take() {
            watcher.abort();
        }
        if let Some(retry) = self.inner.retry.lock().await.take() {
            retry.abort();
        }
        self.inner.realtime.shutdown().await;
        info!("Setlist service stopped");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Picks the route for an edit, sending anything already queued first.
    ///
    /// Also returns every placeholder confirmed so far, so callers can swap
    /// ids they were handed before a flush.
    async fn route(&self) -> (Route, IdRemapper) {
        let route = if !self.is_online() {
            Route::Queue { flush: false }
        } else if self.inner.queue.is_empty().await {
            Route::Server
        } else {
            if let Err(e) = self.flush().await {
                debug!(error = %e, "Flush before edit failed");
            }
            if self.inner.queue.is_empty().await {
                Route::Server
            } else {
                Route::Queue { flush: true }
            }
        };
        (route, self.confirmed_ids().await)
    }

    async fn confirmed_ids(&self) -> IdRemapper {
        self.inner.confirmed_ids.lock().await.clone()
    }

    /// Arms a single delayed flush unless one is already waiting.
    async fn schedule_retry(&self) {
        let mut slot = self.inner.retry.lock().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let delay = self.inner.retry_delay;
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling flush retry");
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                retry_flush(SetlistService { inner }).await;
            }
        }));
    }

    /// Connectivity failures fall through to the queue; anything else is
    /// returned to the caller.
    fn fallback_or_fail(&self, error: LibraryError) -> Result<()> {
        if error.is_connectivity() {
            debug!(error = %error, "Server unreachable, queueing edit");
            Ok(())
        } else {
            Err(error.into())
        }
    }

    /// Applies `mutation` to the view and queues it. The view is left
    /// untouched if either step fails.
    ///
    /// Returns every placeholder confirmed so far, including by the
    /// follow-up flush.
    async fn queue_edit(&self, mutation: Mutation, flush: bool) -> Result<IdRemapper> {
        let kind = mutation.kind();
        {
            let mut state = self.inner.state.write().await;
            let mut next = state.clone();
            mutation.apply_to(&mut next, self.inner.clock.now())?;
            let pending = self.inner.queue.enqueue(mutation).await?;
            *state = next;

            self.inner
                .event_bus
                .emit(CoreEvent::Sync(SyncEvent::MutationQueued {
                    mutation_id: pending.id,
                    kind: kind.to_string(),
                    pending: self.inner.queue.len().await,
                }))
                .ok();
        }

        if flush {
            if let Err(e) = self.flush().await {
                debug!(error = %e, "Flush after queueing failed");
            }
        } else if self.is_online() {
            // Online but the server was unreachable
            self.schedule_retry().await;
        }
        Ok(self.confirmed_ids().await)
    }

    async fn local_song(&self, id: SongId) -> Result<Song> {
        self.inner
            .state
            .read()
            .await
            .song(id)
            .cloned()
            .ok_or_else(|| LibraryError::not_found("song", id).into())
    }

    async fn local_setlist(&self, id: SetlistId) -> Result<Setlist> {
        self.inner
            .state
            .read()
            .await
            .setlist(id)
            .cloned()
            .ok_or_else(|| LibraryError::not_found("setlist", id).into())
    }

    async fn rebuild(&self) {
        let confirmed = self.inner.confirmed.lock().await;
        self.rebuild_from(&confirmed).await;
    }

    /// Replaces the view with `confirmed` plus every queued edit.
    async fn rebuild_from(&self, confirmed: &OfflineSnapshot) {
        let mut state = self.inner.state.write().await;
        let mut next = confirmed.to_state();
        let now = self.inner.clock.now();
        for pending in self.inner.queue.snapshot().await {
            if let Err(e) = pending.mutation.apply_to(&mut next, now) {
                debug!(
                    mutation_id = %pending.id,
                    kind = pending.mutation.kind(),
                    error = %e,
                    "Queued edit no longer applies to the view"
                );
            }
        }
        *state = next;
    }

    /// Saves a server response into the confirmed snapshot and rebuilds.
    async fn commit_confirmed<F>(&self, update: F)
    where
        F: FnOnce(&mut OfflineSnapshot),
    {
        let mut confirmed = self.inner.confirmed.lock().await;
        update(&mut confirmed);
        confirmed.updated_at = self.inner.clock.now();
        if let Err(e) = self.inner.store.save(&confirmed).await {
            warn!(error = %e, "Failed to save offline snapshot");
        }
        self.rebuild_from(&confirmed).await;
    }

    /// Folds a flush result into the view.
    async fn absorb(&self, report: &FlushReport, active_before: Option<SetlistId>) {
        self.inner.confirmed_ids.lock().await.merge(&report.ids);

        if let Some(snapshot) = &report.snapshot {
            let mut confirmed = self.inner.confirmed.lock().await;
            *confirmed = snapshot.clone();
            self.rebuild_from(&confirmed).await;
        } else if !report.ids.is_empty() {
            // The refresh failed: keep the view and swap in confirmed ids
            let mut confirmed = self.inner.confirmed.lock().await;
            confirmed.active_setlist_id = confirmed
                .active_setlist_id
                .map(|id| report.ids.setlist(id));

            let mut state = self.inner.state.write().await;
            for (temp, real) in report.ids.pairs(ResourceKind::Song) {
                state.remap_song(SongId(temp), SongId(real));
            }
            for (temp, real) in report.ids.pairs(ResourceKind::Setlist) {
                state.remap_setlist(SetlistId(temp), SetlistId(real));
            }
            for (temp, real) in report.ids.pairs(ResourceKind::Item) {
                state.remap_item(ItemId(temp), ItemId(real));
            }
        }

        let active_after = self.active_setlist_id().await;
        if active_after != active_before {
            if let Err(e) = self
                .inner
                .store
                .save_active(active_after, self.inner.clock.now())
                .await
            {
                warn!(error = %e, "Failed to save active setlist");
            }
            *self.inner.audience_link.write().await = None;
            self.emit_active_changed(active_after);
            if let Some(id) = active_after {
                self.load_active(id).await;
            }
            self.retarget(active_after).await;
        }
    }

    /// Flushes, refreshes and follows the active setlist, logging failures.
    async fn catch_up(&self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Flush failed");
        }
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Refresh failed");
        }
        self.follow_active().await;
    }

    /// Fetches the active setlist's link when it is missing, then points the
    /// realtime client at it.
    async fn follow_active(&self) {
        let active = self.active_setlist_id().await;
        if let Some(id) = active {
            if self.linked_token(id).await.is_none() {
                self.load_active(id).await;
            }
        }
        self.retarget(active).await;
    }

    /// Token of the loaded audience link, if it belongs to `id`.
    async fn linked_token(&self, id: SetlistId) -> Option<String> {
        self.inner
            .audience_link
            .read()
            .await
            .as_ref()
            .filter(|link| link.setlist_id == id && !link.token.trim().is_empty())
            .map(|link| link.token.clone())
    }

    /// Fetches the items and audience link of a confirmed setlist.
    async fn load_active(&self, id: SetlistId) {
        if id.is_temporary() || !self.is_online() {
            return;
        }

        let loaded = self.inner.state.read().await.detail(id).is_some();
        if !loaded {
            match self.inner.api.get_setlist(id).await {
                Ok(detail) => {
                    self.commit_confirmed(|s| confirmed::record_detail(s, &detail))
                        .await
                }
                Err(e) => warn!(setlist_id = %id, error = %e, "Failed to load setlist"),
            }
        }

        match self.inner.api.get_audience_link(id).await {
            Ok(link) => *self.inner.audience_link.write().await = Some(link),
            Err(e) => debug!(setlist_id = %id, error = %e, "Audience link unavailable"),
        }
    }

    async fn access_token(&self) -> String {
        match self.inner.secure_store.get_secret(ACCESS_TOKEN_KEY).await {
            Ok(Some(bytes)) => String::from_utf8(bytes).unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                String::new()
            }
        }
    }

    /// Points the realtime client at `id`.
    ///
    /// The channel is opened only once the setlist's audience link is known;
    /// until then its requests are polled. Placeholders are not followed.
    async fn retarget(&self, id: Option<SetlistId>) {
        let id = id.filter(|id| !id.is_temporary());
        let linked = match id {
            Some(id) => self.linked_token(id).await.is_some(),
            None => false,
        };

        let result = match id {
            Some(id) if linked => {
                let target = RealtimeTarget::new(id, self.access_token().await);
                self.inner.realtime.set_target(Some(target)).await
            }
            Some(id) => self.inner.realtime.follow_setlist(Some(id)).await,
            None => self.inner.realtime.set_target(None).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to retarget realtime client");
        }
    }

    fn emit_active_changed(&self, id: Option<SetlistId>) {
        self.inner
            .event_bus
            .emit(CoreEvent::Repertoire(RepertoireEvent::ActiveSetlistChanged {
                setlist_id: id.map(|id| id.0),
            }))
            .ok();
    }

    async fn spawn_watcher(&self) {
        let Some(monitor) = self.inner.network_monitor.clone() else {
            return;
        };
        let mut changes = match monitor.subscribe_changes().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "Connectivity changes unavailable");
                return;
            }
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(info) = changes.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let service = SetlistService { inner };
                if let Err(e) = service.set_online(info.is_online()).await {
                    warn!(error = %e, "Failed to apply connectivity change");
                }
            }
            debug!("Connectivity watcher stopped");
        });
        *self.inner.watcher.lock().await = Some(handle);
    }
}

/// Runs a delayed flush if edits are still waiting.
///
/// Boxed so the retry task does not make `flush` a recursive future type.
fn retry_flush(service: SetlistService) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        // Clear the slot so this flush can arm the next retry
        service.inner.retry.lock().await.take();
        if !service.is_online() || service.inner.queue.is_empty().await {
            return;
        }
        if let Err(e) = service.flush().await {
            debug!(error = %e, "Flush retry failed");
        }
    })
}

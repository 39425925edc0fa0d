//! Integration tests for the offline flush cycle
//!
//! These tests drive `SyncEngine` against an in-memory repertoire server and
//! a SQLite-backed settings store, verifying:
//! - FIFO replay with temporary id resolution
//! - Halting on connectivity failures without losing order
//! - Dropping rejected changes while continuing the cycle
//! - Keeping changes whose placeholders were never confirmed
//! - Refreshing and saving the snapshot afterwards

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bridge_desktop::SqliteSettingsStore;
use bridge_traits::error::BridgeError;
use bridge_traits::time::SystemClock;
use chrono::Utc;
use core_library::{
    AudienceLink, AudienceQueue, AudienceRequest, ItemId, LibraryError, PublicSetlist,
    RepertoireApi, Result, SetlistDetail, SetlistId, Setlist, SetlistItem, Song, SongId, SongPage,
    SongPatch, SongQuery,
};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    AddSetlistItemPayload, CreateSetlistPayload, CreateSongPayload, DeleteSetlistItemPayload,
    FlushOutcome, Mutation, MutationQueue, RenameSetlistPayload, ReorderSetlistPayload,
    SnapshotStore, SyncEngine, SYNCED_MESSAGE,
};
use tokio::sync::{broadcast, watch};

// ============================================================================
// In-memory repertoire server
// ============================================================================

#[derive(Clone, Copy)]
enum Failure {
    Connectivity,
    Rejected(u16),
}

#[derive(Default)]
struct ServerState {
    songs: Vec<Song>,
    setlists: Vec<SetlistDetail>,
    next_id: i64,
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<Failure>>,
}

struct FakeRepertoireApi {
    state: Mutex<ServerState>,
}

impl FakeRepertoireApi {
    fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                next_id: 100,
                ..Default::default()
            }),
        }
    }

    fn fail_next(&self, call: &'static str, failure: Failure) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(call).or_default().push_back(failure);
    }

    fn seed_setlist(&self, name: &str) -> SetlistId {
        let mut state = self.state.lock().unwrap();
        let id = SetlistId(state.next_id);
        state.next_id += 1;
        state
            .setlists
            .push(SetlistDetail::from(Setlist::placeholder(id, name, Utc::now())));
        id
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn setlist(&self, id: SetlistId) -> Option<SetlistDetail> {
        let state = self.state.lock().unwrap();
        state.setlists.iter().find(|s| s.id == id).cloned()
    }

    /// Logs the call and returns the injected failure, if any.
    fn enter(&self, call: &'static str, args: String) -> Result<std::sync::MutexGuard<'_, ServerState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{}({})", call, args));
        match state.failures.get_mut(call).and_then(|f| f.pop_front()) {
            Some(Failure::Connectivity) => Err(LibraryError::Connectivity(BridgeError::Network(
                "connection refused".to_string(),
            ))),
            Some(Failure::Rejected(status)) => Err(LibraryError::Rejected {
                status,
                message: format!("{} rejected", call),
            }),
            None => Ok(state),
        }
    }
}

fn not_found(what: &str) -> LibraryError {
    LibraryError::Rejected {
        status: 404,
        message: format!("{} not found.", what),
    }
}

fn renumber(items: &mut [SetlistItem]) {
    for (index, item) in items.iter_mut().enumerate() {
        item.position = index as u32 + 1;
    }
}

#[async_trait]
impl RepertoireApi for FakeRepertoireApi {
    async fn list_songs(&self, _query: &SongQuery) -> Result<SongPage> {
        let state = self.enter("list_songs", String::new())?;
        Ok(SongPage::from_items(state.songs.clone()))
    }

    async fn create_song(&self, title: &str, artist: &str) -> Result<Song> {
        let mut state = self.enter("create_song", title.to_string())?;
        let id = SongId(state.next_id);
        state.next_id += 1;
        let song = Song::placeholder(id, title, artist, Utc::now());
        state.songs.push(song.clone());
        Ok(song)
    }

    async fn update_song(&self, id: SongId, _patch: &SongPatch) -> Result<Song> {
        let _state = self.enter("update_song", id.to_string())?;
        Err(not_found("Song"))
    }

    async fn list_setlists(&self) -> Result<Vec<Setlist>> {
        let state = self.enter("list_setlists", String::new())?;
        Ok(state.setlists.iter().map(SetlistDetail::summary).collect())
    }

    async fn create_setlist(&self, name: &str) -> Result<Setlist> {
        let mut state = self.enter("create_setlist", name.to_string())?;
        let setlist = Setlist::placeholder(SetlistId(state.next_id), name, Utc::now());
        state.next_id += 1;
        state.setlists.push(SetlistDetail::from(setlist.clone()));
        Ok(setlist)
    }

    async fn get_setlist(&self, id: SetlistId) -> Result<SetlistDetail> {
        let state = self.enter("get_setlist", id.to_string())?;
        state
            .setlists
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| not_found("Setlist"))
    }

    async fn update_setlist(&self, id: SetlistId, name: &str) -> Result<Setlist> {
        let mut state = self.enter("update_setlist", format!("{},{}", id, name))?;
        let setlist = state
            .setlists
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found("Setlist"))?;
        setlist.name = name.to_string();
        Ok(setlist.summary())
    }

    async fn delete_setlist(&self, id: SetlistId) -> Result<()> {
        let mut state = self.enter("delete_setlist", id.to_string())?;
        state.setlists.retain(|s| s.id != id);
        Ok(())
    }

    async fn add_setlist_item(&self, setlist_id: SetlistId, song_id: SongId) -> Result<SetlistItem> {
        let mut state = self.enter("add_setlist_item", format!("{},{}", setlist_id, song_id))?;
        let song = state
            .songs
            .iter()
            .find(|s| s.id == song_id)
            .cloned()
            .ok_or_else(|| not_found("Song"))?;
        let id = ItemId(state.next_id);
        state.next_id += 1;
        let setlist = state
            .setlists
            .iter_mut()
            .find(|s| s.id == setlist_id)
            .ok_or_else(|| not_found("Setlist"))?;
        let item = SetlistItem {
            id,
            position: setlist.items.len() as u32 + 1,
            song,
        };
        setlist.items.push(item.clone());
        Ok(item)
    }

    async fn delete_setlist_item(&self, item_id: ItemId) -> Result<()> {
        let mut state = self.enter("delete_setlist_item", item_id.to_string())?;
        let setlist = state
            .setlists
            .iter_mut()
            .find(|s| s.items.iter().any(|i| i.id == item_id))
            .ok_or_else(|| not_found("Item"))?;
        setlist.items.retain(|i| i.id != item_id);
        renumber(&mut setlist.items);
        Ok(())
    }

    async fn reorder_setlist(&self, setlist_id: SetlistId, item_ids: &[ItemId]) -> Result<SetlistDetail> {
        let joined: Vec<String> = item_ids.iter().map(ItemId::to_string).collect();
        let mut state = self.enter(
            "reorder_setlist",
            format!("{},[{}]", setlist_id, joined.join(",")),
        )?;
        let setlist = state
            .setlists
            .iter_mut()
            .find(|s| s.id == setlist_id)
            .ok_or_else(|| not_found("Setlist"))?;
        setlist
            .items
            .sort_by_key(|item| item_ids.iter().position(|id| *id == item.id));
        renumber(&mut setlist.items);
        Ok(setlist.clone())
    }

    async fn get_audience_link(&self, _setlist_id: SetlistId) -> Result<AudienceLink> {
        Err(not_found("Audience link"))
    }

    async fn list_audience_requests(&self, _setlist_id: SetlistId) -> Result<AudienceQueue> {
        Err(not_found("Requests"))
    }

    async fn get_public_setlist(&self, _token: &str) -> Result<PublicSetlist> {
        Err(not_found("Setlist"))
    }

    async fn create_public_request(
        &self,
        _token: &str,
        _song_name: &str,
        _requester_name: Option<&str>,
    ) -> Result<AudienceRequest> {
        Err(not_found("Setlist"))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: SyncEngine,
    api: Arc<FakeRepertoireApi>,
    queue: Arc<MutationQueue>,
    store: SnapshotStore,
    events: broadcast::Receiver<CoreEvent>,
    _online: watch::Sender<bool>,
}

async fn harness(online: bool) -> Harness {
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let store = SnapshotStore::new(settings);
    let queue = Arc::new(MutationQueue::load(store.clone()).await);
    let api = Arc::new(FakeRepertoireApi::new());
    let event_bus = EventBus::new(64);
    let events = event_bus.subscribe();
    let (online_tx, online_rx) = watch::channel(online);

    let engine = SyncEngine::new(
        api.clone(),
        queue.clone(),
        store.clone(),
        event_bus,
        online_rx,
        Arc::new(SystemClock),
        SyncSettings::default(),
    );

    Harness {
        engine,
        api,
        queue,
        store,
        events,
        _online: online_tx,
    }
}

fn drain_sync_events(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Sync(event) = event {
            events.push(event);
        }
    }
    events
}

fn create_setlist(temp: i64, name: &str) -> Mutation {
    Mutation::CreateSetlist(CreateSetlistPayload {
        temp_setlist_id: SetlistId(temp),
        name: name.to_string(),
    })
}

fn create_song(temp: i64, title: &str) -> Mutation {
    Mutation::CreateSong(CreateSongPayload {
        temp_song_id: SongId(temp),
        title: title.to_string(),
        artist: "House Band".to_string(),
    })
}

fn add_item(setlist: i64, song: i64, temp_item: i64) -> Mutation {
    Mutation::AddSetlistItem(AddSetlistItemPayload {
        setlist_id: SetlistId(setlist),
        song_id: SongId(song),
        temp_item_id: ItemId(temp_item),
    })
}

fn rename(setlist: i64, name: &str) -> Mutation {
    Mutation::RenameSetlist(RenameSetlistPayload {
        setlist_id: SetlistId(setlist),
        name: name.to_string(),
    })
}

fn reorder(setlist: i64, items: &[i64]) -> Mutation {
    Mutation::ReorderSetlist(ReorderSetlistPayload {
        setlist_id: SetlistId(setlist),
        item_ids: items.iter().copied().map(ItemId).collect(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_flush_replays_in_order_with_resolved_ids() {
    let mut h = harness(true).await;
    for mutation in [
        create_setlist(-1, "Gig"),
        create_song(-2, "Jolene"),
        create_song(-3, "Valerie"),
        add_item(-1, -2, -4),
        add_item(-1, -3, -5),
        reorder(-1, &[-5, -4]),
        Mutation::DeleteSetlistItem(DeleteSetlistItemPayload { item_id: ItemId(-4) }),
        rename(-1, "Big gig"),
    ] {
        h.queue.enqueue(mutation).await.unwrap();
    }

    let report = h.engine.flush(Some(SetlistId(-1))).await.unwrap();

    assert_eq!(report.outcome, FlushOutcome::Completed);
    assert_eq!(report.applied, 8);
    assert_eq!(report.remaining, 0);
    assert_eq!(report.message.as_deref(), Some(SYNCED_MESSAGE));
    assert!(h.queue.is_empty().await);
    assert!(h.store.load_pending().await.is_empty());

    let writes: Vec<String> = h
        .api
        .calls()
        .into_iter()
        .take_while(|call| !call.starts_with("list_songs"))
        .collect();
    assert_eq!(
        writes,
        vec![
            "create_setlist(Gig)",
            "create_song(Jolene)",
            "create_song(Valerie)",
            "add_setlist_item(100,101)",
            "add_setlist_item(100,102)",
            "reorder_setlist(100,[104,103])",
            "delete_setlist_item(103)",
            "update_setlist(100,Big gig)",
        ]
    );

    let server = h.api.setlist(SetlistId(100)).unwrap();
    assert_eq!(server.name, "Big gig");
    assert_eq!(server.items.len(), 1);
    assert_eq!(server.items[0].position, 1);

    let events = drain_sync_events(&mut h.events);
    assert!(matches!(events.first(), Some(SyncEvent::FlushStarted { pending: 8 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::FlushCompleted { applied: 8, .. })));
}

#[tokio::test]
async fn test_add_item_carries_server_setlist_id() {
    let h = harness(true).await;
    let existing = {
        let mut state = h.api.state.lock().unwrap();
        let song = Song::placeholder(SongId(7), "Creep", "Radiohead", Utc::now());
        state.songs.push(song);
        SongId(7)
    };
    h.queue.enqueue(create_setlist(-1, "Gig")).await.unwrap();
    h.queue.enqueue(add_item(-1, existing.0, -2)).await.unwrap();

    h.engine.flush(None).await.unwrap();

    assert_eq!(
        &h.api.calls()[..2],
        &["create_setlist(Gig)".to_string(), "add_setlist_item(100,7)".to_string()]
    );
}

#[tokio::test]
async fn test_empty_queue_makes_no_calls() {
    let h = harness(true).await;

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.outcome, FlushOutcome::Empty);
    assert!(report.outcome.is_skipped());
    assert!(h.api.calls().is_empty());
    assert!(h.store.load().await.is_none());
}

#[tokio::test]
async fn test_offline_flush_is_a_no_op() {
    let h = harness(false).await;
    h.queue.enqueue(create_setlist(-1, "Gig")).await.unwrap();

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.outcome, FlushOutcome::Offline);
    assert_eq!(report.remaining, 1);
    assert!(h.api.calls().is_empty());
    assert_eq!(h.queue.len().await, 1);
}

#[tokio::test]
async fn test_connectivity_failure_keeps_failed_change_and_rest() {
    let mut h = harness(true).await;
    let setlist = h.api.seed_setlist("Friday");

    h.queue.enqueue(rename(setlist.0, "A")).await.unwrap();
    let b = h.queue.enqueue(create_song(-1, "B")).await.unwrap();
    let c = h.queue.enqueue(rename(setlist.0, "C")).await.unwrap();
    h.api.fail_next("create_song", Failure::Connectivity);

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.outcome, FlushOutcome::Halted);
    assert!(report.halted_on_connectivity);
    assert_eq!(report.applied, 1);
    assert_eq!(report.remaining, 2);

    let left: Vec<String> = h.queue.snapshot().await.into_iter().map(|p| p.id).collect();
    assert_eq!(left, vec![b.id.clone(), c.id.clone()]);
    let persisted: Vec<String> = h.store.load_pending().await.into_iter().map(|p| p.id).collect();
    assert_eq!(persisted, vec![b.id, c.id]);

    let calls = h.api.calls();
    assert!(!calls.iter().any(|call| call == &format!("update_setlist({},C)", setlist)));

    let events = drain_sync_events(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::FlushHalted { applied: 1, remaining: 2 })));
}

#[tokio::test]
async fn test_rejected_change_is_dropped_and_cycle_continues() {
    let mut h = harness(true).await;
    let setlist = h.api.seed_setlist("Friday");

    let a = h.queue.enqueue(rename(999, "Ghost")).await.unwrap();
    h.queue.enqueue(rename(setlist.0, "Saturday")).await.unwrap();

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.outcome, FlushOutcome::Completed);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.applied, 1);
    assert!(h.queue.is_empty().await);
    assert_eq!(h.api.setlist(setlist).unwrap().name, "Saturday");

    let events = drain_sync_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::MutationDropped { mutation_id, reason, .. }
            if *mutation_id == a.id && reason == "Setlist not found."
    )));
}

#[tokio::test]
async fn test_unresolvable_change_stays_queued() {
    let h = harness(true).await;
    let orphan = h.queue.enqueue(add_item(-50, 7, -51)).await.unwrap();

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.deferred, 1);
    assert_eq!(report.applied, 0);
    assert!(report.message.is_none());
    assert!(h.api.calls().is_empty());
    assert_eq!(h.queue.snapshot().await, vec![orphan]);
}

#[tokio::test]
async fn test_reorder_with_only_placeholders_is_dropped() {
    let h = harness(true).await;
    let setlist = h.api.seed_setlist("Friday");
    h.queue.enqueue(reorder(setlist.0, &[-9, -10])).await.unwrap();

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.dropped, 1);
    assert!(h.queue.is_empty().await);
    assert!(!h.api.calls().iter().any(|c| c.starts_with("reorder_setlist")));
}

#[tokio::test]
async fn test_leftovers_are_rewritten_with_confirmed_ids() {
    let h = harness(true).await;
    h.queue.enqueue(create_setlist(-1, "Gig")).await.unwrap();
    h.queue.enqueue(create_song(-2, "Jolene")).await.unwrap();
    h.queue.enqueue(add_item(-1, -2, -3)).await.unwrap();
    h.api.fail_next("create_song", Failure::Connectivity);

    h.engine.flush(None).await.unwrap();

    let left: Vec<Mutation> = h
        .store
        .load_pending()
        .await
        .into_iter()
        .map(|p| p.mutation)
        .collect();
    assert_eq!(left, vec![create_song(-2, "Jolene"), add_item(100, -2, -3)]);
}

#[tokio::test]
async fn test_snapshot_refreshed_after_flush() {
    let h = harness(true).await;
    h.queue.enqueue(create_setlist(-1, "Gig")).await.unwrap();
    h.queue.enqueue(create_song(-2, "Jolene")).await.unwrap();
    h.queue.enqueue(add_item(-1, -2, -3)).await.unwrap();

    let report = h.engine.flush(Some(SetlistId(-1))).await.unwrap();

    let snapshot = report.snapshot.expect("refreshed snapshot");
    assert_eq!(snapshot.active_setlist_id, Some(SetlistId(100)));
    assert_eq!(snapshot.songs.len(), 1);
    assert_eq!(snapshot.setlists.len(), 1);
    assert_eq!(snapshot.setlist_details_by_id[&SetlistId(100)].items.len(), 1);
    assert_eq!(h.store.load().await, Some(snapshot));
}

#[tokio::test]
async fn test_refresh_failure_does_not_fail_flush() {
    let h = harness(true).await;
    h.queue.enqueue(create_setlist(-1, "Gig")).await.unwrap();
    h.api.fail_next("list_songs", Failure::Connectivity);

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.applied, 1);
    assert!(report.snapshot.is_none());
    assert_eq!(report.message.as_deref(), Some(SYNCED_MESSAGE));
    assert_eq!(report.ids.setlist(SetlistId(-1)), SetlistId(100));
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_server_error_status_drops_change() {
    let h = harness(true).await;
    h.queue.enqueue(create_setlist(-1, "Gig")).await.unwrap();
    h.api.fail_next("create_setlist", Failure::Rejected(400));

    let report = h.engine.flush(None).await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.outcome, FlushOutcome::Completed);
    assert!(h.queue.is_empty().await);
}

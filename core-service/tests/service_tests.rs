//! Integration tests for `SetlistService`
//!
//! The service runs against an in-memory repertoire server, a SQLite-backed
//! settings store and a realtime connector whose channels never deliver
//! anything but record the URLs they were opened with. Connectivity is
//! driven explicitly through `set_online` or a scripted network monitor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_desktop::SqliteSettingsStore;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkType};
use bridge_traits::realtime::{RealtimeChannel, RealtimeConnector};
use bridge_traits::storage::{SecureStore, SettingsStore};
use chrono::Utc;
use core_library::{
    AudienceLink, AudienceQueue, AudienceRequest, ItemId, LibraryError, MoveDirection,
    PublicSetlist, RepertoireApi, Result, SetlistDetail, SetlistId, Setlist, SetlistItem, Song,
    SongId, SongPage, SongPatch, SongQuery,
};
use core_runtime::config::{CoreConfig, CoreConfigBuilder};
use core_service::{ConnectionState, ServiceError, SetlistService};
use mockall::mock;
use tokio::sync::mpsc;

// ============================================================================
// Bridges
// ============================================================================

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

mock! {
    Secrets {}

    #[async_trait]
    impl SecureStore for Secrets {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()>;
        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>>;
        async fn delete_secret(&self, key: &str) -> BridgeResult<()>;
    }
}

struct SilentChannel;

#[async_trait]
impl RealtimeChannel for SilentChannel {
    async fn next_text(&mut self) -> Option<BridgeResult<String>> {
        std::future::pending().await
    }

    async fn close(&mut self) -> BridgeResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct SilentConnector {
    urls: Mutex<Vec<String>>,
}

impl SilentConnector {
    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeConnector for SilentConnector {
    async fn connect(&self, url: &str) -> BridgeResult<Box<dyn RealtimeChannel>> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(Box::new(SilentChannel))
    }
}

/// Reports a fixed initial status, then whatever the test pushes.
struct ScriptedNetwork {
    initially_online: bool,
    changes: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
}

struct ScriptedChanges(mpsc::UnboundedReceiver<NetworkInfo>);

#[async_trait]
impl NetworkChangeStream for ScriptedChanges {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

#[async_trait]
impl NetworkMonitor for ScriptedNetwork {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(if self.initially_online {
            NetworkInfo::connected(NetworkType::WiFi)
        } else {
            NetworkInfo::disconnected()
        })
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        let changes = self
            .changes
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BridgeError::NotAvailable("already subscribed".to_string()))?;
        Ok(Box::new(ScriptedChanges(changes)))
    }
}

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
    failures: Vec<(&'static str, Failure)>,
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
        self.state.lock().unwrap().failures.push((call, failure));
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&format!("{}(", call)))
            .count()
    }

    fn setlist(&self, id: SetlistId) -> Option<SetlistDetail> {
        let state = self.state.lock().unwrap();
        state.setlists.iter().find(|s| s.id == id).cloned()
    }

    fn enter(&self, call: &'static str, args: String) -> Result<std::sync::MutexGuard<'_, ServerState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{}({})", call, args));
        let failure = state
            .failures
            .iter()
            .position(|(name, _)| *name == call)
            .map(|index| state.failures.remove(index).1);
        match failure {
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
    async fn list_songs(&self, query: &SongQuery) -> Result<SongPage> {
        let state = self.enter("list_songs", String::new())?;
        let needle = query.search.clone().unwrap_or_default().to_lowercase();
        let songs = state
            .songs
            .iter()
            .filter(|s| s.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Ok(SongPage::from_items(songs))
    }

    async fn create_song(&self, title: &str, artist: &str) -> Result<Song> {
        let mut state = self.enter("create_song", title.to_string())?;
        let id = SongId(state.next_id);
        state.next_id += 1;
        let song = Song::placeholder(id, title, artist, Utc::now());
        state.songs.push(song.clone());
        Ok(song)
    }

    async fn update_song(&self, id: SongId, patch: &SongPatch) -> Result<Song> {
        let mut state = self.enter("update_song", id.to_string())?;
        let song = state
            .songs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found("Song"))?;
        if let Some(title) = &patch.title {
            song.title = title.clone();
        }
        Ok(song.clone())
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

    async fn get_audience_link(&self, setlist_id: SetlistId) -> Result<AudienceLink> {
        let _state = self.enter("get_audience_link", setlist_id.to_string())?;
        Ok(AudienceLink {
            setlist_id,
            token: "aud-token".to_string(),
            public_url: format!("https://setlists.example.com/r/{}", setlist_id),
            is_active: true,
        })
    }

    async fn list_audience_requests(&self, setlist_id: SetlistId) -> Result<AudienceQueue> {
        let _state = self.enter("list_audience_requests", setlist_id.to_string())?;
        Ok(AudienceQueue {
            setlist_id,
            count: 0,
            items: Vec::new(),
        })
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
    service: SetlistService,
    api: Arc<FakeRepertoireApi>,
    settings: Arc<dyn SettingsStore>,
    connector: Arc<SilentConnector>,
}

fn config(settings: Arc<dyn SettingsStore>, network: Option<Arc<dyn NetworkMonitor>>) -> CoreConfig {
    builder(settings, network, Arc::new(SilentConnector::default()))
        .build()
        .unwrap()
}

fn builder(
    settings: Arc<dyn SettingsStore>,
    network: Option<Arc<dyn NetworkMonitor>>,
    connector: Arc<SilentConnector>,
) -> CoreConfigBuilder {
    let mut secrets = MockSecrets::new();
    secrets
        .expect_get_secret()
        .returning(|_| Ok(Some(b"access-token".to_vec())));

    let mut builder = CoreConfig::builder()
        .api_root("http://localhost:8000/api")
        .http_client(Arc::new(MockHttp::new()))
        .secure_store(Arc::new(secrets))
        .settings_store(settings)
        .realtime_connector(connector);
    if let Some(network) = network {
        builder = builder.network_monitor(network);
    }
    builder
}

fn offline_network() -> Arc<dyn NetworkMonitor> {
    Arc::new(ScriptedNetwork {
        initially_online: false,
        changes: Mutex::new(None),
    })
}

async fn harness_with(
    api: Arc<FakeRepertoireApi>,
    settings: Arc<dyn SettingsStore>,
    online: bool,
) -> Harness {
    let network = if online { None } else { Some(offline_network()) };
    let connector = Arc::new(SilentConnector::default());
    let config = builder(settings.clone(), network, connector.clone())
        .build()
        .unwrap();
    let service = SetlistService::bootstrap_with_api(config, api.clone())
        .await
        .unwrap();
    Harness {
        service,
        api,
        settings,
        connector,
    }
}

async fn harness(online: bool) -> Harness {
    let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    harness_with(Arc::new(FakeRepertoireApi::new()), settings, online).await
}

/// Polls until `check` holds or a second has passed.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn wait_for_state(service: &SetlistService, expected: ConnectionState) {
    let reached = eventually(move || async move { service.connection_state() == expected }).await;
    assert!(reached, "realtime state never became {}", expected);
}

fn item_songs(items: &[SetlistItem]) -> Vec<(u32, String)> {
    items
        .iter()
        .map(|item| (item.position, item.song.title.clone()))
        .collect()
}

// ============================================================================
// Offline edits
// ============================================================================

#[tokio::test]
async fn test_offline_edits_are_queued_and_visible() {
    let h = harness(false).await;

    let setlist = h.service.create_setlist("Friday").await.unwrap();
    let song = h.service.create_song("Wonderwall", "Oasis").await.unwrap();
    let item = h
        .service
        .add_song_to_setlist(setlist.id, song.id)
        .await
        .unwrap();

    assert!(setlist.id.is_temporary());
    assert!(song.id.is_temporary());
    assert!(item.id.is_temporary());
    assert_eq!(item.position, 1);
    assert_eq!(h.service.pending_count().await, 3);
    assert_eq!(h.service.setlist_items(setlist.id).await, vec![item]);
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn test_offline_edits_replay_when_back_online() {
    let h = harness(false).await;

    let setlist = h.service.create_setlist("Friday").await.unwrap();
    let song = h.service.create_song("Wonderwall", "Oasis").await.unwrap();
    h.service
        .add_song_to_setlist(setlist.id, song.id)
        .await
        .unwrap();
    h.service.select_setlist(Some(setlist.id)).await.unwrap();

    h.service.set_online(true).await.unwrap();

    assert_eq!(h.service.pending_count().await, 0);
    let server = h.api.setlist(SetlistId(100)).expect("setlist created");
    assert_eq!(server.name, "Friday");
    assert_eq!(server.items.len(), 1);
    assert_eq!(server.items[0].song.id, SongId(101));

    assert_eq!(h.service.active_setlist_id().await, Some(SetlistId(100)));
    let items = h.service.active_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, ItemId(102));
    assert!(h.service.songs().await.iter().all(|s| !s.id.is_temporary()));
}

#[tokio::test]
async fn test_online_only_operations_fail_offline() {
    let h = harness(false).await;

    assert!(matches!(
        h.service.delete_setlist(SetlistId(1)).await,
        Err(ServiceError::OfflineUnsupported { .. })
    ));
    assert!(matches!(
        h.service.search_songs(&SongQuery::default()).await,
        Err(ServiceError::OfflineUnsupported { .. })
    ));
    assert!(matches!(
        h.service.refresh().await,
        Err(ServiceError::OfflineUnsupported { .. })
    ));

    let patch = SongPatch {
        title: Some("Live Forever".to_string()),
        ..Default::default()
    };
    let err = h.service.update_song(SongId(1), &patch).await.unwrap_err();
    assert_eq!(err.user_message(), "Editing a song is not available offline");
}

#[tokio::test]
async fn test_blank_names_are_rejected_before_queueing() {
    let h = harness(false).await;

    assert!(h.service.create_setlist("   ").await.is_err());
    assert!(h.service.create_song("", "Oasis").await.is_err());
    assert_eq!(h.service.pending_count().await, 0);
}

// ============================================================================
// Online edits
// ============================================================================

#[tokio::test]
async fn test_online_edits_go_straight_to_server() {
    let h = harness(true).await;

    let setlist = h.service.create_setlist("Friday").await.unwrap();
    let song = h.service.create_song("Wonderwall", "Oasis").await.unwrap();
    let item = h
        .service
        .add_song_to_setlist(setlist.id, song.id)
        .await
        .unwrap();

    assert_eq!(setlist.id, SetlistId(100));
    assert_eq!(song.id, SongId(101));
    assert_eq!(item.id, ItemId(102));
    assert_eq!(h.service.pending_count().await, 0);
    assert_eq!(h.service.setlist_items(setlist.id).await, vec![item]);
}

#[tokio::test]
async fn test_connectivity_failure_falls_back_to_queue() {
    let h = harness(true).await;
    h.api.fail_next("create_song", Failure::Connectivity);

    let song = h.service.create_song("Wonderwall", "Oasis").await.unwrap();

    assert!(song.id.is_temporary());
    assert_eq!(h.service.pending_count().await, 1);
    assert!(h.service.songs().await.iter().any(|s| s.id == song.id));
}

#[tokio::test]
async fn test_rejected_online_edit_is_returned() {
    let h = harness(true).await;
    h.api.fail_next("create_setlist", Failure::Rejected(400));

    let err = h.service.create_setlist("Friday").await.unwrap_err();

    assert!(!err.is_connectivity());
    assert_eq!(h.service.pending_count().await, 0);
    assert!(h.service.setlists().await.is_empty());
}

#[tokio::test]
async fn test_edit_on_placeholder_flushes_immediately_when_online() {
    let h = harness(true).await;
    h.api.fail_next("create_setlist", Failure::Connectivity);
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    assert!(setlist.id.is_temporary());

    h.service
        .rename_setlist(setlist.id, "Friday Late")
        .await
        .unwrap();

    assert_eq!(h.service.pending_count().await, 0);
    assert_eq!(h.api.setlist(SetlistId(100)).unwrap().name, "Friday Late");
    let names: Vec<String> = h.service.setlists().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Friday Late".to_string()]);
}

#[tokio::test]
async fn test_add_songs_skips_those_already_present() {
    let h = harness(true).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    let a = h.service.create_song("Alpha", "Band").await.unwrap();
    let b = h.service.create_song("Bravo", "Band").await.unwrap();
    h.service.add_song_to_setlist(setlist.id, a.id).await.unwrap();

    let added = h
        .service
        .add_songs_to_setlist(setlist.id, &[a.id, b.id])
        .await
        .unwrap();

    assert_eq!(added.len(), 1);
    assert_eq!(added[0].song.id, b.id);
    assert_eq!(h.api.count("add_setlist_item"), 2);
}

#[tokio::test]
async fn test_delete_active_setlist_clears_selection() {
    let h = harness(true).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    h.service.select_setlist(Some(setlist.id)).await.unwrap();
    assert!(h.service.audience_link().await.is_some());

    h.service.delete_setlist(setlist.id).await.unwrap();

    assert_eq!(h.service.active_setlist_id().await, None);
    assert!(h.service.audience_link().await.is_none());
    assert!(h.service.setlists().await.is_empty());
}

#[tokio::test]
async fn test_update_and_search_songs_online() {
    let h = harness(true).await;
    let song = h.service.create_song("Wonderwall", "Oasis").await.unwrap();

    let patch = SongPatch {
        title: Some("Live Forever".to_string()),
        ..Default::default()
    };
    let updated = h.service.update_song(song.id, &patch).await.unwrap();
    assert_eq!(updated.title, "Live Forever");
    assert_eq!(h.service.songs().await[0].title, "Live Forever");

    let page = h
        .service
        .search_songs(&SongQuery {
            search: Some("live".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_queued_edit_is_sent_before_next_direct_edit() {
    let h = harness(true).await;
    h.api.fail_next("create_song", Failure::Connectivity);

    let first = h.service.create_song("First", "Band").await.unwrap();
    assert!(first.id.is_temporary());
    let second = h.service.create_song("Second", "Band").await.unwrap();

    assert_eq!(h.service.pending_count().await, 0);
    assert_eq!(second.id, SongId(101));
    let creates: Vec<String> = h
        .api
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("create_song("))
        .collect();
    assert_eq!(
        creates,
        vec![
            "create_song(First)".to_string(),
            "create_song(First)".to_string(),
            "create_song(Second)".to_string(),
        ]
    );
    let titles: Vec<String> = h.service.songs().await.into_iter().map(|s| s.title).collect();
    assert!(titles.contains(&"First".to_string()));
    assert!(titles.contains(&"Second".to_string()));
}

#[tokio::test]
async fn test_placeholder_handed_out_before_a_flush_still_resolves() {
    let h = harness(true).await;
    h.api.fail_next("create_song", Failure::Connectivity);
    let song = h.service.create_song("Wonderwall", "Oasis").await.unwrap();

    // Sending the queued song first confirms it as 100
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    assert_eq!(setlist.id, SetlistId(101));

    let item = h
        .service
        .add_song_to_setlist(setlist.id, song.id)
        .await
        .unwrap();

    assert_eq!(item.song.id, SongId(100));
    assert_eq!(h.service.pending_count().await, 0);
    assert_eq!(h.api.setlist(setlist.id).unwrap().items.len(), 1);
}

#[tokio::test]
async fn test_delete_waits_for_queued_rename() {
    let h = harness(true).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    h.api.fail_next("update_setlist", Failure::Connectivity);
    h.service.rename_setlist(setlist.id, "Friday Late").await.unwrap();
    assert_eq!(h.service.pending_count().await, 1);

    h.service.delete_setlist(setlist.id).await.unwrap();

    let calls = h.api.calls();
    let last_rename = calls.iter().rposition(|c| c.starts_with("update_setlist(")).unwrap();
    let delete = calls.iter().position(|c| c.starts_with("delete_setlist(")).unwrap();
    assert!(last_rename < delete);
    assert_eq!(h.api.count("update_setlist"), 2);
    assert_eq!(h.service.pending_count().await, 0);
}

#[tokio::test]
async fn test_unreachable_server_is_retried_without_new_edits() {
    let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let config = builder(settings, None, Arc::new(SilentConnector::default()))
        .flush_retry_delay(Duration::from_millis(50))
        .build()
        .unwrap();
    let api = Arc::new(FakeRepertoireApi::new());
    let service = SetlistService::bootstrap_with_api(config, api.clone())
        .await
        .unwrap();
    api.fail_next("create_song", Failure::Connectivity);
    api.fail_next("create_song", Failure::Connectivity);

    service.create_song("Wonderwall", "Oasis").await.unwrap();
    assert_eq!(service.pending_count().await, 1);

    let service_ref = &service;
    let drained = eventually(move || async move { service_ref.pending_count().await == 0 }).await;

    assert!(drained);
    assert_eq!(api.count("create_song"), 3);
    assert!(service.songs().await.iter().all(|s| !s.id.is_temporary()));
    service.shutdown().await;
}

// ============================================================================
// Audience requests
// ============================================================================

#[tokio::test]
async fn test_channel_opens_for_selected_setlist_with_link() {
    let h = harness(true).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();

    h.service.select_setlist(Some(setlist.id)).await.unwrap();
    wait_for_state(&h.service, ConnectionState::Connected).await;

    assert_eq!(
        h.connector.urls(),
        vec!["ws://localhost:8000/ws/setlists/100/requests/?token=access-token".to_string()]
    );
}

#[tokio::test]
async fn test_missing_audience_link_keeps_channel_closed() {
    let h = harness(true).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    h.api.fail_next("get_audience_link", Failure::Rejected(404));

    h.service.select_setlist(Some(setlist.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.service.audience_link().await.is_none());
    assert_eq!(h.service.connection_state(), ConnectionState::Disconnected);
    assert!(h.connector.urls().is_empty());

    // Requests are still read without the channel
    h.service.refresh_requests().await.unwrap();
    let api = &h.api;
    let refreshed = eventually(move || async move { api.count("list_audience_requests") > 0 }).await;
    assert!(refreshed);
}

#[tokio::test]
async fn test_deleting_active_setlist_closes_channel() {
    let h = harness(true).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    h.service.select_setlist(Some(setlist.id)).await.unwrap();
    wait_for_state(&h.service, ConnectionState::Connected).await;

    h.service.delete_setlist(setlist.id).await.unwrap();

    wait_for_state(&h.service, ConnectionState::Disconnected).await;
    assert_eq!(h.connector.urls().len(), 1);
}

#[tokio::test]
async fn test_confirmed_placeholder_setlist_gets_a_channel() {
    let h = harness(false).await;
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    h.service.select_setlist(Some(setlist.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.service.connection_state(), ConnectionState::Disconnected);
    assert!(h.connector.urls().is_empty());

    h.service.set_online(true).await.unwrap();
    wait_for_state(&h.service, ConnectionState::Connected).await;

    assert_eq!(h.service.active_setlist_id().await, Some(SetlistId(100)));
    assert_eq!(h.service.audience_link().await.unwrap().setlist_id, SetlistId(100));
    let urls = h.connector.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].contains("/ws/setlists/100/requests/"));
}

// ============================================================================
// Reordering
// ============================================================================

async fn three_item_setlist(h: &Harness) -> (SetlistId, Vec<SetlistItem>) {
    let setlist = h.service.create_setlist("Friday").await.unwrap();
    let mut items = Vec::new();
    for title in ["Alpha", "Bravo", "Charlie"] {
        let song = h.service.create_song(title, "Band").await.unwrap();
        items.push(
            h.service
                .add_song_to_setlist(setlist.id, song.id)
                .await
                .unwrap(),
        );
    }
    (setlist.id, items)
}

#[tokio::test]
async fn test_move_item_up_swaps_and_renumbers() {
    let h = harness(true).await;
    let (setlist_id, items) = three_item_setlist(&h).await;

    let moved = h
        .service
        .move_item(setlist_id, items[2].id, MoveDirection::Up)
        .await
        .unwrap();

    assert_eq!(
        item_songs(&moved),
        vec![
            (1, "Alpha".to_string()),
            (2, "Charlie".to_string()),
            (3, "Bravo".to_string()),
        ]
    );
    assert_eq!(item_songs(&h.api.setlist(setlist_id).unwrap().items), item_songs(&moved));
}

#[tokio::test]
async fn test_move_item_at_edge_changes_nothing() {
    let h = harness(true).await;
    let (setlist_id, items) = three_item_setlist(&h).await;

    let unchanged = h
        .service
        .move_item(setlist_id, items[0].id, MoveDirection::Up)
        .await
        .unwrap();

    assert_eq!(unchanged, items);
    assert_eq!(h.api.count("reorder_setlist"), 0);
}

#[tokio::test]
async fn test_offline_move_then_remove_keeps_positions_contiguous() {
    let h = harness(true).await;
    let (setlist_id, items) = three_item_setlist(&h).await;
    h.service.set_online(false).await.unwrap();

    h.service
        .move_item(setlist_id, items[0].id, MoveDirection::Down)
        .await
        .unwrap();
    h.service.remove_setlist_item(items[2].id).await.unwrap();

    assert_eq!(
        item_songs(&h.service.setlist_items(setlist_id).await),
        vec![(1, "Bravo".to_string()), (2, "Alpha".to_string())]
    );
    assert_eq!(h.service.pending_count().await, 2);

    h.service.set_online(true).await.unwrap();

    assert_eq!(h.service.pending_count().await, 0);
    assert_eq!(
        item_songs(&h.api.setlist(setlist_id).unwrap().items),
        vec![(1, "Bravo".to_string()), (2, "Alpha".to_string())]
    );
}

// ============================================================================
// Persistence and connectivity
// ============================================================================

#[tokio::test]
async fn test_bootstrap_restores_queue_and_selection() {
    let first = harness(false).await;
    let setlist = first.service.create_setlist("Friday").await.unwrap();
    first.service.select_setlist(Some(setlist.id)).await.unwrap();
    first.service.shutdown().await;

    let api = first.api.clone();
    let second = harness_with(api, first.settings.clone(), false).await;

    assert_eq!(second.service.pending_count().await, 1);
    assert_eq!(second.service.active_setlist_id().await, Some(setlist.id));
    assert_eq!(second.service.setlists().await[0].name, "Friday");

    let another = second.service.create_setlist("Saturday").await.unwrap();
    assert_ne!(another.id, setlist.id);
    assert!(another.id.is_temporary());
}

#[tokio::test]
async fn test_select_unknown_setlist_is_rejected() {
    let h = harness(true).await;

    let err = h
        .service
        .select_setlist(Some(SetlistId(42)))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Library(LibraryError::NotFound { .. })));
    assert_eq!(h.service.active_setlist_id().await, None);
}

#[tokio::test]
async fn test_network_monitor_drives_flush() {
    let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let (changes, rx) = mpsc::unbounded_channel();
    let network: Arc<dyn NetworkMonitor> = Arc::new(ScriptedNetwork {
        initially_online: false,
        changes: Mutex::new(Some(rx)),
    });
    let api = Arc::new(FakeRepertoireApi::new());
    let service = SetlistService::bootstrap_with_api(config(settings, Some(network)), api.clone())
        .await
        .unwrap();

    service.create_song("Wonderwall", "Oasis").await.unwrap();
    assert!(!service.is_online());

    changes.send(NetworkInfo::connected(NetworkType::WiFi)).unwrap();

    let mut waited = Duration::ZERO;
    while service.pending_count().await > 0 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    assert!(service.is_online());
    assert_eq!(service.pending_count().await, 0);
    assert_eq!(api.count("create_song"), 1);
    service.shutdown().await;
}

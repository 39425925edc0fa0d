//! Remote repertoire service
//!
//! The server is the only authority on identifiers. Every method here takes
//! and returns confirmed (positive) ids.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::models::{
    AudienceLink, AudienceQueue, AudienceRequest, ItemId, PublicSetlist, SetlistDetail,
    SetlistId, Setlist, SetlistItem, Song, SongId, SongPage, SongPatch, SongQuery,
};

/// Operations offered by the repertoire backend.
///
/// Errors are classified by [`LibraryError`](crate::LibraryError): callers
/// check `is_connectivity()` to decide whether to retry later.
#[async_trait]
pub trait RepertoireApi: Send + Sync {
    async fn list_songs(&self, query: &SongQuery) -> Result<SongPage>;

    async fn create_song(&self, title: &str, artist: &str) -> Result<Song>;

    async fn update_song(&self, id: SongId, patch: &SongPatch) -> Result<Song>;

    async fn list_setlists(&self) -> Result<Vec<Setlist>>;

    async fn create_setlist(&self, name: &str) -> Result<Setlist>;

    async fn get_setlist(&self, id: SetlistId) -> Result<SetlistDetail>;

    async fn update_setlist(&self, id: SetlistId, name: &str) -> Result<Setlist>;

    async fn delete_setlist(&self, id: SetlistId) -> Result<()>;

    async fn add_setlist_item(&self, setlist_id: SetlistId, song_id: SongId)
        -> Result<SetlistItem>;

    async fn delete_setlist_item(&self, item_id: ItemId) -> Result<()>;

    /// `item_ids` must list every item of the setlist exactly once.
    async fn reorder_setlist(
        &self,
        setlist_id: SetlistId,
        item_ids: &[ItemId],
    ) -> Result<SetlistDetail>;

    async fn get_audience_link(&self, setlist_id: SetlistId) -> Result<AudienceLink>;

    async fn list_audience_requests(&self, setlist_id: SetlistId) -> Result<AudienceQueue>;

    /// Unauthenticated.
    async fn get_public_setlist(&self, token: &str) -> Result<PublicSetlist>;

    /// Unauthenticated.
    async fn create_public_request(
        &self,
        token: &str,
        song_name: &str,
        requester_name: Option<&str>,
    ) -> Result<AudienceRequest>;
}

/// Walks every page of the song library.
pub async fn fetch_all_songs(api: &dyn RepertoireApi, page_size: u32) -> Result<Vec<Song>> {
    let mut songs = Vec::new();
    let mut query = SongQuery::default().page_size(page_size.max(1));

    loop {
        let page = api.list_songs(&query).await?;
        let fetched = page.items.len();
        songs.extend(page.items);

        if !page.has_next || fetched == 0 {
            break;
        }
        query.page += 1;
    }

    debug!(count = songs.len(), pages = query.page, "Fetched song library");
    Ok(songs)
}

//! Offline edits waiting to be sent to the server
//!
//! Persisted form:
//!
//! ```json
//! { "id": "7f0c…", "type": "add_setlist_item",
//!   "payload": { "setlistId": -1718000000000, "songId": 12, "tempItemId": -1718000000001 } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_library::{ItemId, RepertoireState, SetlistId, Setlist, Song, SongId};

use crate::remap::IdRemapper;

/// A queued edit together with its queue id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: String,
    #[serde(flatten)]
    pub mutation: Mutation,
}

impl PendingMutation {
    /// Same entry with every known placeholder replaced.
    pub fn remapped(self, ids: &IdRemapper) -> Self {
        Self {
            id: self.id,
            mutation: self.mutation.remapped(ids),
        }
    }
}

/// Every kind of edit that can be made offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    CreateSong(CreateSongPayload),
    CreateSetlist(CreateSetlistPayload),
    RenameSetlist(RenameSetlistPayload),
    AddSetlistItem(AddSetlistItemPayload),
    DeleteSetlistItem(DeleteSetlistItemPayload),
    ReorderSetlist(ReorderSetlistPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSongPayload {
    pub temp_song_id: SongId,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSetlistPayload {
    pub temp_setlist_id: SetlistId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSetlistPayload {
    pub setlist_id: SetlistId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSetlistItemPayload {
    pub setlist_id: SetlistId,
    pub song_id: SongId,
    pub temp_item_id: ItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSetlistItemPayload {
    pub item_id: ItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderSetlistPayload {
    pub setlist_id: SetlistId,
    pub item_ids: Vec<ItemId>,
}

impl Mutation {
    /// Wire name of the kind, as stored in `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateSong(_) => "create_song",
            Mutation::CreateSetlist(_) => "create_setlist",
            Mutation::RenameSetlist(_) => "rename_setlist",
            Mutation::AddSetlistItem(_) => "add_setlist_item",
            Mutation::DeleteSetlistItem(_) => "delete_setlist_item",
            Mutation::ReorderSetlist(_) => "reorder_setlist",
        }
    }

    /// Applies the edit to the local view, as if the server had accepted it.
    pub fn apply_to(&self, state: &mut RepertoireState, now: DateTime<Utc>) -> core_library::Result<()> {
        match self {
            Mutation::CreateSong(p) => {
                state.insert_song(Song::placeholder(p.temp_song_id, &p.title, &p.artist, now));
                Ok(())
            }
            Mutation::CreateSetlist(p) => {
                state.insert_setlist(Setlist::placeholder(p.temp_setlist_id, &p.name, now));
                Ok(())
            }
            Mutation::RenameSetlist(p) => state.rename_setlist(p.setlist_id, &p.name),
            Mutation::AddSetlistItem(p) => state
                .add_item(p.setlist_id, p.temp_item_id, p.song_id)
                .map(|_| ()),
            Mutation::DeleteSetlistItem(p) => state.remove_item(p.item_id).map(|_| ()),
            Mutation::ReorderSetlist(p) => state.reorder(p.setlist_id, &p.item_ids),
        }
    }

    /// Copy with every placeholder known to `ids` replaced by its server id.
    pub fn remapped(self, ids: &IdRemapper) -> Self {
        match self {
            Mutation::CreateSong(p) => Mutation::CreateSong(p),
            Mutation::CreateSetlist(p) => Mutation::CreateSetlist(p),
            Mutation::RenameSetlist(p) => Mutation::RenameSetlist(RenameSetlistPayload {
                setlist_id: ids.setlist(p.setlist_id),
                name: p.name,
            }),
            Mutation::AddSetlistItem(p) => Mutation::AddSetlistItem(AddSetlistItemPayload {
                setlist_id: ids.setlist(p.setlist_id),
                song_id: ids.song(p.song_id),
                temp_item_id: p.temp_item_id,
            }),
            Mutation::DeleteSetlistItem(p) => {
                Mutation::DeleteSetlistItem(DeleteSetlistItemPayload {
                    item_id: ids.item(p.item_id),
                })
            }
            Mutation::ReorderSetlist(p) => Mutation::ReorderSetlist(ReorderSetlistPayload {
                setlist_id: ids.setlist(p.setlist_id),
                item_ids: p.item_ids.into_iter().map(|id| ids.item(id)).collect(),
            }),
        }
    }

    /// Placeholder ids this edit introduces.
    pub fn created_temp_id(&self) -> Option<i64> {
        match self {
            Mutation::CreateSong(p) => Some(p.temp_song_id.0),
            Mutation::CreateSetlist(p) => Some(p.temp_setlist_id.0),
            Mutation::AddSetlistItem(p) => Some(p.temp_item_id.0),
            _ => None,
        }
    }
}

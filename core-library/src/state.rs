//! In-memory repertoire view
//!
//! Songs and setlists live in arenas addressed by slot; public identifiers map
//! to slots through an index. Items reference their song by slot, so
//! confirming a temporary id only rekeys one index entry. Ordered item lists
//! are derived from `position` on every read.

use std::collections::HashMap;

use crate::error::{LibraryError, Result};
use crate::models::{
    ItemId, MoveDirection, SetlistDetail, SetlistId, Setlist, SetlistItem, Song, SongId,
};

type Slot = usize;

#[derive(Debug, Clone, Copy)]
struct ItemSlot {
    position: u32,
    song: Slot,
}

#[derive(Debug, Clone)]
struct SetlistEntry {
    setlist: Setlist,
    /// `None` until the detail has been fetched
    items: Option<HashMap<ItemId, ItemSlot>>,
}

/// The performer's songs and setlists as currently shown.
#[derive(Debug, Clone, Default)]
pub struct RepertoireState {
    songs: Vec<Song>,
    song_index: HashMap<SongId, Slot>,
    song_order: Vec<Slot>,

    setlists: Vec<Option<SetlistEntry>>,
    setlist_index: HashMap<SetlistId, Slot>,
    setlist_order: Vec<Slot>,

    item_owner: HashMap<ItemId, Slot>,
    active_setlist_id: Option<SetlistId>,
}

impl RepertoireState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the view from a saved server snapshot.
    pub fn from_parts(
        songs: Vec<Song>,
        setlists: Vec<Setlist>,
        details: impl IntoIterator<Item = SetlistDetail>,
        active_setlist_id: Option<SetlistId>,
    ) -> Self {
        let mut state = Self::new();
        state.replace_songs(songs);
        state.replace_setlists(setlists);
        for detail in details {
            state.upsert_detail(detail);
        }
        state.active_setlist_id = active_setlist_id;
        state
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Library songs in server order, followed by local additions.
    pub fn songs(&self) -> Vec<Song> {
        self.song_order
            .iter()
            .map(|&slot| self.songs[slot].clone())
            .collect()
    }

    pub fn song(&self, id: SongId) -> Option<&Song> {
        self.song_index.get(&id).map(|&slot| &self.songs[slot])
    }

    pub fn setlists(&self) -> Vec<Setlist> {
        self.setlist_order
            .iter()
            .filter_map(|&slot| self.entry_at(slot))
            .map(|entry| entry.setlist.clone())
            .collect()
    }

    pub fn setlist(&self, id: SetlistId) -> Option<&Setlist> {
        self.entry(id).map(|entry| &entry.setlist)
    }

    /// Setlist with items in position order, if its items are known.
    pub fn detail(&self, id: SetlistId) -> Option<SetlistDetail> {
        let entry = self.entry(id)?;
        let items = entry.items.as_ref()?;
        Some(self.build_detail(&entry.setlist, items))
    }

    /// Every setlist whose items are known.
    pub fn details(&self) -> Vec<SetlistDetail> {
        self.setlist_order
            .iter()
            .filter_map(|&slot| self.entry_at(slot))
            .filter_map(|entry| {
                entry
                    .items
                    .as_ref()
                    .map(|items| self.build_detail(&entry.setlist, items))
            })
            .collect()
    }

    pub fn items(&self, id: SetlistId) -> Vec<SetlistItem> {
        self.detail(id).map(|detail| detail.items).unwrap_or_default()
    }

    /// Setlist that owns `item_id`.
    pub fn item_setlist(&self, item_id: ItemId) -> Option<SetlistId> {
        let slot = *self.item_owner.get(&item_id)?;
        self.entry_at(slot).map(|entry| entry.setlist.id)
    }

    pub fn active_setlist_id(&self) -> Option<SetlistId> {
        self.active_setlist_id
    }

    pub fn set_active_setlist(&mut self, id: Option<SetlistId>) {
        self.active_setlist_id = id;
    }

    // ------------------------------------------------------------------
    // Server data
    // ------------------------------------------------------------------

    /// Replaces the library listing. Songs still referenced by setlist items
    /// stay resolvable.
    pub fn replace_songs(&mut self, songs: Vec<Song>) {
        self.song_order.clear();
        for song in songs {
            let slot = self.put_song(song);
            if !self.song_order.contains(&slot) {
                self.song_order.push(slot);
            }
        }
    }

    /// Replaces the setlist listing, keeping known items of surviving setlists.
    pub fn replace_setlists(&mut self, setlists: Vec<Setlist>) {
        let mut order = Vec::with_capacity(setlists.len());
        for setlist in setlists {
            let slot = match self.setlist_index.get(&setlist.id) {
                Some(&slot) => {
                    if let Some(entry) = self.setlists[slot].as_mut() {
                        entry.setlist = setlist;
                    }
                    slot
                }
                None => self.push_setlist(setlist, None),
            };
            order.push(slot);
        }

        let dropped: Vec<SetlistId> = self
            .setlist_order
            .iter()
            .filter(|slot| !order.contains(slot))
            .filter_map(|&slot| self.entry_at(slot).map(|entry| entry.setlist.id))
            .collect();
        for id in dropped {
            self.remove_setlist(id);
        }

        self.setlist_order = order;
    }

    /// Stores a fetched setlist with its items.
    pub fn upsert_detail(&mut self, detail: SetlistDetail) {
        let summary = detail.summary();
        let slot = match self.setlist_index.get(&detail.id) {
            Some(&slot) => slot,
            None => {
                let slot = self.push_setlist(summary.clone(), None);
                self.setlist_order.push(slot);
                slot
            }
        };

        if let Some(old) = self.setlists[slot]
            .as_ref()
            .and_then(|entry| entry.items.as_ref())
        {
            for item_id in old.keys() {
                self.item_owner.remove(item_id);
            }
        }

        let mut items = HashMap::with_capacity(detail.items.len());
        for item in detail.items {
            let song = self.put_song(item.song);
            items.insert(
                item.id,
                ItemSlot {
                    position: item.position,
                    song,
                },
            );
            self.item_owner.insert(item.id, slot);
        }

        self.setlists[slot] = Some(SetlistEntry {
            setlist: summary,
            items: Some(items),
        });
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Adds a song to the library listing.
    pub fn insert_song(&mut self, song: Song) {
        let slot = self.put_song(song);
        if !self.song_order.contains(&slot) {
            self.song_order.push(slot);
        }
    }

    /// Adds a new, empty setlist.
    pub fn insert_setlist(&mut self, setlist: Setlist) {
        if let Some(&slot) = self.setlist_index.get(&setlist.id) {
            if let Some(entry) = self.setlists[slot].as_mut() {
                entry.setlist = setlist;
            }
            return;
        }
        let slot = self.push_setlist(setlist, Some(HashMap::new()));
        self.setlist_order.push(slot);
    }

    pub fn rename_setlist(&mut self, id: SetlistId, name: &str) -> Result<()> {
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| LibraryError::not_found("setlist", id))?;
        entry.setlist.name = name.to_string();
        Ok(())
    }

    pub fn remove_setlist(&mut self, id: SetlistId) -> Option<Setlist> {
        let slot = self.setlist_index.remove(&id)?;
        let entry = self.setlists[slot].take()?;
        if let Some(items) = &entry.items {
            for item_id in items.keys() {
                self.item_owner.remove(item_id);
            }
        }
        self.setlist_order.retain(|&s| s != slot);
        if self.active_setlist_id == Some(id) {
            self.active_setlist_id = None;
        }
        Some(entry.setlist)
    }

    /// Appends `song_id` to the end of a setlist under `item_id`.
    ///
    /// Fails if the song is unknown, the setlist items are not loaded, or the
    /// song is already in the setlist.
    pub fn add_item(
        &mut self,
        setlist_id: SetlistId,
        item_id: ItemId,
        song_id: SongId,
    ) -> Result<SetlistItem> {
        let song_slot = *self
            .song_index
            .get(&song_id)
            .ok_or_else(|| LibraryError::not_found("song", song_id))?;
        let setlist_slot = *self
            .setlist_index
            .get(&setlist_id)
            .ok_or_else(|| LibraryError::not_found("setlist", setlist_id))?;

        let items = self.setlists[setlist_slot]
            .as_mut()
            .and_then(|entry| entry.items.as_mut())
            .ok_or_else(|| LibraryError::not_found("setlist items", setlist_id))?;

        if items.values().any(|slot| slot.song == song_slot) {
            return Err(LibraryError::invalid(
                "song_id",
                "Song is already in this setlist",
            ));
        }
        if items.contains_key(&item_id) {
            return Err(LibraryError::invalid("item_id", "Item id already in use"));
        }

        let position = items.len() as u32 + 1;
        items.insert(
            item_id,
            ItemSlot {
                position,
                song: song_slot,
            },
        );
        self.item_owner.insert(item_id, setlist_slot);

        Ok(SetlistItem {
            id: item_id,
            position,
            song: self.songs[song_slot].clone(),
        })
    }

    /// Removes an item and closes the gap in positions.
    pub fn remove_item(&mut self, item_id: ItemId) -> Result<SetlistId> {
        let slot = self
            .item_owner
            .remove(&item_id)
            .ok_or_else(|| LibraryError::not_found("setlist item", item_id))?;
        let entry = self.setlists[slot]
            .as_mut()
            .ok_or_else(|| LibraryError::not_found("setlist item", item_id))?;
        let setlist_id = entry.setlist.id;

        if let Some(items) = entry.items.as_mut() {
            items.remove(&item_id);
            renumber(items);
        }
        Ok(setlist_id)
    }

    /// Applies a new order. `item_ids` must be exactly the setlist's items.
    pub fn reorder(&mut self, setlist_id: SetlistId, item_ids: &[ItemId]) -> Result<()> {
        let entry = self
            .entry_mut(setlist_id)
            .ok_or_else(|| LibraryError::not_found("setlist", setlist_id))?;
        let items = entry
            .items
            .as_mut()
            .ok_or_else(|| LibraryError::not_found("setlist items", setlist_id))?;

        let mut seen = item_ids.to_vec();
        seen.sort();
        seen.dedup();
        if seen.len() != item_ids.len()
            || item_ids.len() != items.len()
            || !item_ids.iter().all(|id| items.contains_key(id))
        {
            return Err(LibraryError::invalid(
                "item_ids",
                "Item list does not match the setlist",
            ));
        }

        for (index, id) in item_ids.iter().enumerate() {
            if let Some(slot) = items.get_mut(id) {
                slot.position = index as u32 + 1;
            }
        }
        Ok(())
    }

    /// Order that results from moving `item_id` one slot, or `None` at an edge.
    pub fn moved_order(
        &self,
        setlist_id: SetlistId,
        item_id: ItemId,
        direction: MoveDirection,
    ) -> Result<Option<Vec<ItemId>>> {
        let detail = self
            .detail(setlist_id)
            .ok_or_else(|| LibraryError::not_found("setlist", setlist_id))?;
        let mut order = detail.item_ids();
        let index = order
            .iter()
            .position(|&id| id == item_id)
            .ok_or_else(|| LibraryError::not_found("setlist item", item_id))?;

        let target = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < order.len() => index + 1,
            _ => return Ok(None),
        };
        order.swap(index, target);
        Ok(Some(order))
    }

    // ------------------------------------------------------------------
    // Identifier confirmation
    // ------------------------------------------------------------------

    /// Replaces a placeholder song id with the server's. Returns whether the
    /// placeholder was known.
    pub fn remap_song(&mut self, temp: SongId, real: SongId) -> bool {
        let Some(slot) = self.song_index.remove(&temp) else {
            return false;
        };
        self.songs[slot].id = real;
        self.song_index.insert(real, slot);
        true
    }

    pub fn remap_setlist(&mut self, temp: SetlistId, real: SetlistId) -> bool {
        let Some(slot) = self.setlist_index.remove(&temp) else {
            return false;
        };
        if let Some(entry) = self.setlists[slot].as_mut() {
            entry.setlist.id = real;
        }
        self.setlist_index.insert(real, slot);
        if self.active_setlist_id == Some(temp) {
            self.active_setlist_id = Some(real);
        }
        true
    }

    pub fn remap_item(&mut self, temp: ItemId, real: ItemId) -> bool {
        let Some(slot) = self.item_owner.remove(&temp) else {
            return false;
        };
        if let Some(items) = self.setlists[slot]
            .as_mut()
            .and_then(|entry| entry.items.as_mut())
        {
            if let Some(item) = items.remove(&temp) {
                items.insert(real, item);
            }
        }
        self.item_owner.insert(real, slot);
        true
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn put_song(&mut self, song: Song) -> Slot {
        match self.song_index.get(&song.id) {
            Some(&slot) => {
                self.songs[slot] = song;
                slot
            }
            None => {
                let slot = self.songs.len();
                self.song_index.insert(song.id, slot);
                self.songs.push(song);
                slot
            }
        }
    }

    fn push_setlist(
        &mut self,
        setlist: Setlist,
        items: Option<HashMap<ItemId, ItemSlot>>,
    ) -> Slot {
        let slot = self.setlists.len();
        self.setlist_index.insert(setlist.id, slot);
        self.setlists.push(Some(SetlistEntry { setlist, items }));
        slot
    }

    fn entry_at(&self, slot: Slot) -> Option<&SetlistEntry> {
        self.setlists.get(slot).and_then(Option::as_ref)
    }

    fn entry(&self, id: SetlistId) -> Option<&SetlistEntry> {
        self.setlist_index
            .get(&id)
            .and_then(|&slot| self.entry_at(slot))
    }

    fn entry_mut(&mut self, id: SetlistId) -> Option<&mut SetlistEntry> {
        let slot = *self.setlist_index.get(&id)?;
        self.setlists.get_mut(slot).and_then(Option::as_mut)
    }

    fn build_detail(&self, setlist: &Setlist, items: &HashMap<ItemId, ItemSlot>) -> SetlistDetail {
        let mut ordered: Vec<(&ItemId, &ItemSlot)> = items.iter().collect();
        ordered.sort_by_key(|(id, slot)| (slot.position, **id));

        SetlistDetail {
            id: setlist.id,
            name: setlist.name.clone(),
            created_at: setlist.created_at,
            updated_at: setlist.updated_at,
            items: ordered
                .into_iter()
                .map(|(&id, slot)| SetlistItem {
                    id,
                    position: slot.position,
                    song: self.songs[slot.song].clone(),
                })
                .collect(),
        }
    }
}

/// Rewrites positions to 1..N keeping the current relative order.
fn renumber(items: &mut HashMap<ItemId, ItemSlot>) {
    let mut ordered: Vec<(ItemId, u32)> = items
        .iter()
        .map(|(&id, slot)| (id, slot.position))
        .collect();
    ordered.sort_by_key(|&(id, position)| (position, id));

    for (index, (id, _)) in ordered.into_iter().enumerate() {
        if let Some(slot) = items.get_mut(&id) {
            slot.position = index as u32 + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn song(id: i64, title: &str) -> Song {
        Song::placeholder(
            SongId(id),
            title,
            "Artist",
            Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap(),
        )
    }

    fn setlist(id: i64, name: &str) -> Setlist {
        Setlist::placeholder(
            SetlistId(id),
            name,
            Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap(),
        )
    }

    fn state_with_three_items() -> RepertoireState {
        let mut state = RepertoireState::new();
        state.replace_songs(vec![song(1, "One"), song(2, "Two"), song(3, "Three")]);
        state.insert_setlist(setlist(10, "Friday"));
        state.add_item(SetlistId(10), ItemId(100), SongId(1)).unwrap();
        state.add_item(SetlistId(10), ItemId(101), SongId(2)).unwrap();
        state.add_item(SetlistId(10), ItemId(102), SongId(3)).unwrap();
        state
    }

    fn positions(state: &RepertoireState) -> Vec<(i64, u32)> {
        state
            .items(SetlistId(10))
            .into_iter()
            .map(|item| (item.id.0, item.position))
            .collect()
    }

    #[test]
    fn test_add_item_appends_at_next_position() {
        let state = state_with_three_items();
        assert_eq!(positions(&state), vec![(100, 1), (101, 2), (102, 3)]);
        assert_eq!(state.item_setlist(ItemId(101)), Some(SetlistId(10)));
    }

    #[test]
    fn test_add_item_rejects_unknown_song() {
        let mut state = state_with_three_items();
        let result = state.add_item(SetlistId(10), ItemId(103), SongId(99));
        assert!(matches!(result, Err(LibraryError::NotFound { .. })));
    }

    #[test]
    fn test_add_item_rejects_duplicate_song() {
        let mut state = state_with_three_items();
        let result = state.add_item(SetlistId(10), ItemId(103), SongId(2));
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[test]
    fn test_remove_item_renumbers_densely() {
        let mut state = state_with_three_items();
        assert_eq!(state.remove_item(ItemId(100)).unwrap(), SetlistId(10));
        assert_eq!(positions(&state), vec![(101, 1), (102, 2)]);
        assert_eq!(state.item_setlist(ItemId(100)), None);
    }

    #[test]
    fn test_reorder_renumbers_in_new_order() {
        let mut state = state_with_three_items();
        state
            .reorder(SetlistId(10), &[ItemId(102), ItemId(100), ItemId(101)])
            .unwrap();
        assert_eq!(positions(&state), vec![(102, 1), (100, 2), (101, 3)]);
    }

    #[test]
    fn test_reorder_requires_exact_permutation() {
        let mut state = state_with_three_items();
        assert!(state
            .reorder(SetlistId(10), &[ItemId(100), ItemId(101)])
            .is_err());
        assert!(state
            .reorder(SetlistId(10), &[ItemId(100), ItemId(100), ItemId(101)])
            .is_err());
        assert_eq!(positions(&state), vec![(100, 1), (101, 2), (102, 3)]);
    }

    #[test]
    fn test_moved_order() {
        let state = state_with_three_items();
        assert_eq!(
            state
                .moved_order(SetlistId(10), ItemId(101), MoveDirection::Up)
                .unwrap(),
            Some(vec![ItemId(101), ItemId(100), ItemId(102)])
        );
        assert_eq!(
            state
                .moved_order(SetlistId(10), ItemId(102), MoveDirection::Down)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_remap_song_updates_items() {
        let mut state = RepertoireState::new();
        state.insert_song(song(-5, "Offline song"));
        state.insert_setlist(setlist(10, "Friday"));
        state.add_item(SetlistId(10), ItemId(-6), SongId(-5)).unwrap();

        assert!(state.remap_song(SongId(-5), SongId(55)));
        assert!(state.remap_item(ItemId(-6), ItemId(66)));

        let items = state.items(SetlistId(10));
        assert_eq!(items[0].id, ItemId(66));
        assert_eq!(items[0].song.id, SongId(55));
        assert!(state.song(SongId(-5)).is_none());
        assert!(!state.remap_song(SongId(-5), SongId(56)));
    }

    #[test]
    fn test_remap_setlist_follows_active_selection() {
        let mut state = RepertoireState::new();
        state.insert_setlist(setlist(-7, "New set"));
        state.set_active_setlist(Some(SetlistId(-7)));

        assert!(state.remap_setlist(SetlistId(-7), SetlistId(70)));
        assert_eq!(state.active_setlist_id(), Some(SetlistId(70)));
        assert_eq!(state.setlist(SetlistId(70)).unwrap().name, "New set");
    }

    #[test]
    fn test_replace_setlists_drops_missing_and_keeps_items() {
        let mut state = state_with_three_items();
        state.insert_setlist(setlist(11, "Saturday"));
        state.set_active_setlist(Some(SetlistId(11)));

        state.replace_setlists(vec![setlist(10, "Friday (late)")]);

        assert_eq!(state.setlists().len(), 1);
        assert_eq!(state.items(SetlistId(10)).len(), 3);
        assert_eq!(state.setlist(SetlistId(10)).unwrap().name, "Friday (late)");
        assert_eq!(state.active_setlist_id(), None);
    }

    #[test]
    fn test_upsert_detail_registers_item_songs() {
        let mut state = RepertoireState::new();
        let mut detail = SetlistDetail::from(setlist(20, "Sunday"));
        detail.items.push(SetlistItem {
            id: ItemId(200),
            position: 1,
            song: song(9, "Only in detail"),
        });

        state.upsert_detail(detail);

        assert!(state.song(SongId(9)).is_some());
        assert!(state.songs().is_empty());
        assert_eq!(state.details().len(), 1);
    }
}

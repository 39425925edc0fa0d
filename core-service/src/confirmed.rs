//! Folding single server responses into the confirmed snapshot
//!
//! Online edits return the server's version of what changed. These helpers
//! merge that into the last confirmed view so it can be saved without a full
//! refresh.

use core_library::{ItemId, SetlistDetail, SetlistId, Setlist, SetlistItem, Song};
use core_sync::OfflineSnapshot;

pub(crate) fn record_song(snapshot: &mut OfflineSnapshot, song: &Song) {
    match snapshot.songs.iter_mut().find(|s| s.id == song.id) {
        Some(existing) => *existing = song.clone(),
        None => snapshot.songs.push(song.clone()),
    }
    for detail in snapshot.setlist_details_by_id.values_mut() {
        for item in detail.items.iter_mut().filter(|i| i.song.id == song.id) {
            item.song = song.clone();
        }
    }
}

/// Inserts or renames a setlist. A new setlist starts with an empty,
/// loaded item list.
pub(crate) fn record_setlist(snapshot: &mut OfflineSnapshot, setlist: &Setlist) {
    match snapshot.setlists.iter_mut().find(|s| s.id == setlist.id) {
        Some(existing) => *existing = setlist.clone(),
        None => snapshot.setlists.push(setlist.clone()),
    }
    snapshot
        .setlist_details_by_id
        .entry(setlist.id)
        .and_modify(|detail| {
            detail.name = setlist.name.clone();
            detail.updated_at = setlist.updated_at;
        })
        .or_insert_with(|| SetlistDetail::from(setlist.clone()));
}

pub(crate) fn record_detail(snapshot: &mut OfflineSnapshot, detail: &SetlistDetail) {
    let summary = detail.summary();
    match snapshot.setlists.iter_mut().find(|s| s.id == detail.id) {
        Some(existing) => *existing = summary,
        None => snapshot.setlists.push(summary),
    }
    snapshot
        .setlist_details_by_id
        .insert(detail.id, detail.clone());
}

pub(crate) fn record_item(snapshot: &mut OfflineSnapshot, setlist_id: SetlistId, item: &SetlistItem) {
    if !snapshot.songs.iter().any(|s| s.id == item.song.id) {
        snapshot.songs.push(item.song.clone());
    }
    if let Some(detail) = snapshot.setlist_details_by_id.get_mut(&setlist_id) {
        detail.items.retain(|i| i.id != item.id);
        detail.items.push(item.clone());
        detail.items.sort_by_key(|i| i.position);
    }
}

pub(crate) fn forget_item(snapshot: &mut OfflineSnapshot, item_id: ItemId) {
    for detail in snapshot.setlist_details_by_id.values_mut() {
        let before = detail.items.len();
        detail.items.retain(|i| i.id != item_id);
        if detail.items.len() != before {
            detail.items.sort_by_key(|i| i.position);
            for (index, item) in detail.items.iter_mut().enumerate() {
                item.position = index as u32 + 1;
            }
        }
    }
}

pub(crate) fn forget_setlist(snapshot: &mut OfflineSnapshot, id: SetlistId) {
    snapshot.setlists.retain(|s| s.id != id);
    snapshot.setlist_details_by_id.remove(&id);
    if snapshot.active_setlist_id == Some(id) {
        snapshot.active_setlist_id = None;
    }
}

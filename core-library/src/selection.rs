//! Helpers for the "add songs to setlist" picker.

use std::collections::HashSet;

use crate::models::{SetlistItem, Song, SongId};

/// Songs that are not already part of the setlist.
pub fn filter_songs_not_in_setlist(songs: &[Song], items: &[SetlistItem]) -> Vec<Song> {
    let in_set: HashSet<SongId> = items.iter().map(|item| item.song.id).collect();
    songs
        .iter()
        .filter(|song| !in_set.contains(&song.id))
        .cloned()
        .collect()
}

/// Drops selected ids that are no longer offered.
pub fn prune_selected_song_ids(selected: &[SongId], available: &[Song]) -> Vec<SongId> {
    let available: HashSet<SongId> = available.iter().map(|song| song.id).collect();
    selected
        .iter()
        .copied()
        .filter(|id| available.contains(id))
        .collect()
}

/// Union of the current selection and `songs`, selection first, no duplicates.
pub fn merge_selection_with_songs(selected: &[SongId], songs: &[Song]) -> Vec<SongId> {
    let mut seen = HashSet::with_capacity(selected.len() + songs.len());
    selected
        .iter()
        .copied()
        .chain(songs.iter().map(|song| song.id))
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Selected ids that can be added right now, in selection order.
pub fn ids_ready_to_add(selected: &[SongId], available: &[Song]) -> Vec<SongId> {
    prune_selected_song_ids(selected, available)
}

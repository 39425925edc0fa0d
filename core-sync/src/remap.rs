//! Temporary → server identifier mapping for one flush cycle

use std::collections::HashMap;

use core_library::{ItemId, SetlistId, SongId};

/// Which id space a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Song,
    Setlist,
    Item,
}

/// Resolves placeholders created offline to the ids the server assigned.
///
/// Built empty at the start of every flush and filled as creating mutations
/// succeed; never persisted.
#[derive(Debug, Default, Clone)]
pub struct IdRemapper {
    songs: HashMap<i64, i64>,
    setlists: HashMap<i64, i64>,
    items: HashMap<i64, i64>,
}

impl IdRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: ResourceKind) -> &HashMap<i64, i64> {
        match kind {
            ResourceKind::Song => &self.songs,
            ResourceKind::Setlist => &self.setlists,
            ResourceKind::Item => &self.items,
        }
    }

    /// Mapped value for a known placeholder, otherwise `id` unchanged.
    pub fn resolve(&self, id: i64, kind: ResourceKind) -> i64 {
        if id < 0 {
            if let Some(&real) = self.map(kind).get(&id) {
                return real;
            }
        }
        id
    }

    pub fn record(&mut self, kind: ResourceKind, temp: i64, real: i64) {
        let map = match kind {
            ResourceKind::Song => &mut self.songs,
            ResourceKind::Setlist => &mut self.setlists,
            ResourceKind::Item => &mut self.items,
        };
        map.insert(temp, real);
    }

    pub fn song(&self, id: SongId) -> SongId {
        SongId(self.resolve(id.0, ResourceKind::Song))
    }

    pub fn setlist(&self, id: SetlistId) -> SetlistId {
        SetlistId(self.resolve(id.0, ResourceKind::Setlist))
    }

    pub fn item(&self, id: ItemId) -> ItemId {
        ItemId(self.resolve(id.0, ResourceKind::Item))
    }

    /// Every `(temporary, server)` pair recorded for `kind`.
    pub fn pairs(&self, kind: ResourceKind) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.map(kind).iter().map(|(&temp, &real)| (temp, real))
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.setlists.is_empty() && self.items.is_empty()
    }

    /// Adds every pair from `other`, which wins on conflicts.
    pub fn merge(&mut self, other: &IdRemapper) {
        self.songs.extend(&other.songs);
        self.setlists.extend(&other.setlists);
        self.items.extend(&other.items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_placeholder() {
        let mut remap = IdRemapper::new();
        remap.record(ResourceKind::Setlist, -1, 70);

        assert_eq!(remap.setlist(SetlistId(-1)), SetlistId(70));
        assert_eq!(remap.resolve(-1, ResourceKind::Setlist), 70);
    }

    #[test]
    fn test_kinds_do_not_leak() {
        let mut remap = IdRemapper::new();
        remap.record(ResourceKind::Song, -1, 10);

        assert_eq!(remap.item(ItemId(-1)), ItemId(-1));
        assert_eq!(remap.setlist(SetlistId(-1)), SetlistId(-1));
    }

    #[test]
    fn test_positive_and_unknown_ids_pass_through() {
        let mut remap = IdRemapper::new();
        assert!(remap.is_empty());
        remap.record(ResourceKind::Song, -1, 10);

        assert_eq!(remap.song(SongId(5)), SongId(5));
        assert_eq!(remap.song(SongId(-2)), SongId(-2));
        assert_eq!(remap.pairs(ResourceKind::Song).collect::<Vec<_>>(), vec![(-1, 10)]);
    }

    #[test]
    fn test_merge_keeps_earlier_cycles() {
        let mut seen = IdRemapper::new();
        seen.record(ResourceKind::Setlist, -1, 70);

        let mut latest = IdRemapper::new();
        latest.record(ResourceKind::Item, -4, 90);
        seen.merge(&latest);

        assert_eq!(seen.setlist(SetlistId(-1)), SetlistId(70));
        assert_eq!(seen.item(ItemId(-4)), ItemId(90));
    }
}

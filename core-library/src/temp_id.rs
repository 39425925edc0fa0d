//! Temporary identifier allocation for offline creates

use bridge_traits::time::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::models::{ItemId, SetlistId, SongId};

/// Hands out negative placeholder ids.
///
/// Ids are the negated clock milliseconds, forced strictly decreasing so two
/// allocations in the same millisecond never collide.
pub struct TempIdAllocator {
    clock: Arc<dyn Clock>,
    last: AtomicI64,
}

impl TempIdAllocator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: AtomicI64::new(0),
        }
    }

    /// Next placeholder; always `< 0` and below every id handed out before.
    pub fn next(&self) -> i64 {
        let candidate = -self.clock.unix_timestamp_millis().max(1);
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = candidate.min(current - 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Ensures future ids stay below `id`, e.g. ids restored from a saved queue.
    pub fn observe(&self, id: i64) {
        if id < 0 {
            self.last.fetch_min(id, Ordering::AcqRel);
        }
    }

    pub fn song_id(&self) -> SongId {
        SongId(self.next())
    }

    pub fn setlist_id(&self) -> SetlistId {
        SetlistId(self.next())
    }

    pub fn item_id(&self) -> ItemId {
        ItemId(self.next())
    }
}

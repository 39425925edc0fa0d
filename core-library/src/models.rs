//! Domain models for the repertoire
//!
//! Wire format follows the server: snake_case JSON, integer identifiers.
//! Negative identifiers are client placeholders that have not been confirmed
//! by the server yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LibraryError, Result};

// =============================================================================
// ID Types
// =============================================================================

/// Identifier of a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(pub i64);

impl SongId {
    /// Whether this is a client placeholder awaiting a server id.
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a setlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetlistId(pub i64);

impl SetlistId {
    /// Whether this is a client placeholder awaiting a server id.
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for SetlistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an entry within a setlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Whether this is a client placeholder awaiting a server id.
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// A song in the performer's library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    /// Link to a chord sheet
    #[serde(default)]
    pub chord_url: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub spotify_track_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Song {
    /// Builds a local placeholder song for an offline create.
    pub fn placeholder(id: SongId, title: &str, artist: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
            chord_url: None,
            duration_ms: None,
            spotify_track_id: None,
            created_at: now,
        }
    }
}

/// Setlist summary as returned by the list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setlist {
    pub id: SetlistId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Setlist {
    pub fn placeholder(id: SetlistId, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Setlist with its ordered items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistDetail {
    pub id: SetlistId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<SetlistItem>,
}

impl SetlistDetail {
    pub fn summary(&self) -> Setlist {
        Setlist {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Item ids in position order.
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn contains_song(&self, song_id: SongId) -> bool {
        self.items.iter().any(|item| item.song.id == song_id)
    }
}

impl From<Setlist> for SetlistDetail {
    fn from(setlist: Setlist) -> Self {
        Self {
            id: setlist.id,
            name: setlist.name,
            created_at: setlist.created_at,
            updated_at: setlist.updated_at,
            items: Vec::new(),
        }
    }
}

/// One song slot within a setlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetlistItem {
    pub id: ItemId,
    /// 1-based, dense within the setlist
    pub position: u32,
    pub song: Song,
}

/// Public link the audience uses to send requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceLink {
    pub setlist_id: SetlistId,
    pub token: String,
    pub public_url: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A song request sent by someone in the audience
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceRequest {
    pub id: i64,
    pub requested_song_name: String,
    #[serde(default)]
    pub requester_name: Option<String>,
    /// Library song matched by the server, if any
    #[serde(default)]
    pub song: Option<Song>,
    pub created_at: DateTime<Utc>,
}

/// Pending audience requests for one setlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceQueue {
    pub setlist_id: SetlistId,
    pub count: usize,
    pub items: Vec<AudienceRequest>,
}

/// What the audience sees behind a public link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSetlist {
    pub id: SetlistId,
    pub name: String,
}

/// One page of the song library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongPage {
    pub items: Vec<Song>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_previous: bool,
}

impl SongPage {
    /// Wraps an unpaginated list as a single page.
    pub fn from_items(items: Vec<Song>) -> Self {
        let len = items.len();
        Self {
            items,
            total: len as u64,
            page: 1,
            page_size: len as u32,
            has_next: false,
            has_previous: false,
        }
    }
}

// =============================================================================
// Queries and patches
// =============================================================================

pub const DEFAULT_SONG_PAGE_SIZE: u32 = 30;

/// Song list query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongQuery {
    pub search: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
}

impl Default for SongQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: 1,
            page_size: DEFAULT_SONG_PAGE_SIZE,
        }
    }
}

impl SongQuery {
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Query-string pairs; a blank search term is omitted.
    ///
    /// ```
    /// use core_library::models::SongQuery;
    ///
    /// let pairs = SongQuery::default().search("  ").query_pairs();
    /// assert_eq!(
    ///     pairs,
    ///     vec![("page", "1".to_string()), ("page_size", "30".to_string())]
    /// );
    /// ```
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(term) = self.search.as_deref().map(str::trim) {
            if !term.is_empty() {
                pairs.push(("search", term.to_string()));
            }
        }
        pairs.push(("page", self.page.to_string()));
        pairs.push(("page_size", self.page_size.to_string()));
        pairs
    }
}

/// Partial song update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chord_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl SongPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.chord_url.is_none()
            && self.duration_ms.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LibraryError::invalid("patch", "Nothing to update"));
        }
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if let Some(artist) = &self.artist {
            require_text("artist", artist)?;
        }
        if let Some(duration) = self.duration_ms {
            if duration < 0 {
                return Err(LibraryError::invalid(
                    "duration_ms",
                    "Duration cannot be negative",
                ));
            }
        }
        Ok(())
    }
}

/// Returns `value` trimmed, or an error if nothing is left.
pub fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::invalid(field, format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Direction for nudging an item one slot within its setlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

//! Durable local copies of the server view and the pending queue
//!
//! Both records live in the host's [`SettingsStore`] as JSON strings. Reads
//! are forgiving: anything missing or unreadable comes back as "nothing
//! saved" so a corrupt record never blocks startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use bridge_traits::storage::SettingsStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use core_library::{RepertoireState, SetlistDetail, SetlistId, Setlist, Song};

use crate::error::Result;
use crate::mutation::PendingMutation;

pub const SNAPSHOT_KEY: &str = "setlive_offline_snapshot_v1";
pub const PENDING_MUTATIONS_KEY: &str = "setlive_pending_mutations_v1";

/// Last server-confirmed repertoire plus the selected setlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSnapshot {
    #[serde(default)]
    pub songs: Vec<Song>,
    #[serde(default)]
    pub setlists: Vec<Setlist>,
    #[serde(default)]
    pub active_setlist_id: Option<SetlistId>,
    #[serde(default)]
    pub setlist_details_by_id: BTreeMap<SetlistId, SetlistDetail>,
    pub updated_at: DateTime<Utc>,
}

impl OfflineSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            songs: Vec::new(),
            setlists: Vec::new(),
            active_setlist_id: None,
            setlist_details_by_id: BTreeMap::new(),
            updated_at: now,
        }
    }

    /// Captures a state that holds only confirmed server data.
    pub fn from_state(state: &RepertoireState, now: DateTime<Utc>) -> Self {
        Self {
            songs: state.songs(),
            setlists: state.setlists(),
            active_setlist_id: state.active_setlist_id(),
            setlist_details_by_id: state
                .details()
                .into_iter()
                .map(|detail| (detail.id, detail))
                .collect(),
            updated_at: now,
        }
    }

    pub fn to_state(&self) -> RepertoireState {
        RepertoireState::from_parts(
            self.songs.clone(),
            self.setlists.clone(),
            self.setlist_details_by_id.values().cloned(),
            self.active_setlist_id,
        )
    }
}

/// Reads and writes the two offline records.
#[derive(Clone)]
pub struct SnapshotStore {
    settings: Arc<dyn SettingsStore>,
}

impl SnapshotStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.settings.get_string(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read offline record");
                None
            }
        }
    }

    pub async fn load(&self) -> Option<OfflineSnapshot> {
        let raw = self.read(SNAPSHOT_KEY).await?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable offline snapshot");
                None
            }
        }
    }

    pub async fn save(&self, snapshot: &OfflineSnapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.settings.set_string(SNAPSHOT_KEY, &raw).await?;
        debug!(
            songs = snapshot.songs.len(),
            setlists = snapshot.setlists.len(),
            "Saved offline snapshot"
        );
        Ok(())
    }

    /// Stores the selected setlist without touching the confirmed data.
    pub async fn save_active(&self, active: Option<SetlistId>, now: DateTime<Utc>) -> Result<()> {
        let mut snapshot = self
            .load()
            .await
            .unwrap_or_else(|| OfflineSnapshot::empty(now));
        snapshot.active_setlist_id = active;
        self.save(&snapshot).await
    }

    pub async fn load_pending(&self) -> Vec<PendingMutation> {
        let Some(raw) = self.read(PENDING_MUTATIONS_KEY).await else {
            return Vec::new();
        };

        let entries = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                warn!("Pending mutation record is not a list, ignoring it");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable pending mutations");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<PendingMutation>(entry) {
                Ok(pending) => Some(pending),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable pending mutation");
                    None
                }
            })
            .collect()
    }

    pub async fn save_pending(&self, pending: &[PendingMutation]) -> Result<()> {
        let raw = serde_json::to_string(pending)?;
        self.settings.set_string(PENDING_MUTATIONS_KEY, &raw).await?;
        Ok(())
    }
}

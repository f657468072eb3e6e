use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cap on how many rooms the store keeps
pub const MAX_RECENT_ROOMS: usize = 5;

/// One remembered room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentRoom {
    pub room_id: String,
    pub name: String,
    pub room_code: String,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Persisted list of recently-joined rooms, newest first, capped at
/// [`MAX_RECENT_ROOMS`]. Entries whose expiry has passed are pruned before
/// they are ever shown.
pub struct RecentRooms {
    path: PathBuf,
}

impl RecentRooms {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the list, pruning expired entries. A missing or unreadable file
    /// is an empty list, not an error.
    pub fn load(&self, now: DateTime<Utc>) -> Vec<RecentRoom> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        let entries: Vec<RecentRoom> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding unreadable recent-rooms file");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter(|room| room.expires_at > now)
            .collect()
    }

    /// Record a joined room at the front of the list
    pub fn remember(&self, entry: RecentRoom) -> Result<()> {
        let now = entry.last_accessed;
        let mut entries = self.load(now);
        entries.retain(|room| room.room_id != entry.room_id);
        entries.insert(0, entry);
        entries.truncate(MAX_RECENT_ROOMS);
        self.save(&entries)
    }

    pub fn forget(&self, room_id: &str) -> Result<()> {
        let mut entries = self.load(Utc::now());
        entries.retain(|room| room.room_id != room_id);
        self.save(&entries)
    }

    fn save(&self, entries: &[RecentRoom]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

//! Global activity log.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::{ActivityId, SpaceId};
use crate::model::{Account, Role};

/// Maximum entries kept across all spaces.
pub const DEFAULT_ACTIVITY_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityEntry {
    pub id: ActivityId,
    pub space_id: SpaceId,
    pub message: String,
    pub actor_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// One global log, newest first, truncated to `cap` entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    #[serde(skip, default = "default_cap")]
    cap: usize,
}

fn default_cap() -> usize {
    DEFAULT_ACTIVITY_CAP
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_cap(DEFAULT_ACTIVITY_CAP)
    }
}

impl ActivityLog {
    /// A zero cap is raised to one so the latest entry is always retained.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self { entries: VecDeque::new(), cap: cap.max(1) }
    }

    /// Re-apply a cap to a log restored from storage.
    #[must_use]
    pub fn capped(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self.entries.truncate(self.cap);
        self
    }

    pub fn record(
        &mut self,
        space_id: SpaceId,
        actor_name: impl Into<String>,
        message: impl Into<String>,
        timestamp: OffsetDateTime,
    ) -> &ActivityEntry {
        self.entries.push_front(ActivityEntry {
            id: ActivityId::generate(),
            space_id,
            message: message.into(),
            actor_name: actor_name.into(),
            timestamp,
        });
        self.entries.truncate(self.cap);
        &self.entries[0]
    }

    #[must_use]
    pub fn entries(&self) -> Vec<&ActivityEntry> {
        self.entries.iter().collect()
    }

    /// Entries the viewer may read: root sees everything, everyone else only
    /// the entries of `active_space`.
    #[must_use]
    pub fn visible_to(&self, viewer: &Account, active_space: &SpaceId) -> Vec<&ActivityEntry> {
        self.entries
            .iter()
            .filter(|entry| viewer.role == Role::Root || &entry.space_id == active_space)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

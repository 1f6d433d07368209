//! Space registry. The master space is implicit.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::{AccountId, SpaceId};
use crate::model::{Space, DEFAULT_ACCENT_COLOR};
use crate::TrackerError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSpace {
    pub display_name: String,
    #[serde(default)]
    pub accent_color: Option<String>,
    pub seat_limit: u32,
}

impl NewSpace {
    /// Build a space with a generated id.
    ///
    /// # Errors
    /// Returns `TrackerError::Validation` for blank names or malformed colours.
    pub fn into_space(self, created_at: OffsetDateTime) -> Result<Space, TrackerError> {
        let display_name = self.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(TrackerError::Validation("space name must not be empty".to_string()));
        }
        let accent_color = self.accent_color.unwrap_or_else(|| DEFAULT_ACCENT_COLOR.to_string());
        validate_color(&accent_color)?;
        Ok(Space {
            id: SpaceId::generate(),
            display_name,
            accent_color,
            seat_limit: self.seat_limit,
            created_at,
            manager_id: None,
        })
    }
}

/// Accept `#rgb` and `#rrggbb` hex colours.
///
/// # Errors
/// Returns `TrackerError::Validation` for anything else.
pub fn validate_color(color: &str) -> Result<(), TrackerError> {
    let hex = color.strip_prefix('#').unwrap_or_default();
    let valid = matches!(hex.len(), 3 | 6) && hex.chars().all(|ch| ch.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(TrackerError::Validation(format!("invalid colour `{color}`")))
    }
}

/// Registered spaces. The master space is implicit and never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SpaceRegistry {
    spaces: Vec<Space>,
}

impl SpaceRegistry {
    #[must_use]
    pub fn from_spaces(spaces: Vec<Space>) -> Self {
        Self { spaces: spaces.into_iter().filter(|space| !space.id.is_master()).collect() }
    }

    /// Registered spaces, without the master space.
    #[must_use]
    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    /// Every space including the master space, master first.
    #[must_use]
    pub fn all(&self) -> Vec<Space> {
        std::iter::once(Space::master()).chain(self.spaces.iter().cloned()).collect()
    }

    #[must_use]
    pub fn contains(&self, id: &SpaceId) -> bool {
        id.is_master() || self.spaces.iter().any(|space| &space.id == id)
    }

    #[must_use]
    pub fn get(&self, id: &SpaceId) -> Option<Space> {
        if id.is_master() {
            return Some(Space::master());
        }
        self.spaces.iter().find(|space| &space.id == id).cloned()
    }

    #[must_use]
    pub fn display_name(&self, id: &SpaceId) -> String {
        self.get(id).map_or_else(|| id.to_string(), |space| space.display_name)
    }

    /// # Errors
    /// Returns `Conflict` when the id is taken or is the master id.
    pub fn insert(&mut self, space: Space) -> Result<(), TrackerError> {
        if self.contains(&space.id) {
            return Err(TrackerError::Conflict(format!("space {} already exists", space.id)));
        }
        self.spaces.push(space);
        Ok(())
    }

    /// # Errors
    /// Returns `NotFound` for unknown ids and `Validation` for the master space.
    pub fn replace(&mut self, space: Space) -> Result<(), TrackerError> {
        if space.id.is_master() {
            return Err(TrackerError::Validation("the master space is not editable".to_string()));
        }
        validate_color(&space.accent_color)?;
        let slot = self
            .spaces
            .iter_mut()
            .find(|existing| existing.id == space.id)
            .ok_or_else(|| TrackerError::NotFound(format!("space {}", space.id)))?;
        *slot = space;
        Ok(())
    }

    pub fn set_manager(&mut self, id: &SpaceId, manager_id: Option<AccountId>) -> bool {
        match self.spaces.iter_mut().find(|space| &space.id == id) {
            Some(space) => {
                space.manager_id = manager_id;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &SpaceId) -> Option<Space> {
        let index = self.spaces.iter().position(|space| &space.id == id)?;
        Some(self.spaces.remove(index))
    }
}

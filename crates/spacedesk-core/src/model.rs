//! Domain records: accounts, spaces, day records and their parts.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::authority::Capability;
use crate::ids::{AccountId, DateKey, MediaId, SpaceId, TaskId};
use crate::secret::PasswordSecret;
use crate::TrackerError;

/// Account id carried by the configured bootstrap root identity. It never
/// appears in the identity store.
pub const BOOTSTRAP_ROOT_ID: &str = "root_bootstrap";

/// Display name of the implicit master space.
pub const MASTER_SPACE_NAME: &str = "General Administration";

pub const DEFAULT_ACCENT_COLOR: &str = "#4f46e5";

/// Four-tier role hierarchy. Variant order is rank order (member lowest).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Manager,
    Admin,
    Root,
}

impl Role {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Member => 1,
            Self::Manager => 2,
            Self::Admin => 3,
            Self::Root => 4,
        }
    }

    /// Strictly higher in the hierarchy than `other`.
    #[must_use]
    pub fn outranks(self, other: Self) -> bool {
        self.rank() > other.rank()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::Root => "root",
        }
    }

    /// Parse a role name, accepting the legacy names still found in remote rows
    /// (`super-admin`, `user`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "member" | "user" => Some(Self::Member),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            "root" | "super-admin" => Some(Self::Root),
            _ => None,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub display_name: String,
    pub password_secret: PasswordSecret,
    pub role: Role,
    pub home_space_id: SpaceId,
    pub active: bool,
    /// Applied after the role defaults: `true` grants, `false` revokes.
    #[serde(default)]
    pub permission_overrides: BTreeMap<Capability, bool>,
}

impl Account {
    #[must_use]
    pub fn is_bootstrap_root(&self) -> bool {
        self.id.as_str() == BOOTSTRAP_ROOT_ID
    }

    /// Validate the shape of an account before it enters the identity store.
    ///
    /// # Errors
    /// Returns `TrackerError::Validation` for blank usernames, whitespace in
    /// usernames, or blank display names.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.username.is_empty() {
            return Err(TrackerError::Validation("username must not be empty".to_string()));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(TrackerError::Validation("username must not contain whitespace".to_string()));
        }
        if self.display_name.trim().is_empty() {
            return Err(TrackerError::Validation("display name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Minimum length of a username chosen through self-service profile edits.
pub const MIN_PROFILE_USERNAME_LEN: usize = 3;

/// Rule for usernames an account picks for itself.
///
/// # Errors
/// Returns `TrackerError::Validation` for usernames shorter than
/// [`MIN_PROFILE_USERNAME_LEN`] characters.
pub fn validate_profile_username(username: &str) -> Result<(), TrackerError> {
    if username.trim().chars().count() < MIN_PROFILE_USERNAME_LEN {
        return Err(TrackerError::Validation(format!(
            "username must be at least {MIN_PROFILE_USERNAME_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Space {
    pub id: SpaceId,
    pub display_name: String,
    pub accent_color: String,
    pub seat_limit: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub manager_id: Option<AccountId>,
}

impl Space {
    /// The implicit master space. Its seat limit is never consulted.
    #[must_use]
    pub fn master() -> Self {
        Self {
            id: SpaceId::master(),
            display_name: MASTER_SPACE_NAME.to_string(),
            accent_color: DEFAULT_ACCENT_COLOR.to_string(),
            seat_limit: u32::MAX,
            created_at: OffsetDateTime::UNIX_EPOCH,
            manager_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    /// Classify an attachment from its MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else {
            Self::File
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MediaItem {
    pub id: MediaId,
    pub kind: MediaKind,
    pub payload_ref: String,
    pub display_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl MediaItem {
    #[must_use]
    pub fn new(
        kind: MediaKind,
        payload_ref: impl Into<String>,
        display_name: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: MediaId::generate(),
            kind,
            payload_ref: payload_ref.into(),
            display_name: display_name.into(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    pub completed: bool,
    #[serde(default)]
    pub completed_by: Option<AccountId>,
    #[serde(default)]
    pub completed_by_name: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Task {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            text: text.into(),
            completed: false,
            completed_by: None,
            completed_by_name: None,
            completed_at: None,
        }
    }
}

/// Notes, tasks and media for one date inside one space.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DayRecord {
    pub date_key: DateKey,
    pub space_id: SpaceId,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl DayRecord {
    #[must_use]
    pub fn empty(space_id: SpaceId, date_key: DateKey) -> Self {
        Self { date_key, space_id, notes: String::new(), tasks: Vec::new(), media: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.trim().is_empty() && self.tasks.is_empty() && self.media.is_empty()
    }

    /// Append a task and return its id.
    ///
    /// # Errors
    /// Returns `TrackerError::Validation` when the text is blank.
    pub fn add_task(&mut self, text: &str) -> Result<TaskId, TrackerError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TrackerError::Validation("task text must not be empty".to_string()));
        }
        let task = Task::new(text);
        let id = task.id.clone();
        self.tasks.push(task);
        Ok(id)
    }

    /// Flip a task's completion. Completing stamps who and when; reopening clears both.
    /// Returns the new completion state.
    ///
    /// # Errors
    /// Returns `TrackerError::NotFound` when no task carries `task_id`.
    pub fn toggle_task(
        &mut self,
        task_id: &TaskId,
        actor: &Account,
        now: OffsetDateTime,
    ) -> Result<bool, TrackerError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| &task.id == task_id)
            .ok_or_else(|| TrackerError::NotFound(format!("task {task_id}")))?;
        task.completed = !task.completed;
        if task.completed {
            task.completed_by = Some(actor.id.clone());
            task.completed_by_name = Some(actor.display_name.clone());
            task.completed_at = Some(now);
        } else {
            task.completed_by = None;
            task.completed_by_name = None;
            task.completed_at = None;
        }
        Ok(task.completed)
    }

    pub fn remove_task(&mut self, task_id: &TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| &task.id != task_id);
        self.tasks.len() != before
    }

    pub fn attach_media(&mut self, item: MediaItem) {
        self.media.push(item);
    }

    pub fn remove_media(&mut self, media_id: &MediaId) -> bool {
        let before = self.media.len();
        self.media.retain(|item| &item.id != media_id);
        self.media.len() != before
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SystemSettings {
    pub primary_color: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self { primary_color: DEFAULT_ACCENT_COLOR.to_string() }
    }
}

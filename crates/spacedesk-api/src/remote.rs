//! Remote backend rows and transports.
//!
//! The remote is a PostgREST-style table API with `profiles`, `spaces` and
//! `day_records` tables. [`HttpRemoteStore`] talks to it over HTTP;
//! [`InMemoryRemoteStore`] stands in for it in tests and offline demos.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use spacedesk_core::{
    Account, AccountId, Capability, DateKey, DayRecord, MediaItem, PasswordSecret, Role, Space,
    SpaceId, Task, DEFAULT_ACCENT_COLOR,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::RemoteConfig;

pub const PROFILES_TABLE: &str = "profiles";
pub const SPACES_TABLE: &str = "spaces";
pub const DAY_RECORDS_TABLE: &str = "day_records";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed remote payload: {0}")]
    Malformed(String),
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub password: String,
    pub role: String,
    pub space_id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub permissions: Option<BTreeMap<String, bool>>,
}

fn default_true() -> bool {
    true
}

/// Role names written to `profiles.role`. Member and root keep the names
/// older clients sharing the table recognise; manager has no older name.
#[must_use]
pub fn profile_role_name(role: Role) -> &'static str {
    match role {
        Role::Member => "user",
        Role::Manager => "manager",
        Role::Admin => "admin",
        Role::Root => "super-admin",
    }
}

impl ProfileRow {
    #[must_use]
    pub fn from_account(account: &Account) -> Self {
        let permissions = (!account.permission_overrides.is_empty()).then(|| {
            account
                .permission_overrides
                .iter()
                .map(|(capability, granted)| (capability.as_str().to_string(), *granted))
                .collect()
        });
        Self {
            id: account.id.to_string(),
            username: account.username.clone(),
            full_name: account.display_name.clone(),
            password: account.password_secret.as_stored().to_string(),
            role: profile_role_name(account.role).to_string(),
            space_id: account.home_space_id.to_string(),
            is_active: account.active,
            permissions,
        }
    }

    /// # Errors
    /// Returns `RemoteError::Malformed` for unknown roles.
    pub fn into_account(self) -> Result<Account, RemoteError> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| RemoteError::Malformed(format!("profile {} has role `{}`", self.id, self.role)))?;
        let mut permission_overrides = BTreeMap::new();
        for (name, granted) in self.permissions.unwrap_or_default() {
            match Capability::parse(&name) {
                Some(capability) => {
                    permission_overrides.insert(capability, granted);
                }
                None => tracing::debug!(profile = %self.id, permission = %name, "ignoring unknown permission"),
            }
        }
        let space_id = if self.space_id.trim().is_empty() {
            SpaceId::master()
        } else {
            SpaceId::from_raw(self.space_id)
        };
        Ok(Account {
            id: AccountId::from_raw(self.id),
            username: spacedesk_core::normalize_username(&self.username),
            display_name: self.full_name,
            password_secret: PasswordSecret::from_stored(self.password),
            role,
            home_space_id: space_id,
            active: self.is_active,
            permission_overrides,
        })
    }
}

/// Row of the `spaces` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpaceRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub user_limit: u32,
    pub created_at: String,
    #[serde(default)]
    pub manager_id: Option<String>,
}

impl SpaceRow {
    #[must_use]
    pub fn from_space(space: &Space) -> Self {
        Self {
            id: space.id.to_string(),
            name: space.display_name.clone(),
            primary_color: Some(space.accent_color.clone()),
            user_limit: space.seat_limit,
            created_at: space.created_at.format(&Rfc3339).unwrap_or_default(),
            manager_id: space.manager_id.as_ref().map(ToString::to_string),
        }
    }

    /// # Errors
    /// Returns `RemoteError::Malformed` when `created_at` is not RFC 3339.
    pub fn into_space(self) -> Result<Space, RemoteError> {
        let created_at = OffsetDateTime::parse(&self.created_at, &Rfc3339).map_err(|err| {
            RemoteError::Malformed(format!("space {} created_at: {err}", self.id))
        })?;
        Ok(Space {
            id: SpaceId::from_raw(self.id),
            display_name: self.name,
            accent_color: self
                .primary_color
                .filter(|color| spacedesk_core::validate_color(color).is_ok())
                .unwrap_or_else(|| DEFAULT_ACCENT_COLOR.to_string()),
            seat_limit: self.user_limit,
            created_at,
            manager_id: self.manager_id.filter(|id| !id.is_empty()).map(AccountId::from_raw),
        })
    }
}

/// Row of the `day_records` table. Tasks and media travel as JSON columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayRecordRow {
    pub space_id: String,
    pub date_key: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl DayRecordRow {
    #[must_use]
    pub fn from_record(record: &DayRecord) -> Self {
        Self {
            space_id: record.space_id.to_string(),
            date_key: record.date_key.to_string(),
            notes: record.notes.clone(),
            tasks: record.tasks.clone(),
            media: record.media.clone(),
        }
    }

    /// # Errors
    /// Returns `RemoteError::Malformed` for unparseable date keys.
    pub fn into_record(self) -> Result<DayRecord, RemoteError> {
        let date_key = DateKey::parse(&self.date_key)
            .map_err(|err| RemoteError::Malformed(format!("day record date: {err}")))?;
        Ok(DayRecord {
            date_key,
            space_id: SpaceId::from_raw(self.space_id),
            notes: self.notes,
            tasks: self.tasks,
            media: self.media,
        })
    }
}

/// One queued write against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMutation {
    UpsertProfile(ProfileRow),
    DeleteProfile(String),
    UpsertSpace(SpaceRow),
    DeleteSpace(String),
    UpsertDayRecord(DayRecordRow),
}

impl RemoteMutation {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpsertProfile(_) => "upsert_profile",
            Self::DeleteProfile(_) => "delete_profile",
            Self::UpsertSpace(_) => "upsert_space",
            Self::DeleteSpace(_) => "delete_space",
            Self::UpsertDayRecord(_) => "upsert_day_record",
        }
    }

    #[must_use]
    pub fn is_day_record(&self) -> bool {
        matches!(self, Self::UpsertDayRecord(_))
    }
}

/// Blocking table access. Called from `spawn_blocking`, never on the runtime.
pub trait RemoteStore: Send + Sync {
    /// # Errors
    /// Returns a `RemoteError` when the table cannot be read.
    fn fetch_profiles(&self) -> Result<Vec<ProfileRow>, RemoteError>;

    /// # Errors
    /// Returns a `RemoteError` when the table cannot be read.
    fn fetch_spaces(&self) -> Result<Vec<SpaceRow>, RemoteError>;

    /// # Errors
    /// Returns a `RemoteError` when the table cannot be read.
    fn fetch_day_records(&self) -> Result<Vec<DayRecordRow>, RemoteError>;

    /// # Errors
    /// Returns a `RemoteError` when the write does not land.
    fn apply(&self, mutation: &RemoteMutation) -> Result<(), RemoteError>;
}

pub struct HttpRemoteStore {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl HttpRemoteStore {
    #[must_use]
    pub fn new(config: &RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout_read(Duration::from_millis(config.request_timeout_ms))
            .timeout_write(Duration::from_millis(config.request_timeout_ms))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, method: &str, table: &str) -> ureq::Request {
        self.agent
            .request(method, &self.table_url(table))
            .set("apikey", &self.api_key)
            .set("authorization", &format!("Bearer {}", self.api_key))
            .set("accept", "application/json")
    }

    fn select_all<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, RemoteError> {
        let response = self.request("GET", table).query("select", "*").call().map_err(map_error)?;
        response
            .into_json::<Vec<T>>()
            .map_err(|err| RemoteError::Malformed(format!("{table}: {err}")))
    }

    fn upsert<T: Serialize>(&self, table: &str, on_conflict: &str, row: &T) -> Result<(), RemoteError> {
        self.request("POST", table)
            .query("on_conflict", on_conflict)
            .set("content-type", "application/json")
            .set("prefer", "resolution=merge-duplicates,return=minimal")
            .send_json(row)
            .map_err(map_error)?;
        Ok(())
    }

    fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        self.request("DELETE", table)
            .query("id", &format!("eq.{id}"))
            .call()
            .map_err(map_error)?;
        Ok(())
    }
}

fn map_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => RemoteError::Rejected {
            status,
            message: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => RemoteError::Unavailable(transport.to_string()),
    }
}

impl RemoteStore for HttpRemoteStore {
    fn fetch_profiles(&self) -> Result<Vec<ProfileRow>, RemoteError> {
        self.select_all(PROFILES_TABLE)
    }

    fn fetch_spaces(&self) -> Result<Vec<SpaceRow>, RemoteError> {
        self.select_all(SPACES_TABLE)
    }

    fn fetch_day_records(&self) -> Result<Vec<DayRecordRow>, RemoteError> {
        self.select_all(DAY_RECORDS_TABLE)
    }

    fn apply(&self, mutation: &RemoteMutation) -> Result<(), RemoteError> {
        match mutation {
            RemoteMutation::UpsertProfile(row) => self.upsert(PROFILES_TABLE, "id", row),
            RemoteMutation::DeleteProfile(id) => self.delete(PROFILES_TABLE, id),
            RemoteMutation::UpsertSpace(row) => self.upsert(SPACES_TABLE, "id", row),
            RemoteMutation::DeleteSpace(id) => self.delete(SPACES_TABLE, id),
            RemoteMutation::UpsertDayRecord(row) => {
                self.upsert(DAY_RECORDS_TABLE, "space_id,date_key", row)
            }
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryTables {
    profiles: BTreeMap<String, ProfileRow>,
    spaces: BTreeMap<String, SpaceRow>,
    day_records: BTreeMap<(String, String), DayRecordRow>,
    applied: usize,
}

/// Shared in-process remote. Clients pointed at the same instance observe
/// each other's writes, last write wins.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    tables: Mutex<InMemoryTables>,
    offline: AtomicBool,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `RemoteError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub fn seed_profile(&self, row: ProfileRow) {
        self.tables.lock().profiles.insert(row.id.clone(), row);
    }

    pub fn seed_space(&self, row: SpaceRow) {
        self.tables.lock().spaces.insert(row.id.clone(), row);
    }

    #[must_use]
    pub fn profiles(&self) -> Vec<ProfileRow> {
        self.tables.lock().profiles.values().cloned().collect()
    }

    #[must_use]
    pub fn spaces(&self) -> Vec<SpaceRow> {
        self.tables.lock().spaces.values().cloned().collect()
    }

    #[must_use]
    pub fn day_record(&self, space_id: &str, date_key: &str) -> Option<DayRecordRow> {
        self.tables.lock().day_records.get(&(space_id.to_string(), date_key.to_string())).cloned()
    }

    /// Number of mutations that landed.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.tables.lock().applied
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.is_offline() {
            return Err(RemoteError::Unavailable("in-memory remote is offline".to_string()));
        }
        Ok(())
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn fetch_profiles(&self) -> Result<Vec<ProfileRow>, RemoteError> {
        self.ensure_online()?;
        Ok(self.profiles())
    }

    fn fetch_spaces(&self) -> Result<Vec<SpaceRow>, RemoteError> {
        self.ensure_online()?;
        Ok(self.spaces())
    }

    fn fetch_day_records(&self) -> Result<Vec<DayRecordRow>, RemoteError> {
        self.ensure_online()?;
        Ok(self.tables.lock().day_records.values().cloned().collect())
    }

    fn apply(&self, mutation: &RemoteMutation) -> Result<(), RemoteError> {
        self.ensure_online()?;
        let mut tables = self.tables.lock();
        match mutation {
            RemoteMutation::UpsertProfile(row) => {
                tables.profiles.insert(row.id.clone(), row.clone());
            }
            RemoteMutation::DeleteProfile(id) => {
                tables.profiles.remove(id);
            }
            RemoteMutation::UpsertSpace(row) => {
                tables.spaces.insert(row.id.clone(), row.clone());
            }
            RemoteMutation::DeleteSpace(id) => {
                tables.spaces.remove(id);
            }
            RemoteMutation::UpsertDayRecord(row) => {
                tables
                    .day_records
                    .insert((row.space_id.clone(), row.date_key.clone()), row.clone());
            }
        }
        tables.applied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_profile() -> ProfileRow {
        ProfileRow {
            id: "usr_legacy".to_string(),
            username: " Noura ".to_string(),
            full_name: "Noura".to_string(),
            password: "pass123".to_string(),
            role: "user".to_string(),
            space_id: String::new(),
            is_active: true,
            permissions: Some(BTreeMap::from([
                ("view_media".to_string(), false),
                ("can_fly".to_string(), true),
            ])),
        }
    }

    #[test]
    fn legacy_profiles_decode_into_accounts() -> Result<(), RemoteError> {
        let account = legacy_profile().into_account()?;
        assert_eq!(account.username, "noura");
        assert_eq!(account.role, Role::Member);
        assert!(account.home_space_id.is_master());
        assert!(account.password_secret.verify("pass123"));
        assert_eq!(account.permission_overrides.get(&Capability::ViewMedia), Some(&false));
        assert_eq!(account.permission_overrides.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_roles_are_malformed() {
        let mut row = legacy_profile();
        row.role = "owner".to_string();
        assert!(matches!(row.into_account(), Err(RemoteError::Malformed(_))));
    }

    #[test]
    fn profile_rows_carry_overrides_only_when_present() -> Result<(), RemoteError> {
        let mut account = legacy_profile().into_account()?;
        assert!(ProfileRow::from_account(&account).permissions.is_some());
        account.permission_overrides.clear();
        let row = ProfileRow::from_account(&account);
        assert_eq!(row.permissions, None);
        assert_eq!(row.role, "user");
        assert_eq!(row.space_id, "master_space");
        Ok(())
    }

    #[test]
    fn profile_rows_use_the_shared_role_names() -> Result<(), RemoteError> {
        let mut account = legacy_profile().into_account()?;
        for (role, written) in [
            (Role::Member, "user"),
            (Role::Manager, "manager"),
            (Role::Admin, "admin"),
            (Role::Root, "super-admin"),
        ] {
            account.role = role;
            let row = ProfileRow::from_account(&account);
            assert_eq!(row.role, written);
            assert_eq!(row.into_account()?.role, role);
        }
        Ok(())
    }

    #[test]
    fn space_rows_fall_back_to_the_default_colour() -> Result<(), RemoteError> {
        let row = SpaceRow {
            id: "spc_riyadh".to_string(),
            name: "Riyadh".to_string(),
            primary_color: Some("teal".to_string()),
            user_limit: 3,
            created_at: "2024-05-01T08:00:00Z".to_string(),
            manager_id: Some(String::new()),
        };
        let space = row.into_space()?;
        assert_eq!(space.accent_color, DEFAULT_ACCENT_COLOR);
        assert_eq!(space.manager_id, None);
        assert_eq!(SpaceRow::from_space(&space).created_at, "2024-05-01T08:00:00Z");
        Ok(())
    }

    #[test]
    fn in_memory_remote_honours_the_offline_switch() -> Result<(), RemoteError> {
        let remote = InMemoryRemoteStore::new();
        remote.apply(&RemoteMutation::UpsertProfile(legacy_profile()))?;
        remote.set_offline(true);
        assert!(matches!(remote.fetch_profiles(), Err(RemoteError::Unavailable(_))));
        assert!(remote.apply(&RemoteMutation::DeleteProfile("usr_legacy".to_string())).is_err());
        remote.set_offline(false);
        assert_eq!(remote.fetch_profiles()?.len(), 1);
        assert_eq!(remote.applied_count(), 1);
        Ok(())
    }

    #[test]
    fn day_record_upserts_replace_by_address() -> Result<(), RemoteError> {
        let remote = InMemoryRemoteStore::new();
        let mut row = DayRecordRow {
            space_id: "spc_riyadh".to_string(),
            date_key: "2024-05-01".to_string(),
            notes: "first".to_string(),
            tasks: Vec::new(),
            media: Vec::new(),
        };
        remote.apply(&RemoteMutation::UpsertDayRecord(row.clone()))?;
        row.notes = "second".to_string();
        remote.apply(&RemoteMutation::UpsertDayRecord(row))?;
        assert_eq!(remote.fetch_day_records()?.len(), 1);
        assert_eq!(
            remote.day_record("spc_riyadh", "2024-05-01").map(|r| r.notes),
            Some("second".to_string())
        );
        Ok(())
    }
}

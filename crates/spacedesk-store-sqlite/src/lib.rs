//! Local cache for SpaceDesk: namespaced JSON blobs in one SQLite table.
//!
//! Blobs carry no schema version. A blob that fails to decode is treated as
//! absent and the caller receives the type's default; opening the cache never
//! fails because of blob contents.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use spacedesk_core::{
    ActivityLog, IdentityStore, PartitionedRecordStore, SpaceRegistry, SystemSettings,
};
use time::OffsetDateTime;

pub const DEFAULT_NAMESPACE: &str = "spacedesk";

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS cache_entries (
  cache_key TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

/// Well-known blob keys.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CacheKey {
    DayRecords,
    Spaces,
    Accounts,
    Settings,
    Activity,
    Session,
}

impl CacheKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DayRecords => "day_records",
            Self::Spaces => "spaces",
            Self::Accounts => "accounts",
            Self::Settings => "settings",
            Self::Activity => "activity",
            Self::Session => "session",
        }
    }
}

/// Everything the client keeps locally, decoded with defaults for anything
/// missing or unreadable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub day_records: PartitionedRecordStore,
    pub spaces: SpaceRegistry,
    pub accounts: IdentityStore,
    pub settings: SystemSettings,
    pub activity: ActivityLog,
}

pub struct LocalCache {
    conn: Connection,
    namespace: String,
}

impl LocalCache {
    /// Open (or create) the cache database and apply migrations.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, configured or migrated.
    pub fn open(path: &Path, namespace: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite cache at {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;
        Self::with_connection(conn, namespace)
    }

    /// In-memory cache, used by tests and by clients that opt out of persistence.
    ///
    /// # Errors
    /// Returns an error when the in-memory database cannot be created.
    pub fn open_in_memory(namespace: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        Self::with_connection(conn, namespace)
    }

    fn with_connection(conn: Connection, namespace: &str) -> Result<Self> {
        let namespace = namespace.trim();
        if namespace.is_empty() || namespace.contains(':') {
            return Err(anyhow!("invalid cache namespace `{namespace}`"));
        }
        let mut cache = Self { conn, namespace: namespace.to_string() };
        cache.migrate()?;
        Ok(cache)
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// # Errors
    /// Returns an error when the migrations table cannot be read.
    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }

    fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let version = current_schema_version(&self.conn)?;
        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 1")?;
        }
        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported cache schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }
        Ok(())
    }

    fn scoped_key(&self, key: CacheKey) -> String {
        format!("{}:{}", self.namespace, key.as_str())
    }

    /// Raw blob lookup.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or the blob does not decode.
    pub fn try_load<T: DeserializeOwned>(&self, key: CacheKey) -> Result<Option<T>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM cache_entries WHERE cache_key = ?1",
                params![self.scoped_key(key)],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read cache entry {}", key.as_str()))?;
        payload
            .map(|json| {
                serde_json::from_str(&json)
                    .with_context(|| format!("failed to decode cache entry {}", key.as_str()))
            })
            .transpose()
    }

    /// Lenient lookup: missing or unreadable blobs come back as `None`.
    #[must_use]
    pub fn load_optional<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        match self.try_load(key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    key = key.as_str(),
                    namespace = %self.namespace,
                    error = %format!("{err:#}"),
                    "discarding unreadable cache entry"
                );
                None
            }
        }
    }

    /// Lenient lookup falling back to `T::default()`.
    #[must_use]
    pub fn load<T: DeserializeOwned + Default>(&self, key: CacheKey) -> T {
        self.load_optional(key).unwrap_or_default()
    }

    /// # Errors
    /// Returns an error when the value cannot be encoded or written.
    pub fn save<T: Serialize>(&mut self, key: CacheKey, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)
            .with_context(|| format!("failed to encode cache entry {}", key.as_str()))?;
        self.conn
            .execute(
                "INSERT INTO cache_entries(cache_key, payload_json, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(cache_key) DO UPDATE SET
                   payload_json = excluded.payload_json,
                   updated_at = excluded.updated_at",
                params![self.scoped_key(key), payload, now_rfc3339()?],
            )
            .with_context(|| format!("failed to write cache entry {}", key.as_str()))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the row cannot be deleted.
    pub fn remove(&mut self, key: CacheKey) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM cache_entries WHERE cache_key = ?1",
                params![self.scoped_key(key)],
            )
            .with_context(|| format!("failed to delete cache entry {}", key.as_str()))?;
        Ok(())
    }

    /// Decode every collection, defaulting whatever is absent or corrupt.
    #[must_use]
    pub fn load_snapshot(&self, activity_cap: usize) -> CacheSnapshot {
        CacheSnapshot {
            day_records: self.load(CacheKey::DayRecords),
            spaces: self.load(CacheKey::Spaces),
            accounts: self.load(CacheKey::Accounts),
            settings: self.load(CacheKey::Settings),
            activity: self.load::<ActivityLog>(CacheKey::Activity).capped(activity_cap),
        }
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

//! Domain core for SpaceDesk: tenants ("spaces"), accounts, role resolution,
//! day records and the activity log.
//!
//! Everything in this crate is pure in-memory state. Persistence lives in
//! `spacedesk-store-sqlite` and remote reconciliation in `spacedesk-api`.

pub mod activity;
pub mod authority;
pub mod identity;
pub mod ids;
pub mod insights;
pub mod model;
pub mod quota;
pub mod records;
pub mod secret;
pub mod spaces;

pub use activity::{ActivityEntry, ActivityLog, DEFAULT_ACTIVITY_CAP};
pub use authority::{AccessDenied, Capability, RoleAuthority};
pub use identity::{normalize_username, IdentityStore, NewAccount};
pub use ids::{AccountId, ActivityId, DateKey, MediaId, SpaceId, TaskId, MASTER_SPACE_ID};
pub use insights::{
    reminders, space_statistics, Reminder, SpaceStatistics, StatisticsReport,
    DEFAULT_REMINDER_WINDOW_DAYS,
};
pub use model::{
    Account, DayRecord, MediaItem, MediaKind, Role, Space, SystemSettings, Task, BOOTSTRAP_ROOT_ID,
    DEFAULT_ACCENT_COLOR, MASTER_SPACE_NAME,
};
pub use model::{validate_profile_username, MIN_PROFILE_USERNAME_LEN};
pub use quota::QuotaEnforcer;
pub use records::PartitionedRecordStore;
pub use secret::PasswordSecret;
pub use spaces::{validate_color, NewSpace, SpaceRegistry};

/// Errors raised by domain operations.
///
/// Authorization failures carry the reason (`CapabilityDenied` vs `ScopeDenied`)
/// so audit logging can keep them apart even where callers collapse them to
/// a boolean.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TrackerError {
    #[error("invalid username or password")]
    AuthenticationFailed,
    #[error("account `{username}` is disabled")]
    AccountDisabled { username: String },
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),
    #[error("space {space_id} has no free seats (limit {seat_limit})")]
    QuotaExceeded { space_id: SpaceId, seat_limit: u32 },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("space {0} still owns accounts or day records")]
    SpaceNotEmpty(SpaceId),
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error("the bootstrap root identity cannot be modified")]
    ReservedIdentity,
    #[error("secret hashing failed: {0}")]
    Secret(String),
}

impl TrackerError {
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    #[must_use]
    pub fn is_scope_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(AccessDenied::Scope { .. }))
    }

    #[must_use]
    pub fn is_capability_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(AccessDenied::Capability { .. }))
    }
}

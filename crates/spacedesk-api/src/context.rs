//! Composition root.
//!
//! [`AppContext`] owns the session, the in-memory collections, the local cache
//! and the reconciler. Every actor-facing operation goes through it: gate,
//! mutate the collection, persist the cache blob, record activity, enqueue the
//! remote write.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use spacedesk_core::{
    normalize_username, reminders, space_statistics, validate_color, validate_profile_username,
    AccessDenied, Account, AccountId, ActivityEntry, ActivityLog, Capability, DateKey, DayRecord,
    IdentityStore, MediaId, MediaItem, MediaKind, NewAccount, NewSpace, PartitionedRecordStore,
    PasswordSecret, QuotaEnforcer, Reminder, Role, RoleAuthority, Space, SpaceId, SpaceRegistry,
    StatisticsReport, SystemSettings, TaskId, TrackerError,
};
use spacedesk_store_sqlite::{CacheKey, LocalCache};
use time::{Date, OffsetDateTime};

use crate::config::TrackerConfig;
use crate::remote::{DayRecordRow, HttpRemoteStore, ProfileRow, RemoteMutation, RemoteStore, SpaceRow};
use crate::session::{SessionDescriptor, SessionManager, SessionState};
use crate::sync::{SyncHealth, SyncReconciler};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceUpdate {
    pub display_name: Option<String>,
    pub accent_color: Option<String>,
    pub seat_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub permission_overrides: Option<BTreeMap<Capability, bool>>,
}

/// Self-service changes; never touches role, space or overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn authorize(actor: &Account, capability: Capability, space_id: &SpaceId) -> Result<(), TrackerError> {
    Ok(RoleAuthority::check(actor, capability, space_id)?)
}

fn authorize_over(
    actor: &Account,
    capability: Capability,
    subject_space: &SpaceId,
    subject_role: Role,
) -> Result<(), TrackerError> {
    Ok(RoleAuthority::check_over(actor, capability, subject_space, subject_role)?)
}

pub struct AppContext {
    config: TrackerConfig,
    cache: LocalCache,
    identities: IdentityStore,
    spaces: SpaceRegistry,
    records: PartitionedRecordStore,
    settings: SystemSettings,
    activity: ActivityLog,
    session: SessionManager,
    sync: SyncReconciler,
}

impl AppContext {
    /// Boot against the HTTP remote named in `config`, or offline when none is set.
    ///
    /// # Errors
    /// Returns an error when the local cache cannot be opened.
    pub async fn boot(config: TrackerConfig) -> Result<Self> {
        let remote = config
            .remote()
            .map(|remote| Arc::new(HttpRemoteStore::new(remote)) as Arc<dyn RemoteStore>);
        Self::boot_with(config, remote).await
    }

    /// Open the cache, pull the remote snapshot and restore a persisted session.
    /// A failed pull keeps the cached collections and leaves the context degraded.
    ///
    /// # Errors
    /// Returns an error when the local cache cannot be opened or written.
    pub async fn boot_with(config: TrackerConfig, remote: Option<Arc<dyn RemoteStore>>) -> Result<Self> {
        let cache = match &config.cache_path {
            Some(path) => LocalCache::open(path, &config.namespace)?,
            None => LocalCache::open_in_memory(&config.namespace)?,
        };
        let snapshot = cache.load_snapshot(config.activity_cap);
        let online = remote.is_some();
        let sync = match remote {
            Some(remote) => SyncReconciler::start(remote, config.day_record_sync)?,
            None => SyncReconciler::offline(config.day_record_sync),
        };
        let mut context = Self {
            session: SessionManager::new(config.bootstrap_root.clone()),
            config,
            cache,
            identities: snapshot.accounts,
            spaces: snapshot.spaces,
            records: snapshot.day_records,
            settings: snapshot.settings,
            activity: snapshot.activity,
            sync,
        };
        context.pull_remote().await?;
        context.restore_session();
        tracing::info!(
            namespace = %context.config.namespace,
            accounts = context.identities.len(),
            spaces = context.spaces.spaces().len(),
            online,
            degraded = context.sync.health().degraded,
            "context booted"
        );
        Ok(context)
    }

    /// Replace accounts, spaces and (under the `remote` policy) day records with
    /// the remote's copy. Returns `false` when nothing was pulled.
    ///
    /// # Errors
    /// Returns an error when the refreshed collections cannot be cached.
    pub async fn pull_remote(&mut self) -> Result<bool> {
        let Some(snapshot) = self.sync.pull().await else {
            return Ok(false);
        };
        self.identities = IdentityStore::from_accounts(snapshot.accounts);
        self.spaces = SpaceRegistry::from_spaces(snapshot.spaces);
        self.cache.save(CacheKey::Accounts, &self.identities)?;
        self.cache.save(CacheKey::Spaces, &self.spaces)?;
        if let Some(day_records) = snapshot.day_records {
            let mut records = PartitionedRecordStore::default();
            for record in day_records {
                records.store(record);
            }
            self.records = records;
        }
        let detached = self.records.reconcile_with(&self.spaces);
        if !detached.is_empty() {
            tracing::warn!(
                spaces = ?detached,
                "day records reference spaces missing from the remote; detached until the space returns"
            );
        }
        self.cache.save(CacheKey::DayRecords, &self.records)?;
        if self.session.actor().is_some() && !self.session.refresh(&self.identities) {
            self.forget_session();
        }
        Ok(true)
    }

    fn restore_session(&mut self) {
        let Some(descriptor) = self.cache.load_optional::<SessionDescriptor>(CacheKey::Session) else {
            return;
        };
        if !self.session.restore(&descriptor, &self.identities) {
            self.forget_session();
        }
    }

    fn forget_session(&mut self) {
        if let Err(err) = self.cache.remove(CacheKey::Session) {
            tracing::warn!(error = %format!("{err:#}"), "failed to clear persisted session");
        }
    }

    /// Await remote propagation of everything issued so far.
    pub async fn settle(&self) {
        self.sync.settle().await;
    }

    #[must_use]
    pub fn sync_health(&self) -> SyncHealth {
        self.sync.health()
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    #[must_use]
    pub fn current_actor(&self) -> Option<&Account> {
        self.session.actor()
    }

    #[must_use]
    pub fn active_space(&self) -> Option<&SpaceId> {
        self.session.active_space()
    }

    #[must_use]
    pub fn settings(&self) -> &SystemSettings {
        &self.settings
    }

    fn actor(&self) -> Result<Account> {
        Ok(self.session.require_actor()?.clone())
    }

    fn active_space_id(&self) -> Result<SpaceId> {
        Ok(self.session.active_space().cloned().ok_or(TrackerError::NotAuthenticated)?)
    }

    fn record_activity(&mut self, space_id: &SpaceId, actor_name: &str, message: String) -> Result<()> {
        self.activity.record(space_id.clone(), actor_name, message, OffsetDateTime::now_utc());
        self.cache.save(CacheKey::Activity, &self.activity)
    }

    fn persist_accounts(&mut self) -> Result<()> {
        self.cache.save(CacheKey::Accounts, &self.identities)
    }

    fn persist_spaces(&mut self) -> Result<()> {
        self.cache.save(CacheKey::Spaces, &self.spaces)
    }

    fn check_username_available(&self, username: &str, except: Option<&AccountId>) -> Result<()> {
        if self.session.is_reserved_username(username) {
            return Err(TrackerError::ReservedIdentity.into());
        }
        if self.identities.username_taken(username, except) {
            return Err(TrackerError::Conflict(format!("username `{}` is already taken", username.trim())).into());
        }
        Ok(())
    }

    fn claim_username(&self, raw: &str, owner: &AccountId) -> Result<String> {
        let username = normalize_username(raw);
        self.check_username_available(&username, Some(owner))?;
        Ok(username)
    }

    fn account(&self, id: &AccountId) -> Result<Account> {
        Ok(self.identities.get(id).cloned().ok_or_else(|| TrackerError::NotFound(format!("account {id}")))?)
    }

    // ---- session -------------------------------------------------------

    /// Sign in, replacing any current session. A rejected attempt leaves the
    /// context signed out, in memory and in the cache.
    ///
    /// # Errors
    /// Returns `AuthenticationFailed` or `AccountDisabled` from credential
    /// resolution, or a cache error when the session cannot be persisted.
    pub fn login(&mut self, username: &str, password: &str) -> Result<SessionDescriptor> {
        let previous = self.session.actor().cloned();
        let actor = match self.session.login(&self.identities, username, password) {
            Ok(actor) => actor.clone(),
            Err(err) => {
                if let Some(previous) = previous {
                    self.record_logout(&previous);
                }
                self.forget_session();
                return Err(err.into());
            }
        };
        let descriptor = SessionDescriptor::from_account(&actor);
        self.cache.save(CacheKey::Session, &descriptor)?;
        self.record_activity(
            &actor.home_space_id,
            &actor.display_name,
            format!("{} logged in", actor.display_name),
        )?;
        Ok(descriptor)
    }

    /// Always succeeds; cache failures are logged.
    pub fn logout(&mut self) {
        if let Some(account) = self.session.logout() {
            self.record_logout(&account);
        }
        self.forget_session();
    }

    fn record_logout(&mut self, account: &Account) {
        let message = format!("{} logged out", account.display_name);
        if let Err(err) = self.record_activity(&account.home_space_id, &account.display_name, message) {
            tracing::warn!(error = %format!("{err:#}"), "failed to record logout");
        }
    }

    /// # Errors
    /// See [`SessionManager::switch_space`].
    pub fn switch_space(&mut self, space_id: &SpaceId) -> Result<()> {
        self.session.switch_space(&self.spaces, space_id)?;
        Ok(())
    }

    // ---- day records ---------------------------------------------------

    /// # Errors
    /// Returns an access denial when the actor may not view `space_id`.
    pub fn day_record(&self, space_id: &SpaceId, date_key: DateKey) -> Result<DayRecord> {
        let actor = self.session.require_actor()?;
        Ok(self.records.get(actor, &self.spaces, space_id, date_key)?)
    }

    /// Full replace of one day record.
    ///
    /// # Errors
    /// Returns an access denial without `Edit` on `space_id`, `NotFound` for
    /// unregistered spaces, or a cache error.
    pub fn put_day_record(
        &mut self,
        space_id: &SpaceId,
        date_key: DateKey,
        record: DayRecord,
    ) -> Result<DayRecord> {
        let actor = self.actor()?;
        let stored = self.records.put(&actor, &self.spaces, space_id, date_key, record)?;
        self.cache.save(CacheKey::DayRecords, &self.records)?;
        self.record_activity(space_id, &actor.display_name, format!("updated day record {date_key}"))?;
        self.sync.enqueue(RemoteMutation::UpsertDayRecord(DayRecordRow::from_record(&stored)));
        Ok(stored)
    }

    fn edit_day<T>(
        &mut self,
        date_key: DateKey,
        edit: impl FnOnce(&mut DayRecord, &Account) -> Result<T, TrackerError>,
    ) -> Result<T> {
        let actor = self.actor()?;
        let space_id = self.active_space_id()?;
        authorize(&actor, Capability::Edit, &space_id)?;
        let mut record = self.records.peek(&space_id, date_key);
        let outcome = edit(&mut record, &actor)?;
        self.put_day_record(&space_id, date_key, record)?;
        Ok(outcome)
    }

    /// # Errors
    /// Same gates as [`AppContext::put_day_record`] on the active space.
    pub fn set_notes(&mut self, date_key: DateKey, notes: &str) -> Result<()> {
        self.edit_day(date_key, |record, _| {
            record.notes = notes.to_string();
            Ok(())
        })
    }

    /// # Errors
    /// Same gates as [`AppContext::put_day_record`]; blank text is rejected.
    pub fn add_task(&mut self, date_key: DateKey, text: &str) -> Result<TaskId> {
        self.edit_day(date_key, |record, _| record.add_task(text))
    }

    /// Returns the task's new completion state.
    ///
    /// # Errors
    /// Same gates as [`AppContext::put_day_record`]; unknown tasks are `NotFound`.
    pub fn toggle_task(&mut self, date_key: DateKey, task_id: &TaskId) -> Result<bool> {
        self.edit_day(date_key, |record, actor| {
            record.toggle_task(task_id, actor, OffsetDateTime::now_utc())
        })
    }

    /// # Errors
    /// Same gates as [`AppContext::put_day_record`]; unknown tasks are `NotFound`.
    pub fn remove_task(&mut self, date_key: DateKey, task_id: &TaskId) -> Result<()> {
        self.edit_day(date_key, |record, _| {
            if record.remove_task(task_id) {
                Ok(())
            } else {
                Err(TrackerError::NotFound(format!("task {task_id}")))
            }
        })
    }

    /// Attach media classified from its MIME type.
    ///
    /// # Errors
    /// Same gates as [`AppContext::put_day_record`].
    pub fn attach_media(
        &mut self,
        date_key: DateKey,
        mime: &str,
        payload_ref: &str,
        display_name: &str,
    ) -> Result<MediaId> {
        self.edit_day(date_key, |record, _| {
            let item = MediaItem::new(
                MediaKind::from_mime(mime),
                payload_ref,
                display_name,
                OffsetDateTime::now_utc(),
            );
            let id = item.id.clone();
            record.attach_media(item);
            Ok(id)
        })
    }

    /// # Errors
    /// Same gates as [`AppContext::put_day_record`]; unknown media is `NotFound`.
    pub fn remove_media(&mut self, date_key: DateKey, media_id: &MediaId) -> Result<()> {
        self.edit_day(date_key, |record, _| {
            if record.remove_media(media_id) {
                Ok(())
            } else {
                Err(TrackerError::NotFound(format!("media {media_id}")))
            }
        })
    }

    // ---- insights ------------------------------------------------------

    /// # Errors
    /// Returns `NotAuthenticated` or an access denial for the active space.
    pub fn reminders(&self, today: Date) -> Result<Vec<Reminder>> {
        let actor = self.session.require_actor()?;
        let space_id = self.active_space_id()?;
        Ok(reminders(&self.records, actor, &space_id, today, self.config.reminder_window_days)?)
    }

    /// # Errors
    /// Returns `NotAuthenticated` or an access denial for the active space.
    pub fn statistics(&self) -> Result<StatisticsReport> {
        let actor = self.session.require_actor()?;
        let space_id = self.active_space_id()?;
        Ok(space_statistics(&self.records, &self.spaces, actor, &space_id)?)
    }

    /// Activity entries visible to the current actor, newest first.
    #[must_use]
    pub fn activity_feed(&self) -> Vec<ActivityEntry> {
        match (self.session.actor(), self.session.active_space()) {
            (Some(actor), Some(space_id)) => {
                self.activity.visible_to(actor, space_id).into_iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Spaces the current actor may see: every space for root, the home
    /// space for everyone else.
    #[must_use]
    pub fn visible_spaces(&self) -> Vec<Space> {
        match self.session.actor() {
            Some(actor) if actor.role == Role::Root => self.spaces.all(),
            Some(actor) => self.spaces.get(&actor.home_space_id).into_iter().collect(),
            None => Vec::new(),
        }
    }

    // ---- spaces --------------------------------------------------------

    /// Create a space, optionally together with its staff manager account.
    ///
    /// # Errors
    /// Returns an access denial without `ManageSpaces`, validation errors for
    /// the space or manager, or `Conflict` for a taken manager username.
    pub fn create_space(&mut self, new_space: NewSpace, manager: Option<NewAccount>) -> Result<Space> {
        let actor = self.actor()?;
        authorize(&actor, Capability::ManageSpaces, &SpaceId::master())?;
        let mut space = new_space.into_space(OffsetDateTime::now_utc())?;

        let manager = match manager {
            Some(mut new_manager) => {
                if !matches!(new_manager.role, Role::Manager | Role::Admin) {
                    return Err(TrackerError::Validation(
                        "a space manager must be a manager or admin".to_string(),
                    )
                    .into());
                }
                new_manager.home_space_id = space.id.clone();
                self.check_username_available(&new_manager.username, None)?;
                let account = new_manager.into_account()?;
                space.manager_id = Some(account.id.clone());
                Some(account)
            }
            None => None,
        };

        self.spaces.insert(space.clone())?;
        if let Some(account) = &manager {
            if let Err(err) = self.identities.insert(account.clone()) {
                self.spaces.remove(&space.id);
                return Err(err.into());
            }
            self.persist_accounts()?;
        }
        self.persist_spaces()?;
        self.record_activity(
            &SpaceId::master(),
            &actor.display_name,
            format!("created space {}", space.display_name),
        )?;
        self.sync.enqueue(RemoteMutation::UpsertSpace(SpaceRow::from_space(&space)));
        if let Some(account) = &manager {
            self.sync.enqueue(RemoteMutation::UpsertProfile(ProfileRow::from_account(account)));
        }
        Ok(space)
    }

    /// Rename, recolour or resize a space. Lowering the seat limit never
    /// evicts anyone.
    ///
    /// # Errors
    /// Returns an access denial without `ManageSpaces`, `NotFound`, or
    /// validation errors.
    pub fn update_space(&mut self, space_id: &SpaceId, update: SpaceUpdate) -> Result<Space> {
        let actor = self.actor()?;
        authorize(&actor, Capability::ManageSpaces, space_id)?;
        let mut space = self
            .spaces
            .get(space_id)
            .ok_or_else(|| TrackerError::NotFound(format!("space {space_id}")))?;
        if let Some(name) = update.display_name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(TrackerError::Validation("space name must not be empty".to_string()).into());
            }
            space.display_name = name;
        }
        if let Some(color) = update.accent_color {
            space.accent_color = color;
        }
        if let Some(seat_limit) = update.seat_limit {
            space.seat_limit = seat_limit;
        }
        self.spaces.replace(space.clone())?;
        self.persist_spaces()?;
        self.record_activity(space_id, &actor.display_name, format!("updated space {}", space.display_name))?;
        self.sync.enqueue(RemoteMutation::UpsertSpace(SpaceRow::from_space(&space)));
        Ok(space)
    }

    /// Delete an empty space.
    ///
    /// # Errors
    /// Returns an access denial without `ManageSpaces`, `Validation` for the
    /// master space, `NotFound`, or `SpaceNotEmpty` while accounts or day
    /// records remain.
    pub fn delete_space(&mut self, space_id: &SpaceId) -> Result<()> {
        let actor = self.actor()?;
        authorize(&actor, Capability::ManageSpaces, space_id)?;
        if space_id.is_master() {
            return Err(TrackerError::Validation("the master space cannot be deleted".to_string()).into());
        }
        let Some(space) = self.spaces.get(space_id) else {
            return Err(TrackerError::NotFound(format!("space {space_id}")).into());
        };
        if !self.identities.accounts_in_space(space_id).is_empty()
            || self.records.space_has_content(space_id)
        {
            tracing::info!(space = %space_id, "refusing to delete a space that still owns data");
            return Err(TrackerError::SpaceNotEmpty(space_id.clone()).into());
        }
        self.spaces.remove(space_id);
        if self.records.drop_partition(space_id).is_some() {
            self.cache.save(CacheKey::DayRecords, &self.records)?;
        }
        self.persist_spaces()?;
        self.record_activity(
            &SpaceId::master(),
            &actor.display_name,
            format!("deleted space {}", space.display_name),
        )?;
        self.sync.enqueue(RemoteMutation::DeleteSpace(space_id.to_string()));
        Ok(())
    }

    // ---- accounts ------------------------------------------------------

    /// # Errors
    /// Returns an access denial (capability, scope or rank), `NotFound` for an
    /// unknown home space, `ReservedIdentity`/`Conflict` for the username,
    /// `QuotaExceeded` for a member that does not fit, or validation errors.
    pub fn create_account(&mut self, new_account: NewAccount) -> Result<Account> {
        let actor = self.actor()?;
        authorize_over(&actor, Capability::CreateUser, &new_account.home_space_id, new_account.role)?;
        if !self.spaces.contains(&new_account.home_space_id) {
            return Err(TrackerError::NotFound(format!("space {}", new_account.home_space_id)).into());
        }
        self.check_username_available(&new_account.username, None)?;
        QuotaEnforcer::new(&self.identities, &self.spaces)
            .admit(&new_account.home_space_id, new_account.role)?;

        let account = new_account.into_account()?;
        self.identities.insert(account.clone())?;
        self.persist_accounts()?;
        self.record_activity(
            &account.home_space_id,
            &actor.display_name,
            format!("added account {}", account.display_name),
        )?;
        self.sync.enqueue(RemoteMutation::UpsertProfile(ProfileRow::from_account(&account)));
        Ok(account)
    }

    fn save_account(&mut self, actor: &Account, account: &Account, message: String) -> Result<()> {
        self.identities.replace(account.clone())?;
        self.persist_accounts()?;
        self.record_activity(&account.home_space_id, &actor.display_name, message)?;
        self.sync.enqueue(RemoteMutation::UpsertProfile(ProfileRow::from_account(account)));
        Ok(())
    }

    /// Demoting staff to member takes a seat and is checked against the quota.
    ///
    /// # Errors
    /// Returns an access denial unless the actor holds `ManageUsers` in the
    /// subject's space and outranks both its current and its new role, or
    /// `QuotaExceeded` when a demotion does not fit.
    pub fn update_account(&mut self, id: &AccountId, update: AccountUpdate) -> Result<Account> {
        let actor = self.actor()?;
        let mut account = self.account(id)?;
        authorize_over(&actor, Capability::ManageUsers, &account.home_space_id, account.role)?;

        if let Some(role) = update.role {
            authorize_over(&actor, Capability::ManageUsers, &account.home_space_id, role)?;
            if role == Role::Member && account.role != Role::Member {
                QuotaEnforcer::new(&self.identities, &self.spaces).admit(&account.home_space_id, role)?;
            }
            account.role = role;
        }
        if let Some(username) = update.username {
            account.username = self.claim_username(&username, &account.id)?;
        }
        if let Some(display_name) = update.display_name {
            let display_name = display_name.trim().to_string();
            if display_name.is_empty() {
                return Err(TrackerError::Validation("display name must not be empty".to_string()).into());
            }
            account.display_name = display_name;
        }
        if let Some(password) = update.password {
            account.password_secret = PasswordSecret::hash(&password)?;
        }
        if let Some(overrides) = update.permission_overrides {
            account.permission_overrides = overrides;
        }
        let message = format!("updated account {}", account.display_name);
        self.save_account(&actor, &account, message)?;
        Ok(account)
    }

    /// Soft enable/disable. Disabled accounts keep their seat.
    ///
    /// # Errors
    /// Returns an access denial unless the actor holds `ManageUsers` over the subject.
    pub fn set_account_active(&mut self, id: &AccountId, active: bool) -> Result<Account> {
        let actor = self.actor()?;
        let mut account = self.account(id)?;
        authorize_over(&actor, Capability::ManageUsers, &account.home_space_id, account.role)?;
        account.active = active;
        let verb = if active { "enabled" } else { "disabled" };
        let message = format!("{verb} account {}", account.display_name);
        self.save_account(&actor, &account, message)?;
        Ok(account)
    }

    /// Hard delete. Day records are not owned by accounts and stay untouched.
    ///
    /// # Errors
    /// Returns an access denial unless the actor holds `DeleteUser` over the subject.
    pub fn delete_account(&mut self, id: &AccountId) -> Result<()> {
        let actor = self.actor()?;
        let account = self.account(id)?;
        authorize_over(&actor, Capability::DeleteUser, &account.home_space_id, account.role)?;
        self.identities.remove(id);
        self.persist_accounts()?;

        let managed = self
            .spaces
            .spaces()
            .iter()
            .filter(|space| space.manager_id.as_ref() == Some(id))
            .map(|space| space.id.clone())
            .collect::<Vec<_>>();
        for space_id in &managed {
            self.spaces.set_manager(space_id, None);
        }
        if !managed.is_empty() {
            self.persist_spaces()?;
        }

        self.record_activity(
            &account.home_space_id,
            &actor.display_name,
            format!("deleted account {}", account.display_name),
        )?;
        self.sync.enqueue(RemoteMutation::DeleteProfile(id.to_string()));
        for space_id in &managed {
            if let Some(space) = self.spaces.get(space_id) {
                self.sync.enqueue(RemoteMutation::UpsertSpace(SpaceRow::from_space(&space)));
            }
        }
        Ok(())
    }

    /// Move an account to another space, admitting it against the target quota.
    ///
    /// # Errors
    /// Returns an access denial without `ReassignSpace`, `NotFound` for unknown
    /// targets, or `QuotaExceeded` when a member does not fit.
    pub fn reassign_home_space(&mut self, id: &AccountId, target: &SpaceId) -> Result<Account> {
        let actor = self.actor()?;
        let mut account = self.account(id)?;
        authorize_over(&actor, Capability::ReassignSpace, &account.home_space_id, account.role)?;
        authorize(&actor, Capability::ReassignSpace, target)?;
        if !self.spaces.contains(target) {
            return Err(TrackerError::NotFound(format!("space {target}")).into());
        }
        if &account.home_space_id == target {
            return Ok(account);
        }
        QuotaEnforcer::new(&self.identities, &self.spaces).admit(target, account.role)?;
        account.home_space_id = target.clone();
        let message = format!("moved account {} to {}", account.display_name, self.spaces.display_name(target));
        self.save_account(&actor, &account, message)?;
        Ok(account)
    }

    /// Let the signed-in account change its own name, username or password.
    ///
    /// # Errors
    /// Returns `ReservedIdentity` for the bootstrap root or a reserved
    /// username, `Conflict` for a taken username, or validation errors.
    pub fn update_own_profile(&mut self, update: ProfileUpdate) -> Result<Account> {
        let actor = self.actor()?;
        if actor.is_bootstrap_root() {
            return Err(TrackerError::ReservedIdentity.into());
        }
        let mut account = self.account(&actor.id)?;
        if let Some(username) = update.username {
            validate_profile_username(&username)?;
            account.username = self.claim_username(&username, &account.id)?;
        }
        if let Some(display_name) = update.display_name {
            let display_name = display_name.trim().to_string();
            if display_name.is_empty() {
                return Err(TrackerError::Validation("display name must not be empty".to_string()).into());
            }
            account.display_name = display_name;
        }
        if let Some(password) = update.password {
            account.password_secret = PasswordSecret::hash(&password)?;
        }
        self.save_account(&actor, &account, format!("{} updated their profile", account.display_name))?;
        self.session.refresh(&self.identities);
        if let Some(descriptor) = self.session.descriptor() {
            self.cache.save(CacheKey::Session, &descriptor)?;
        }
        Ok(account)
    }

    /// Accounts the actor may administer, optionally filtered by a
    /// case-insensitive term over display name, username and space name.
    ///
    /// # Errors
    /// Returns `NotAuthenticated`, or an access denial for non-root actors
    /// without `ManageUsers` in their home space.
    pub fn list_accounts(&self, search: Option<&str>) -> Result<Vec<Account>> {
        let actor = self.session.require_actor()?;
        let visible = if actor.role == Role::Root {
            self.identities.accounts().iter().collect::<Vec<_>>()
        } else {
            authorize(actor, Capability::ManageUsers, &actor.home_space_id)?;
            self.identities
                .accounts_in_space(&actor.home_space_id)
                .into_iter()
                .filter(|account| account.id != actor.id)
                .collect()
        };
        let needle = search.map(|term| term.trim().to_lowercase()).filter(|term| !term.is_empty());
        Ok(visible
            .into_iter()
            .filter(|account| {
                needle.as_deref().map_or(true, |needle| {
                    account.display_name.to_lowercase().contains(needle)
                        || account.username.contains(needle)
                        || self.spaces.display_name(&account.home_space_id).to_lowercase().contains(needle)
                })
            })
            .cloned()
            .collect())
    }

    /// # Errors
    /// Returns an access denial for anyone but root, or `Validation` for bad colours.
    pub fn update_settings(&mut self, primary_color: &str) -> Result<SystemSettings> {
        let actor = self.actor()?;
        if actor.role != Role::Root {
            return Err(TrackerError::from(AccessDenied::Capability {
                actor: actor.id.clone(),
                capability: Capability::ManageSpaces,
                space_id: SpaceId::master(),
            })
            .into());
        }
        validate_color(primary_color)?;
        self.settings.primary_color = primary_color.to_string();
        self.cache.save(CacheKey::Settings, &self.settings)?;
        Ok(self.settings.clone())
    }
}

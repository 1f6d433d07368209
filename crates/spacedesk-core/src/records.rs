//! Day records partitioned by space, then by date.
//!
//! Actor-facing reads and writes are gated by [`RoleAuthority`] and only
//! address registered spaces; the raw accessors exist for the local cache and
//! remote reconciliation only. Partitions whose space disappears from the
//! registry are detached rather than dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::authority::{Capability, RoleAuthority};
use crate::ids::{DateKey, SpaceId};
use crate::model::{Account, DayRecord};
use crate::spaces::SpaceRegistry;
use crate::TrackerError;

pub type Partition = BTreeMap<DateKey, DayRecord>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionedRecordStore {
    #[serde(default)]
    partitions: BTreeMap<SpaceId, Partition>,
    /// Records of spaces missing from the registry. Never served; reattached
    /// when their space is registered again.
    #[serde(default)]
    detached: BTreeMap<SpaceId, Partition>,
}

impl PartitionedRecordStore {
    /// Read one day. A date never written yields an empty record carrying
    /// `date_key`. Tasks and media are withheld from actors lacking the
    /// matching view capability.
    ///
    /// # Errors
    /// Returns an access denial when the actor may not view `space_id`, or
    /// `NotFound` when the space is not registered.
    pub fn get(
        &self,
        actor: &Account,
        spaces: &SpaceRegistry,
        space_id: &SpaceId,
        date_key: DateKey,
    ) -> Result<DayRecord, TrackerError> {
        let held = RoleAuthority::effective_capabilities(actor);
        let capability = [Capability::ViewTasks, Capability::ViewMedia, Capability::Edit]
            .into_iter()
            .find(|capability| held.contains(capability))
            .unwrap_or(Capability::ViewTasks);
        RoleAuthority::check(actor, capability, space_id)?;
        if !spaces.contains(space_id) {
            return Err(TrackerError::NotFound(format!("space {space_id}")));
        }

        let mut record = self.peek(space_id, date_key);
        if !held.contains(&Capability::ViewTasks) {
            record.tasks.clear();
        }
        if !held.contains(&Capability::ViewMedia) {
            record.media.clear();
        }
        Ok(record)
    }

    /// Replace the whole record at `(space_id, date_key)`. Last write wins.
    /// The stored record's space and date are normalised to the address.
    ///
    /// # Errors
    /// Returns an access denial without `Edit` on `space_id`, or `NotFound`
    /// when the space is not registered.
    pub fn put(
        &mut self,
        actor: &Account,
        spaces: &SpaceRegistry,
        space_id: &SpaceId,
        date_key: DateKey,
        mut record: DayRecord,
    ) -> Result<DayRecord, TrackerError> {
        RoleAuthority::check(actor, Capability::Edit, space_id)?;
        if !spaces.contains(space_id) {
            return Err(TrackerError::NotFound(format!("space {space_id}")));
        }
        record.space_id = space_id.clone();
        record.date_key = date_key;
        self.store(record.clone());
        Ok(record)
    }

    /// Ungated read used by reconciliation and statistics.
    #[must_use]
    pub fn peek(&self, space_id: &SpaceId, date_key: DateKey) -> DayRecord {
        self.partitions
            .get(space_id)
            .and_then(|partition| partition.get(&date_key))
            .cloned()
            .unwrap_or_else(|| DayRecord::empty(space_id.clone(), date_key))
    }

    /// Ungated write used when applying remote state.
    pub fn store(&mut self, record: DayRecord) {
        self.partitions
            .entry(record.space_id.clone())
            .or_default()
            .insert(record.date_key, record);
    }

    #[must_use]
    pub fn partition(&self, space_id: &SpaceId) -> Option<&Partition> {
        self.partitions.get(space_id)
    }

    #[must_use]
    pub fn partitions(&self) -> &BTreeMap<SpaceId, Partition> {
        &self.partitions
    }

    /// Whether any stored record in the space carries content.
    #[must_use]
    pub fn space_has_content(&self, space_id: &SpaceId) -> bool {
        self.partitions
            .get(space_id)
            .is_some_and(|partition| partition.values().any(|record| !record.is_empty()))
    }

    /// Drop an emptied partition (used after a space is deleted).
    pub fn drop_partition(&mut self, space_id: &SpaceId) -> Option<Partition> {
        self.partitions.remove(space_id)
    }

    /// Align partitions with `spaces`: partitions of unregistered spaces are
    /// detached, detached partitions of registered spaces come back. Returns
    /// the spaces detached by this call.
    pub fn reconcile_with(&mut self, spaces: &SpaceRegistry) -> Vec<SpaceId> {
        let returning = self
            .detached
            .keys()
            .filter(|space_id| spaces.contains(space_id))
            .cloned()
            .collect::<Vec<_>>();
        for space_id in returning {
            if let Some(partition) = self.detached.remove(&space_id) {
                let live = self.partitions.entry(space_id).or_default();
                for (date_key, record) in partition {
                    live.entry(date_key).or_insert(record);
                }
            }
        }

        let orphaned = self
            .partitions
            .keys()
            .filter(|space_id| !spaces.contains(space_id))
            .cloned()
            .collect::<Vec<_>>();
        for space_id in &orphaned {
            if let Some(partition) = self.partitions.remove(space_id) {
                let parked = self.detached.entry(space_id.clone()).or_default();
                for (date_key, record) in partition {
                    parked.insert(date_key, record);
                }
            }
        }
        orphaned
    }

    #[must_use]
    pub fn detached(&self) -> &BTreeMap<SpaceId, Partition> {
        &self.detached
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::ids::AccountId;
    use crate::model::{MediaItem, MediaKind, Role};
    use crate::secret::PasswordSecret;
    use crate::spaces::NewSpace;

    fn date(raw: &str) -> DateKey {
        DateKey::parse(raw).unwrap_or_else(|err| panic!("{err}"))
    }

    fn actor(role: Role, home: &SpaceId, overrides: &[(Capability, bool)]) -> Account {
        Account {
            id: AccountId::generate(),
            username: format!("{}_actor", role.as_str()),
            display_name: "Actor".to_string(),
            password_secret: PasswordSecret::from_stored("secret"),
            role,
            home_space_id: home.clone(),
            active: true,
            permission_overrides: overrides.iter().copied().collect(),
        }
    }

    fn registry_with(name: &str) -> (SpaceRegistry, SpaceId) {
        let mut registry = SpaceRegistry::default();
        let space = NewSpace { display_name: name.to_string(), accent_color: None, seat_limit: 5 }
            .into_space(OffsetDateTime::UNIX_EPOCH)
            .unwrap_or_else(|err| panic!("{err}"));
        let id = space.id.clone();
        if let Err(err) = registry.insert(space) {
            panic!("{err}");
        }
        (registry, id)
    }

    fn filled(space_id: &SpaceId, key: DateKey) -> DayRecord {
        let mut record = DayRecord::empty(space_id.clone(), key);
        record.notes = "site visit".to_string();
        if let Err(err) = record.add_task("inspect scaffolding") {
            panic!("{err}");
        }
        record.attach_media(MediaItem::new(
            MediaKind::Image,
            "blob:site",
            "site.png",
            OffsetDateTime::UNIX_EPOCH,
        ));
        record
    }

    #[test]
    fn unwritten_dates_read_as_empty_records() -> Result<(), TrackerError> {
        let (registry, space_id) = registry_with("Riyadh");
        let store = PartitionedRecordStore::default();
        let member = actor(Role::Member, &space_id, &[]);
        let first = store.get(&member, &registry, &space_id, date("2024-05-01"))?;
        let second = store.get(&member, &registry, &space_id, date("2024-05-01"))?;
        assert_eq!(first, second);
        assert!(first.is_empty());
        assert_eq!(first.date_key, date("2024-05-01"));
        assert_eq!(first.space_id, space_id);
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn authorized_put_round_trips() -> Result<(), TrackerError> {
        let (registry, space_id) = registry_with("Riyadh");
        let mut store = PartitionedRecordStore::default();
        let member = actor(Role::Member, &space_id, &[]);
        let key = date("2024-05-01");
        let record = filled(&space_id, key);

        store.put(&member, &registry, &space_id, key, record.clone())?;
        assert_eq!(store.get(&member, &registry, &space_id, key)?, record);
        assert!(store.space_has_content(&space_id));
        Ok(())
    }

    #[test]
    fn put_is_a_full_replace() -> Result<(), TrackerError> {
        let (registry, space_id) = registry_with("Riyadh");
        let mut store = PartitionedRecordStore::default();
        let member = actor(Role::Member, &space_id, &[]);
        let key = date("2024-05-01");

        store.put(&member, &registry, &space_id, key, filled(&space_id, key))?;
        let mut notes_only = DayRecord::empty(space_id.clone(), key);
        notes_only.notes = "rewritten".to_string();
        store.put(&member, &registry, &space_id, key, notes_only.clone())?;

        assert_eq!(store.get(&member, &registry, &space_id, key)?, notes_only);
        Ok(())
    }

    #[test]
    fn cross_space_access_is_scope_denied() {
        let (mut registry, riyadh) = registry_with("Riyadh");
        let jeddah = NewSpace { display_name: "Jeddah".to_string(), accent_color: None, seat_limit: 5 }
            .into_space(OffsetDateTime::UNIX_EPOCH)
            .unwrap_or_else(|err| panic!("{err}"));
        let jeddah_id = jeddah.id.clone();
        if let Err(err) = registry.insert(jeddah) {
            panic!("{err}");
        }
        let mut store = PartitionedRecordStore::default();
        let manager = actor(Role::Manager, &riyadh, &[]);
        let key = date("2024-05-01");

        let write = store.put(&manager, &registry, &jeddah_id, key, filled(&jeddah_id, key));
        assert!(write.as_ref().is_err_and(TrackerError::is_scope_denied));
        assert!(store.get(&manager, &registry, &jeddah_id, key).is_err_and(|err| err.is_scope_denied()));
        assert!(store.is_empty());
    }

    #[test]
    fn read_only_members_cannot_write() {
        let (registry, space_id) = registry_with("Riyadh");
        let mut store = PartitionedRecordStore::default();
        let viewer = actor(Role::Member, &space_id, &[(Capability::Edit, false)]);
        let key = date("2024-05-01");
        let result = store.put(&viewer, &registry, &space_id, key, filled(&space_id, key));
        assert!(result.is_err_and(|err| err.is_capability_denied()));
        assert!(store.is_empty());
    }

    #[test]
    fn view_capabilities_filter_tasks_and_media() -> Result<(), TrackerError> {
        let (registry, space_id) = registry_with("Riyadh");
        let mut store = PartitionedRecordStore::default();
        let writer = actor(Role::Member, &space_id, &[]);
        let key = date("2024-05-01");
        store.put(&writer, &registry, &space_id, key, filled(&space_id, key))?;

        let no_media = actor(Role::Member, &space_id, &[(Capability::ViewMedia, false)]);
        let seen = store.get(&no_media, &registry, &space_id, key)?;
        assert_eq!(seen.tasks.len(), 1);
        assert!(seen.media.is_empty());

        let no_tasks = actor(Role::Member, &space_id, &[(Capability::ViewTasks, false)]);
        let seen = store.get(&no_tasks, &registry, &space_id, key)?;
        assert!(seen.tasks.is_empty());
        assert_eq!(seen.media.len(), 1);
        Ok(())
    }

    #[test]
    fn writes_to_unregistered_spaces_are_rejected() {
        let registry = SpaceRegistry::default();
        let mut store = PartitionedRecordStore::default();
        let root = actor(Role::Root, &SpaceId::master(), &[]);
        let ghost = SpaceId::from_raw("spc_ghost");
        let key = date("2024-05-01");
        let result = store.put(&root, &registry, &ghost, key, DayRecord::empty(ghost.clone(), key));
        assert!(matches!(result, Err(TrackerError::NotFound(_))));
    }

    #[test]
    fn stored_record_is_normalised_to_its_address() -> Result<(), TrackerError> {
        let (registry, space_id) = registry_with("Riyadh");
        let mut store = PartitionedRecordStore::default();
        let member = actor(Role::Member, &space_id, &[]);
        let key = date("2024-05-01");
        let mislabeled = filled(&SpaceId::from_raw("elsewhere"), date("1999-01-01"));
        let stored = store.put(&member, &registry, &space_id, key, mislabeled)?;
        assert_eq!(stored.space_id, space_id);
        assert_eq!(stored.date_key, key);
        Ok(())
    }

    #[test]
    fn reads_of_unregistered_spaces_are_rejected() {
        let registry = SpaceRegistry::default();
        let store = PartitionedRecordStore::default();
        let root = actor(Role::Root, &SpaceId::master(), &[]);
        let result = store.get(&root, &registry, &SpaceId::from_raw("spc_ghost"), date("2024-05-01"));
        assert!(matches!(result, Err(TrackerError::NotFound(_))));
    }

    #[test]
    fn partitions_of_vanished_spaces_are_detached_then_restored() -> Result<(), TrackerError> {
        let (registry, space_id) = registry_with("Dammam");
        let mut store = PartitionedRecordStore::default();
        let member = actor(Role::Member, &space_id, &[]);
        let key = date("2024-05-01");
        store.put(&member, &registry, &space_id, key, filled(&space_id, key))?;

        let detached = store.reconcile_with(&SpaceRegistry::default());
        assert_eq!(detached, vec![space_id.clone()]);
        assert!(store.partition(&space_id).is_none());
        assert!(!store.space_has_content(&space_id));
        assert_eq!(store.detached().get(&space_id).map(BTreeMap::len), Some(1));

        assert!(store.reconcile_with(&registry).is_empty());
        assert!(store.detached().is_empty());
        assert_eq!(store.get(&member, &registry, &space_id, key)?.notes, "site visit");
        Ok(())
    }
}

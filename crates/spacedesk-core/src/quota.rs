//! Seat admission.
//!
//! Seats are checked only when an account is admitted into a space. Lowering
//! a seat limit later never evicts anyone.

use crate::identity::IdentityStore;
use crate::ids::SpaceId;
use crate::model::Role;
use crate::spaces::SpaceRegistry;
use crate::TrackerError;

#[derive(Debug, Clone, Copy)]
pub struct QuotaEnforcer<'a> {
    identities: &'a IdentityStore,
    spaces: &'a SpaceRegistry,
}

impl<'a> QuotaEnforcer<'a> {
    #[must_use]
    pub fn new(identities: &'a IdentityStore, spaces: &'a SpaceRegistry) -> Self {
        Self { identities, spaces }
    }

    #[must_use]
    pub fn current_member_count(&self, space_id: &SpaceId) -> usize {
        self.identities.member_count(space_id)
    }

    /// `current_member_count < seat_limit`; the master space always admits.
    /// Unknown spaces never admit.
    #[must_use]
    pub fn can_admit(&self, space_id: &SpaceId) -> bool {
        if space_id.is_master() {
            return true;
        }
        match self.spaces.get(space_id) {
            Some(space) => {
                let seats = usize::try_from(space.seat_limit).unwrap_or(usize::MAX);
                self.current_member_count(space_id) < seats
            }
            None => false,
        }
    }

    /// Gate admission of an account with `role` into `space_id`. Staff roles
    /// do not occupy seats.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown spaces and `QuotaExceeded` when a member
    /// would not fit.
    pub fn admit(&self, space_id: &SpaceId, role: Role) -> Result<(), TrackerError> {
        let Some(space) = self.spaces.get(space_id) else {
            return Err(TrackerError::NotFound(format!("space {space_id}")));
        };
        if role != Role::Member || self.can_admit(space_id) {
            return Ok(());
        }
        tracing::info!(
            space = %space_id,
            seat_limit = space.seat_limit,
            members = self.current_member_count(space_id),
            "seat quota exhausted"
        );
        Err(TrackerError::QuotaExceeded { space_id: space_id.clone(), seat_limit: space.seat_limit })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::OffsetDateTime;

    use super::*;
    use crate::identity::NewAccount;
    use crate::spaces::NewSpace;

    fn seeded(seat_limit: u32, members: usize) -> (IdentityStore, SpaceRegistry, SpaceId) {
        let mut spaces = SpaceRegistry::default();
        let space = match (NewSpace {
            display_name: "Riyadh".to_string(),
            accent_color: None,
            seat_limit,
        })
        .into_space(OffsetDateTime::UNIX_EPOCH)
        {
            Ok(space) => space,
            Err(err) => panic!("space should build: {err}"),
        };
        let space_id = space.id.clone();
        if let Err(err) = spaces.insert(space) {
            panic!("space should insert: {err}");
        }

        let mut identities = IdentityStore::default();
        for index in 0..members {
            let account = NewAccount {
                username: format!("emp{index}"),
                display_name: format!("Employee {index}"),
                password: "pass123".to_string(),
                role: Role::Member,
                home_space_id: space_id.clone(),
                permission_overrides: BTreeMap::new(),
            }
            .into_account()
            .unwrap_or_else(|err| panic!("account should build: {err}"));
            if let Err(err) = identities.insert(account) {
                panic!("account should insert: {err}");
            }
        }
        (identities, spaces, space_id)
    }

    #[test]
    fn admits_until_seats_are_used() {
        for members in 0..4 {
            let (identities, spaces, space_id) = seeded(2, members);
            let quota = QuotaEnforcer::new(&identities, &spaces);
            assert_eq!(quota.can_admit(&space_id), members < 2, "members={members}");
        }
    }

    #[test]
    fn master_space_is_unbounded() {
        let (identities, spaces, _) = seeded(0, 0);
        let quota = QuotaEnforcer::new(&identities, &spaces);
        assert!(quota.can_admit(&SpaceId::master()));
        assert!(quota.admit(&SpaceId::master(), Role::Member).is_ok());
    }

    #[test]
    fn staff_roles_do_not_need_seats() {
        let (identities, spaces, space_id) = seeded(1, 1);
        let quota = QuotaEnforcer::new(&identities, &spaces);
        assert!(quota.admit(&space_id, Role::Manager).is_ok());
        assert!(matches!(
            quota.admit(&space_id, Role::Member),
            Err(TrackerError::QuotaExceeded { seat_limit: 1, .. })
        ));
    }

    #[test]
    fn unknown_spaces_never_admit() {
        let (identities, spaces, _) = seeded(5, 0);
        let quota = QuotaEnforcer::new(&identities, &spaces);
        let ghost = SpaceId::from_raw("spc_ghost");
        assert!(!quota.can_admit(&ghost));
        assert!(matches!(quota.admit(&ghost, Role::Manager), Err(TrackerError::NotFound(_))));
    }
}

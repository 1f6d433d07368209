//! Role and capability resolution.
//!
//! Resolution order is fixed: role defaults, then the per-account override
//! map, clipped to the role's ceiling. Tenant scope is checked after the
//! capability so the two denial kinds stay distinguishable in the audit trail.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, SpaceId};
use crate::model::{Account, Role};

/// Target used for audit events emitted by authorization checks.
pub const AUDIT_TARGET: &str = "spacedesk::audit";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Edit,
    ViewTasks,
    ViewMedia,
    ManageUsers,
    CreateUser,
    DeleteUser,
    ReassignSpace,
    ManageSpaces,
    BrowseSpaces,
}

impl Capability {
    pub const ALL: [Self; 9] = [
        Self::Edit,
        Self::ViewTasks,
        Self::ViewMedia,
        Self::ManageUsers,
        Self::CreateUser,
        Self::DeleteUser,
        Self::ReassignSpace,
        Self::ManageSpaces,
        Self::BrowseSpaces,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::ViewTasks => "view_tasks",
            Self::ViewMedia => "view_media",
            Self::ManageUsers => "manage_users",
            Self::CreateUser => "create_user",
            Self::DeleteUser => "delete_user",
            Self::ReassignSpace => "reassign_space",
            Self::ManageSpaces => "manage_spaces",
            Self::BrowseSpaces => "browse_spaces",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|capability| capability.as_str() == value)
    }

    fn is_content(self) -> bool {
        matches!(self, Self::Edit | Self::ViewTasks | Self::ViewMedia)
    }

    fn is_root_only(self) -> bool {
        matches!(self, Self::ReassignSpace | Self::ManageSpaces | Self::BrowseSpaces)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    /// Capabilities a role holds before any override is applied.
    #[must_use]
    pub fn default_capabilities(self) -> &'static [Capability] {
        match self {
            Self::Root => &Capability::ALL,
            Self::Admin => &[
                Capability::Edit,
                Capability::ViewTasks,
                Capability::ViewMedia,
                Capability::ManageUsers,
                Capability::CreateUser,
                Capability::DeleteUser,
            ],
            Self::Manager => &[
                Capability::Edit,
                Capability::ViewTasks,
                Capability::ViewMedia,
                Capability::ManageUsers,
                Capability::CreateUser,
            ],
            Self::Member => &[Capability::Edit, Capability::ViewTasks, Capability::ViewMedia],
        }
    }

    /// Whether an override may grant `capability` to this role at all.
    #[must_use]
    pub fn may_be_granted(self, capability: Capability) -> bool {
        match self {
            Self::Root => true,
            Self::Admin | Self::Manager => !capability.is_root_only(),
            Self::Member => capability.is_content(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AccessDenied {
    #[error("{actor} does not hold capability `{capability}` (target space {space_id})")]
    Capability { actor: AccountId, capability: Capability, space_id: SpaceId },
    #[error("{actor} holds `{capability}` but may not act on space {space_id}")]
    Scope { actor: AccountId, capability: Capability, space_id: SpaceId },
}

/// Stateless resolver of `(actor, capability, target space)` to allow or deny.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthority;

impl RoleAuthority {
    /// Capabilities the actor holds, ignoring tenant scope.
    #[must_use]
    pub fn effective_capabilities(actor: &Account) -> BTreeSet<Capability> {
        if !actor.active {
            return BTreeSet::new();
        }
        if actor.role == Role::Root {
            return Capability::ALL.into_iter().collect();
        }
        let mut held = actor.role.default_capabilities().iter().copied().collect::<BTreeSet<_>>();
        for (capability, granted) in &actor.permission_overrides {
            if *granted {
                if actor.role.may_be_granted(*capability) {
                    held.insert(*capability);
                }
            } else {
                held.remove(capability);
            }
        }
        held
    }

    #[must_use]
    pub fn holds(actor: &Account, capability: Capability) -> bool {
        Self::effective_capabilities(actor).contains(&capability)
    }

    /// Allow/deny view of [`RoleAuthority::check`]. Denials are still audited.
    #[must_use]
    pub fn authorize(actor: &Account, capability: Capability, target: &SpaceId) -> bool {
        Self::check(actor, capability, target).is_ok()
    }

    /// Resolve one capability against one tenant.
    ///
    /// # Errors
    /// Returns `AccessDenied::Capability` when the capability is not held and
    /// `AccessDenied::Scope` when it is held but `target` is not the actor's
    /// home space (root is never scope-limited).
    pub fn check(
        actor: &Account,
        capability: Capability,
        target: &SpaceId,
    ) -> Result<(), AccessDenied> {
        if !Self::holds(actor, capability) {
            tracing::info!(
                target: AUDIT_TARGET,
                event = "capability_denied",
                actor = %actor.id,
                role = %actor.role,
                capability = %capability,
                space = %target,
                "capability denied"
            );
            return Err(AccessDenied::Capability {
                actor: actor.id.clone(),
                capability,
                space_id: target.clone(),
            });
        }
        if actor.role != Role::Root && &actor.home_space_id != target {
            tracing::warn!(
                target: AUDIT_TARGET,
                event = "scope_denied",
                actor = %actor.id,
                role = %actor.role,
                capability = %capability,
                home_space = %actor.home_space_id,
                space = %target,
                "cross-space access denied"
            );
            return Err(AccessDenied::Scope {
                actor: actor.id.clone(),
                capability,
                space_id: target.clone(),
            });
        }
        Ok(())
    }

    /// Account administration requires the capability in the subject's space
    /// and a strictly higher rank than the subject's role.
    ///
    /// # Errors
    /// Returns the capability/scope denial, or `AccessDenied::Capability` when
    /// the actor does not outrank `subject_role`.
    pub fn check_over(
        actor: &Account,
        capability: Capability,
        subject_space: &SpaceId,
        subject_role: Role,
    ) -> Result<(), AccessDenied> {
        Self::check(actor, capability, subject_space)?;
        if !actor.role.outranks(subject_role) {
            tracing::info!(
                target: AUDIT_TARGET,
                event = "rank_denied",
                actor = %actor.id,
                role = %actor.role,
                subject_role = %subject_role,
                capability = %capability,
                "actor does not outrank subject"
            );
            return Err(AccessDenied::Capability {
                actor: actor.id.clone(),
                capability,
                space_id: subject_space.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::secret::PasswordSecret;

    fn mk_account(role: Role, home: &str, overrides: &[(Capability, bool)]) -> Account {
        Account {
            id: AccountId::from_raw(format!("usr_{}_{home}", role.as_str())),
            username: format!("{}_{home}", role.as_str()),
            display_name: role.as_str().to_string(),
            password_secret: PasswordSecret::from_stored("secret"),
            role,
            home_space_id: SpaceId::from_raw(home),
            active: true,
            permission_overrides: overrides.iter().copied().collect::<BTreeMap<_, _>>(),
        }
    }

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::Member), Just(Role::Manager), Just(Role::Admin)]
    }

    fn capability_strategy() -> impl Strategy<Value = Capability> {
        (0..Capability::ALL.len()).prop_map(|index| Capability::ALL[index])
    }

    fn overrides_strategy() -> impl Strategy<Value = Vec<(Capability, bool)>> {
        prop::collection::vec((capability_strategy(), any::<bool>()), 0..12)
    }

    #[test]
    fn root_holds_everything_everywhere() {
        let root = mk_account(Role::Root, "master_space", &[(Capability::Edit, false)]);
        for capability in Capability::ALL {
            assert!(RoleAuthority::authorize(&root, capability, &SpaceId::from_raw("riyadh")));
        }
    }

    #[test]
    fn role_defaults_match_the_hierarchy() {
        let admin = mk_account(Role::Admin, "riyadh", &[]);
        let manager = mk_account(Role::Manager, "riyadh", &[]);
        let member = mk_account(Role::Member, "riyadh", &[]);
        let home = SpaceId::from_raw("riyadh");

        assert!(RoleAuthority::authorize(&admin, Capability::DeleteUser, &home));
        assert!(!RoleAuthority::authorize(&manager, Capability::DeleteUser, &home));
        assert!(RoleAuthority::authorize(&manager, Capability::CreateUser, &home));
        assert!(RoleAuthority::authorize(&member, Capability::Edit, &home));
        assert!(!RoleAuthority::authorize(&member, Capability::CreateUser, &home));
        assert!(!RoleAuthority::authorize(&admin, Capability::ManageSpaces, &home));
    }

    #[test]
    fn overrides_apply_after_defaults() {
        let home = SpaceId::from_raw("riyadh");
        let read_only = mk_account(Role::Member, "riyadh", &[(Capability::Edit, false)]);
        assert!(!RoleAuthority::authorize(&read_only, Capability::Edit, &home));
        assert!(RoleAuthority::authorize(&read_only, Capability::ViewTasks, &home));

        let trusted_manager =
            mk_account(Role::Manager, "riyadh", &[(Capability::DeleteUser, true)]);
        assert!(RoleAuthority::authorize(&trusted_manager, Capability::DeleteUser, &home));

        let overreaching_admin =
            mk_account(Role::Admin, "riyadh", &[(Capability::ManageSpaces, true)]);
        assert!(!RoleAuthority::authorize(&overreaching_admin, Capability::ManageSpaces, &home));
    }

    #[test]
    fn denial_kinds_are_distinguished() {
        let manager = mk_account(Role::Manager, "riyadh", &[]);
        let other = SpaceId::from_raw("jeddah");

        assert!(matches!(
            RoleAuthority::check(&manager, Capability::DeleteUser, &SpaceId::from_raw("riyadh")),
            Err(AccessDenied::Capability { .. })
        ));
        assert!(matches!(
            RoleAuthority::check(&manager, Capability::Edit, &other),
            Err(AccessDenied::Scope { .. })
        ));
    }

    #[test]
    fn inactive_accounts_hold_nothing() {
        let mut admin = mk_account(Role::Admin, "riyadh", &[]);
        admin.active = false;
        assert!(RoleAuthority::effective_capabilities(&admin).is_empty());
        assert!(!RoleAuthority::authorize(&admin, Capability::Edit, &SpaceId::from_raw("riyadh")));
    }

    #[test]
    fn account_administration_requires_outranking_the_subject() {
        let manager = mk_account(Role::Manager, "riyadh", &[]);
        let home = SpaceId::from_raw("riyadh");
        assert!(RoleAuthority::check_over(&manager, Capability::ManageUsers, &home, Role::Member)
            .is_ok());
        assert!(RoleAuthority::check_over(&manager, Capability::ManageUsers, &home, Role::Manager)
            .is_err());
        assert!(RoleAuthority::check_over(&manager, Capability::ManageUsers, &home, Role::Admin)
            .is_err());
    }

    proptest! {
        #[test]
        fn property_member_never_manages_users(overrides in overrides_strategy(), space in "[a-z]{1,8}") {
            let member = mk_account(Role::Member, "riyadh", &overrides);
            prop_assert!(!RoleAuthority::authorize(&member, Capability::ManageUsers, &SpaceId::from_raw(space)));
            prop_assert!(!RoleAuthority::authorize(&member, Capability::ManageUsers, &SpaceId::from_raw("riyadh")));
        }

        #[test]
        fn property_non_root_is_confined_to_home_space(
            role in role_strategy(),
            overrides in overrides_strategy(),
            capability in capability_strategy(),
            space in "[a-z]{1,8}",
        ) {
            let actor = mk_account(role, "home", &overrides);
            prop_assume!(space != "home");
            prop_assert!(!RoleAuthority::authorize(&actor, capability, &SpaceId::from_raw(space)));
        }
    }
}

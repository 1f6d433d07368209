//! Session state machine.
//!
//! `Unauthenticated -> Authenticating -> Authenticated | Unauthenticated`.
//! The configured bootstrap root is matched before the identity store and is
//! never stored there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spacedesk_core::{
    normalize_username, AccessDenied, Account, AccountId, Capability, IdentityStore,
    PasswordSecret, Role, RoleAuthority, SpaceId, SpaceRegistry, TrackerError, BOOTSTRAP_ROOT_ID,
};

use crate::config::BootstrapRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// What survives a restart under the `session` cache key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub account_id: AccountId,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub home_space_id: SpaceId,
}

impl SessionDescriptor {
    #[must_use]
    pub fn from_account(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            username: account.username.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            home_space_id: account.home_space_id.clone(),
        }
    }
}

pub struct SessionManager {
    bootstrap: BootstrapRoot,
    state: SessionState,
    actor: Option<Account>,
    active_space: Option<SpaceId>,
}

impl SessionManager {
    #[must_use]
    pub fn new(bootstrap: BootstrapRoot) -> Self {
        Self { bootstrap, state: SessionState::Unauthenticated, actor: None, active_space: None }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn actor(&self) -> Option<&Account> {
        self.actor.as_ref()
    }

    /// # Errors
    /// Returns `NotAuthenticated` outside an authenticated session.
    pub fn require_actor(&self) -> Result<&Account, TrackerError> {
        self.actor.as_ref().ok_or(TrackerError::NotAuthenticated)
    }

    #[must_use]
    pub fn active_space(&self) -> Option<&SpaceId> {
        self.active_space.as_ref()
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<SessionDescriptor> {
        self.actor.as_ref().map(SessionDescriptor::from_account)
    }

    /// The bootstrap username can never be claimed by a stored account.
    #[must_use]
    pub fn is_reserved_username(&self, username: &str) -> bool {
        normalize_username(username) == normalize_username(&self.bootstrap.username)
    }

    fn bootstrap_account(&self) -> Account {
        Account {
            id: AccountId::from_raw(BOOTSTRAP_ROOT_ID),
            username: normalize_username(&self.bootstrap.username),
            display_name: self.bootstrap.display_name.clone(),
            password_secret: PasswordSecret::from_stored(String::new()),
            role: Role::Root,
            home_space_id: SpaceId::master(),
            active: true,
            permission_overrides: BTreeMap::new(),
        }
    }

    /// Resolve credentials. On failure the session ends `Unauthenticated`.
    ///
    /// # Errors
    /// Returns `AuthenticationFailed` for unknown credentials and
    /// `AccountDisabled` for inactive accounts.
    pub fn login(
        &mut self,
        identities: &IdentityStore,
        username: &str,
        password: &str,
    ) -> Result<&Account, TrackerError> {
        self.clear();
        self.state = SessionState::Authenticating;

        let resolved = if self.is_reserved_username(username) && password == self.bootstrap.password
        {
            Ok(self.bootstrap_account())
        } else {
            identities.authenticate(username, password).cloned()
        };

        match resolved {
            Ok(account) => {
                tracing::info!(account = %account.id, role = %account.role, "session authenticated");
                Ok(self.establish(account))
            }
            Err(err) => {
                tracing::info!(username = %normalize_username(username), error = %err, "login rejected");
                self.state = SessionState::Unauthenticated;
                Err(err)
            }
        }
    }

    /// Re-establish a persisted session without credentials. The live account
    /// is re-read from the identity store; a descriptor whose account is gone
    /// or disabled is refused.
    pub fn restore(&mut self, descriptor: &SessionDescriptor, identities: &IdentityStore) -> bool {
        self.clear();
        let account = if descriptor.account_id.as_str() == BOOTSTRAP_ROOT_ID {
            Some(self.bootstrap_account())
        } else {
            identities.get(&descriptor.account_id).filter(|account| account.active).cloned()
        };
        match account {
            Some(account) => {
                tracing::info!(account = %account.id, "session restored");
                self.establish(account);
                true
            }
            None => {
                tracing::info!(account = %descriptor.account_id, "persisted session no longer valid");
                false
            }
        }
    }

    fn establish(&mut self, account: Account) -> &Account {
        self.active_space = Some(account.home_space_id.clone());
        self.state = SessionState::Authenticated;
        self.actor.insert(account)
    }

    /// Always succeeds. Returns the account that was signed in, if any.
    pub fn logout(&mut self) -> Option<Account> {
        let previous = self.actor.take();
        if let Some(account) = &previous {
            tracing::info!(account = %account.id, "session closed");
        }
        self.clear();
        previous
    }

    fn clear(&mut self) {
        self.actor = None;
        self.active_space = None;
        self.state = SessionState::Unauthenticated;
    }

    /// Pick up changes made to the signed-in account. A deactivated or
    /// deleted account ends the session; returns whether it is still live.
    pub fn refresh(&mut self, identities: &IdentityStore) -> bool {
        let Some(actor) = &self.actor else {
            return false;
        };
        if actor.is_bootstrap_root() {
            return true;
        }
        match identities.get(&actor.id).filter(|account| account.active).cloned() {
            Some(live) => {
                if live.home_space_id != actor.home_space_id {
                    self.active_space = Some(live.home_space_id.clone());
                }
                self.actor = Some(live);
                true
            }
            None => {
                self.logout();
                false
            }
        }
    }

    /// Select the space subsequent operations target.
    ///
    /// # Errors
    /// Returns `NotAuthenticated`, `NotFound` for unknown spaces, or a
    /// capability denial when a non-browsing actor leaves its home space.
    pub fn switch_space(
        &mut self,
        spaces: &SpaceRegistry,
        space_id: &SpaceId,
    ) -> Result<(), TrackerError> {
        let actor = self.require_actor()?;
        if !spaces.contains(space_id) {
            return Err(TrackerError::NotFound(format!("space {space_id}")));
        }
        if space_id != &actor.home_space_id && !RoleAuthority::holds(actor, Capability::BrowseSpaces) {
            tracing::info!(
                target: spacedesk_core::authority::AUDIT_TARGET,
                event = "capability_denied",
                actor = %actor.id,
                capability = %Capability::BrowseSpaces,
                space = %space_id,
                "space switch denied"
            );
            return Err(AccessDenied::Capability {
                actor: actor.id.clone(),
                capability: Capability::BrowseSpaces,
                space_id: space_id.clone(),
            }
            .into());
        }
        self.active_space = Some(space_id.clone());
        Ok(())
    }
}

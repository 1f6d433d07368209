//! Account storage and credential lookup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::authority::Capability;
use crate::ids::{AccountId, SpaceId};
use crate::model::{Account, Role};
use crate::secret::PasswordSecret;
use crate::TrackerError;

/// Canonical form of a username: trimmed and lower-cased.
#[must_use]
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Input for creating an account. The password is hashed on conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub display_name: String,
    pub password: String,
    pub role: Role,
    pub home_space_id: SpaceId,
    #[serde(default)]
    pub permission_overrides: BTreeMap<Capability, bool>,
}

impl NewAccount {
    /// Build an active account with a generated id.
    ///
    /// # Errors
    /// Returns a validation error for malformed fields, or a secret error when
    /// hashing fails.
    pub fn into_account(self) -> Result<Account, TrackerError> {
        let account = Account {
            id: AccountId::generate(),
            username: normalize_username(&self.username),
            display_name: self.display_name.trim().to_string(),
            password_secret: PasswordSecret::hash(&self.password)?,
            role: self.role,
            home_space_id: self.home_space_id,
            active: true,
            permission_overrides: self.permission_overrides,
        };
        account.validate()?;
        Ok(account)
    }
}

/// Known accounts. Usernames are unique case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct IdentityStore {
    accounts: Vec<Account>,
}

impl IdentityStore {
    #[must_use]
    pub fn from_accounts(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.iter().find(|account| &account.id == id)
    }

    #[must_use]
    pub fn find_by_username(&self, username: &str) -> Option<&Account> {
        let wanted = normalize_username(username);
        self.accounts.iter().find(|account| normalize_username(&account.username) == wanted)
    }

    #[must_use]
    pub fn username_taken(&self, username: &str, except: Option<&AccountId>) -> bool {
        self.find_by_username(username).is_some_and(|account| Some(&account.id) != except)
    }

    /// Seats in use: member accounts homed in `space_id`, active or not.
    #[must_use]
    pub fn member_count(&self, space_id: &SpaceId) -> usize {
        self.accounts
            .iter()
            .filter(|account| account.role == Role::Member && &account.home_space_id == space_id)
            .count()
    }

    #[must_use]
    pub fn accounts_in_space(&self, space_id: &SpaceId) -> Vec<&Account> {
        self.accounts.iter().filter(|account| &account.home_space_id == space_id).collect()
    }

    /// Add a new account.
    ///
    /// # Errors
    /// Returns a validation error for malformed accounts, or `Conflict` when
    /// the id or username is already present.
    pub fn insert(&mut self, account: Account) -> Result<(), TrackerError> {
        account.validate()?;
        if self.get(&account.id).is_some() {
            return Err(TrackerError::Conflict(format!("account id {} already exists", account.id)));
        }
        if self.username_taken(&account.username, None) {
            return Err(TrackerError::Conflict(format!(
                "username `{}` is already taken",
                account.username
            )));
        }
        self.accounts.push(account);
        Ok(())
    }

    /// Replace an existing account in place.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids, or `Conflict` when the new username
    /// belongs to another account.
    pub fn replace(&mut self, account: Account) -> Result<(), TrackerError> {
        account.validate()?;
        if self.username_taken(&account.username, Some(&account.id)) {
            return Err(TrackerError::Conflict(format!(
                "username `{}` is already taken",
                account.username
            )));
        }
        let slot = self
            .accounts
            .iter_mut()
            .find(|existing| existing.id == account.id)
            .ok_or_else(|| TrackerError::NotFound(format!("account {}", account.id)))?;
        *slot = account;
        Ok(())
    }

    pub fn remove(&mut self, id: &AccountId) -> Option<Account> {
        let index = self.accounts.iter().position(|account| &account.id == id)?;
        Some(self.accounts.remove(index))
    }

    /// Resolve credentials against the store.
    ///
    /// # Errors
    /// Returns `AuthenticationFailed` when no account matches the username and
    /// secret, and `AccountDisabled` when the match is inactive.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<&Account, TrackerError> {
        let account = self
            .find_by_username(username)
            .filter(|account| account.password_secret.verify(password))
            .ok_or(TrackerError::AuthenticationFailed)?;
        if !account.active {
            return Err(TrackerError::AccountDisabled { username: account.username.clone() });
        }
        Ok(account)
    }
}

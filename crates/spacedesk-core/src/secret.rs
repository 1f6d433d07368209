//! Password secrets.
//!
//! New secrets are stored as `argon2id:<salt hex>:<hash hex>`. Secrets that do
//! not carry the prefix are legacy plaintext values imported from the remote
//! `profiles.password` column and are verified by equality.

use std::fmt::{Debug, Formatter};

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::TrackerError;

const SECRET_PREFIX: &str = "argon2id";
const ARGON2_MEMORY_COST: u32 = 19_456; // 19 MiB
const ARGON2_TIME_COST: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

#[derive(Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct PasswordSecret(String);

impl PasswordSecret {
    /// Hash a plaintext password with a fresh random salt.
    ///
    /// # Errors
    /// Returns `TrackerError::Validation` for empty passwords and
    /// `TrackerError::Secret` when key derivation fails.
    pub fn hash(plain: &str) -> Result<Self, TrackerError> {
        if plain.is_empty() {
            return Err(TrackerError::Validation("password must not be empty".to_string()));
        }
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = derive(plain, &salt)?;
        Ok(Self(format!("{SECRET_PREFIX}:{}:{}", hex::encode(salt), hex::encode(digest))))
    }

    /// Wrap a secret exactly as it was stored (hashed or legacy plaintext).
    #[must_use]
    pub fn from_stored(stored: impl Into<String>) -> Self {
        Self(stored.into())
    }

    #[must_use]
    pub fn as_stored(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_hashed(&self) -> bool {
        self.0.starts_with(SECRET_PREFIX) && self.0.split(':').count() == 3
    }

    /// Check a candidate password. Malformed hashes never verify.
    #[must_use]
    pub fn verify(&self, candidate: &str) -> bool {
        if !self.is_hashed() {
            return !self.0.is_empty() && bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()));
        }
        let mut parts = self.0.split(':').skip(1);
        let (Some(salt_hex), Some(hash_hex)) = (parts.next(), parts.next()) else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
            return false;
        };
        match derive(candidate, &salt) {
            Ok(actual) => bool::from(actual.as_slice().ct_eq(expected.as_slice())),
            Err(_) => false,
        }
    }
}

impl Debug for PasswordSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordSecret(<redacted>)")
    }
}

fn derive(plain: &str, salt: &[u8]) -> Result<[u8; HASH_LEN], TrackerError> {
    let params =
        Params::new(ARGON2_MEMORY_COST, ARGON2_TIME_COST, ARGON2_PARALLELISM, Some(HASH_LEN))
            .map_err(|err| TrackerError::Secret(err.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; HASH_LEN];
    argon2
        .hash_password_into(plain.as_bytes(), salt, &mut out)
        .map_err(|err| TrackerError::Secret(err.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_secret_verifies_only_the_original_password() {
        let secret = match PasswordSecret::hash("0001000") {
            Ok(secret) => secret,
            Err(err) => panic!("hashing should succeed: {err}"),
        };
        assert!(secret.is_hashed());
        assert!(secret.verify("0001000"));
        assert!(!secret.verify("0001001"));
        assert!(!secret.as_stored().contains("0001000"));
    }

    #[test]
    fn same_password_hashes_to_distinct_secrets() {
        let a = PasswordSecret::hash("hunter22").unwrap_or_else(|err| panic!("{err}"));
        let b = PasswordSecret::hash("hunter22").unwrap_or_else(|err| panic!("{err}"));
        assert_ne!(a, b);
    }

    #[test]
    fn legacy_plaintext_secret_verifies_by_equality() {
        let legacy = PasswordSecret::from_stored("pass123");
        assert!(!legacy.is_hashed());
        assert!(legacy.verify("pass123"));
        assert!(!legacy.verify("PASS123"));
        assert!(!PasswordSecret::from_stored("").verify(""));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let broken = PasswordSecret::from_stored("argon2id:zz:zz");
        assert!(!broken.verify("anything"));
    }

    #[test]
    fn truncated_digest_never_verifies() {
        let secret = PasswordSecret::hash("0001000").unwrap_or_else(|err| panic!("{err}"));
        let stored = secret.as_stored();
        let truncated = PasswordSecret::from_stored(&stored[..stored.len() - 2]);
        assert!(truncated.is_hashed());
        assert!(!truncated.verify("0001000"));
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let secret = PasswordSecret::from_stored("pass123");
        assert_eq!(format!("{secret:?}"), "PasswordSecret(<redacted>)");
    }
}

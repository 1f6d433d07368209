//! Identifiers and date keys.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::macros::format_description;
use time::Date;
use ulid::Ulid;

use crate::TrackerError;

/// Identifier of the implicit, unbounded space that always exists.
pub const MASTER_SPACE_ID: &str = "master_space";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, prefixed ULID identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Ulid::new().to_string().to_lowercase()))
            }

            /// Wrap an identifier that was produced elsewhere (remote rows, cache blobs).
            #[must_use]
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(AccountId, "usr");
string_id!(
    /// Tenant identifier. `master_space` is reserved for the implicit master space.
    SpaceId,
    "spc"
);
string_id!(TaskId, "tsk");
string_id!(MediaId, "med");
string_id!(ActivityId, "act");

impl SpaceId {
    #[must_use]
    pub fn master() -> Self {
        Self(MASTER_SPACE_ID.to_string())
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        self.0 == MASTER_SPACE_ID
    }
}

/// Calendar date addressing a day record inside a space, rendered `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DateKey(Date);

impl DateKey {
    #[must_use]
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    /// Parse a `YYYY-MM-DD` key.
    ///
    /// # Errors
    /// Returns `TrackerError::Validation` when the input is not a calendar date.
    pub fn parse(raw: &str) -> Result<Self, TrackerError> {
        Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
            .map(Self)
            .map_err(|err| TrackerError::Validation(format!("invalid date key `{raw}`: {err}")))
    }

    #[must_use]
    pub fn date(self) -> Date {
        self.0
    }
}

impl Display for DateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_parses_and_renders_iso_dates() {
        let key = match DateKey::parse("2024-05-01") {
            Ok(key) => key,
            Err(err) => panic!("date key should parse: {err}"),
        };
        assert_eq!(key.to_string(), "2024-05-01");
        assert!(DateKey::parse("2024-13-01").is_err());
        assert!(DateKey::parse("yesterday").is_err());
    }

    #[test]
    fn date_key_serializes_as_plain_string() -> Result<(), serde_json::Error> {
        let key = DateKey::parse("2024-02-29").unwrap_or_else(|err| panic!("{err}"));
        let json = serde_json::to_string(&key)?;
        assert_eq!(json, "\"2024-02-29\"");
        let back: DateKey = serde_json::from_str(&json)?;
        assert_eq!(back, key);
        Ok(())
    }

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = AccountId::generate();
        let b = AccountId::generate();
        assert!(a.as_str().starts_with("usr_"));
        assert_ne!(a, b);
        assert!(SpaceId::master().is_master());
        assert!(!SpaceId::generate().is_master());
    }
}

use crate::error::IdentError;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::{SmolStr, format_smolstr};
use std::fmt;
use std::{ops::Deref, str::FromStr};

/// Record key: names a record within a collection.
///
/// Caller- or system-assigned. Restricted to the characters safe for
/// hierarchical storage keys; `.` and `..` are reserved.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RecordKey(SmolStr);

const MAX_LEN: usize = 512;

fn valid_chars(key: &str) -> bool {
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-'))
}

impl RecordKey {
    /// Fallible constructor, validates the record key grammar
    pub fn new(key: impl AsRef<str>) -> Result<Self, IdentError> {
        let key = key.as_ref();
        if key.is_empty() {
            Err(IdentError::empty("record key"))
        } else if key.len() > MAX_LEN {
            Err(IdentError::too_long("record key", key, MAX_LEN))
        } else if key == "." || key == ".." || !valid_chars(key) {
            Err(IdentError::grammar("record key", key))
        } else {
            Ok(Self(SmolStr::new(key)))
        }
    }

    /// Infallible constructor for when you *know* the string is a valid key.
    /// Panics on invalid input; prefer [`RecordKey::new`] for untrusted strings.
    pub fn raw(key: &str) -> Self {
        Self::new(key).expect("valid record key")
    }

    /// Generate a timestamp-derived key, unique enough for system-assigned
    /// records within a single-writer repository.
    pub fn generate() -> Self {
        let micros = Utc::now().timestamp_micros();
        Self(format_smolstr!("t{micros}"))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecordKey {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self.0)
    }
}

impl From<RecordKey> for String {
    fn from(value: RecordKey) -> Self {
        value.0.to_string()
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for RecordKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys() {
        assert!(RecordKey::new("self").is_ok());
        assert!(RecordKey::new("3l5yhcgz7y42y").is_ok());
        assert!(RecordKey::new("post-1_2:3~4.5").is_ok());
    }

    #[test]
    fn invalid_keys() {
        assert!(RecordKey::new("").is_err());
        assert!(RecordKey::new(".").is_err());
        assert!(RecordKey::new("..").is_err());
        assert!(RecordKey::new("has space").is_err());
        assert!(RecordKey::new("slash/key").is_err());
        assert!(RecordKey::new("a".repeat(513)).is_err());
    }

    #[test]
    fn generate_is_valid() {
        let key = RecordKey::generate();
        assert!(RecordKey::new(key.as_str()).is_ok());
    }
}

use crate::error::IdentError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};

/// Decentralized identifier naming a repository's owner.
///
/// Method-prefixed (`did:plc:...`, `did:key:...`, `did:web:...`). Stored as
/// an owned [`SmolStr`] because DIDs are small and copied into every commit.
#[derive(Clone, PartialEq, Eq, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

/// Regex for DID validation.
///
/// Requires a lowercase method segment and a non-empty method-specific
/// identifier that does not end with `:` or `%`. Does not validate that
/// percent-encoding is well-formed, matching reference implementations.
pub static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

impl Did {
    /// Fallible constructor, validates the DID grammar
    pub fn new(did: impl AsRef<str>) -> Result<Self, IdentError> {
        let did = did.as_ref();
        if did.is_empty() {
            Err(IdentError::empty("did"))
        } else if did.len() > 2048 {
            Err(IdentError::too_long("did", did, 2048))
        } else if !DID_REGEX.is_match(did) {
            Err(IdentError::grammar("did", did))
        } else {
            Ok(Self(SmolStr::new(did)))
        }
    }

    /// Infallible constructor for when you *know* the string is a valid DID.
    /// Panics on invalid input; prefer [`Did::new`] for untrusted strings.
    pub fn raw(did: &str) -> Self {
        Self::new(did).expect("valid DID")
    }

    /// The DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The method segment (e.g. `plc` for `did:plc:abc`)
    pub fn method(&self) -> &str {
        // both separators enforced by constructor
        let rest = &self.0["did:".len()..];
        let split = rest.find(':').expect("enforced by constructor");
        &rest[..split]
    }
}

impl FromStr for Did {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

impl From<Did> for String {
    fn from(value: Did) -> Self {
        value.0.to_string()
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Did {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_dids() {
        assert!(Did::new("did:plc:abc123").is_ok());
        assert!(Did::new("did:web:example.com").is_ok());
        assert!(Did::new("did:key:zQ3shok").is_ok());
        assert!(Did::new("did:method:val_ue").is_ok());
        assert!(Did::new("did:method:val%20ue").is_ok());
    }

    #[test]
    fn must_start_with_did() {
        assert!(Did::new("DID:plc:foo").is_err());
        assert!(Did::new("plc:foo").is_err());
        assert!(Did::new("foo").is_err());
        assert!(Did::new("").is_err());
    }

    #[test]
    fn method_must_be_lowercase() {
        assert!(Did::new("did:plc:foo").is_ok());
        assert!(Did::new("did:PLC:foo").is_err());
    }

    #[test]
    fn cannot_end_with_colon_or_percent() {
        assert!(Did::new("did:plc:foo:").is_err());
        assert!(Did::new("did:plc:foo%").is_err());
        assert!(Did::new("did:plc:foo:bar").is_ok());
    }

    #[test]
    fn max_length() {
        let valid = format!("did:plc:{}", "a".repeat(2048 - 8));
        assert!(Did::new(&valid).is_ok());

        let too_long = format!("did:plc:{}", "a".repeat(2049 - 8));
        assert!(Did::new(&too_long).is_err());
    }

    #[test]
    fn method_accessor() {
        assert_eq!(Did::raw("did:plc:alice123").method(), "plc");
        assert_eq!(Did::raw("did:web:example.com").method(), "web");
    }

    #[test]
    fn serde_round_trip() {
        let did = Did::raw("did:plc:alice123");
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, "\"did:plc:alice123\"");
        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
    }

    #[test]
    fn deserialize_rejects_invalid() {
        assert!(serde_json::from_str::<Did>("\"not-a-did\"").is_err());
    }
}

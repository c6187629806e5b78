use crate::error::IdentError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;
use std::fmt;
use std::sync::LazyLock;
use std::{ops::Deref, str::FromStr};

/// Namespaced collection identifier (e.g. `app.bsky.feed.post`).
///
/// Dot-segmented, at least two segments. Stored as [`SmolStr`] because most
/// NSIDs are short even though the grammar permits long ones.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Nsid(SmolStr);

/// Regex for NSID validation: two or more dot-separated segments, each
/// starting with a letter, containing only alphanumerics and hyphens, and
/// not ending with a hyphen.
pub static NSID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$")
        .unwrap()
});

impl Nsid {
    /// Fallible constructor, validates the NSID grammar
    pub fn new(nsid: impl AsRef<str>) -> Result<Self, IdentError> {
        let nsid = nsid.as_ref();
        if nsid.is_empty() {
            Err(IdentError::empty("nsid"))
        } else if nsid.len() > 317 {
            Err(IdentError::too_long("nsid", nsid, 317))
        } else if !NSID_REGEX.is_match(nsid) {
            Err(IdentError::grammar("nsid", nsid))
        } else {
            Ok(Self(SmolStr::new(nsid)))
        }
    }

    /// Infallible constructor for when you *know* the string is a valid NSID.
    /// Panics on invalid input; prefer [`Nsid::new`] for untrusted strings.
    pub fn raw(nsid: &str) -> Self {
        Self::new(nsid).expect("valid NSID")
    }

    /// The NSID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The authority part (everything before the final segment)
    pub fn authority(&self) -> &str {
        let split = self.0.rfind('.').expect("enforced by constructor");
        &self.0[..split]
    }

    /// The name segment (everything after the final dot)
    pub fn name(&self) -> &str {
        let split = self.0.rfind('.').expect("enforced by constructor");
        &self.0[split + 1..]
    }
}

impl FromStr for Nsid {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Nsid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Nsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Nsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nsid({})", self.0)
    }
}

impl From<Nsid> for String {
    fn from(value: Nsid) -> Self {
        value.0.to_string()
    }
}

impl AsRef<str> for Nsid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Nsid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_nsids() {
        assert!(Nsid::new("app.bsky.feed.post").is_ok());
        assert!(Nsid::new("app.bsky.actor.profile").is_ok());
        assert!(Nsid::new("com.example.thing").is_ok());
        assert!(Nsid::new("a.b").is_ok());
    }

    #[test]
    fn requires_two_segments() {
        assert!(Nsid::new("post").is_err());
        assert!(Nsid::new("").is_err());
    }

    #[test]
    fn segment_grammar() {
        assert!(Nsid::new("app..post").is_err());
        assert!(Nsid::new(".app.post").is_err());
        assert!(Nsid::new("app.post.").is_err());
        assert!(Nsid::new("app.1post").is_err());
        assert!(Nsid::new("app.po st").is_err());
        assert!(Nsid::new("app.post-").is_err());
        assert!(Nsid::new("app.po-st").is_ok());
    }

    #[test]
    fn max_length() {
        let long = format!("com.{}.name", "a".repeat(400));
        assert!(Nsid::new(&long).is_err());
    }

    #[test]
    fn accessors() {
        let nsid = Nsid::raw("app.bsky.feed.post");
        assert_eq!(nsid.authority(), "app.bsky.feed");
        assert_eq!(nsid.name(), "post");
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Nsid::raw("app.bsky.actor.profile");
        let b = Nsid::raw("app.bsky.feed.post");
        assert!(a < b);
    }
}

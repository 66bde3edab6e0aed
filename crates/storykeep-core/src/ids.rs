//! Strong identifier types for storykeep.
//!
//! All identifiers are newtypes over the opaque string keys handed out by
//! the backing relational store. Newtypes prevent, at compile time, passing
//! a site id where a story id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// View the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// A story in the platform content store.
    StoryId
);
string_id!(
    /// A platform user (storyteller, reviewer, admin).
    UserId
);
string_id!(
    /// The tenant boundary a record belongs to.
    TenantId
);
string_id!(
    /// An organization within a tenant.
    OrgId
);
string_id!(
    /// A registered external site/application.
    SiteId
);
string_id!(
    /// A consent record in the ledger.
    ConsentId
);
string_id!(
    /// A capability token record (share link or embed token).
    TokenId
);
string_id!(
    /// A cross-site syndication consent.
    SyndicationId
);

/// Mint a fresh record identifier: 16 random bytes, hex-encoded.
///
/// Used for ids the ledger assigns itself (consent records, tokens).
/// Story/user/site ids always come from the surrounding platform.
pub(crate) fn fresh_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl ConsentId {
    /// Mint a fresh consent id.
    pub fn fresh() -> Self {
        Self(fresh_id())
    }
}

impl TokenId {
    /// Mint a fresh token id.
    pub fn fresh() -> Self {
        Self(fresh_id())
    }
}

impl SyndicationId {
    /// Mint a fresh syndication consent id.
    pub fn fresh() -> Self {
        Self(fresh_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        let id = StoryId::new("story-42");
        assert_eq!(id.to_string(), "story-42");
        assert_eq!(StoryId::from("story-42"), id);
    }

    #[test]
    fn test_fresh_ids_are_distinct() {
        let a = ConsentId::fresh();
        let b = ConsentId::fresh();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_serde_transparent() {
        let id = SiteId::new("gallery");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"gallery\"");
        let back: SiteId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

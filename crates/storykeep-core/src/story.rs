//! Story metadata as seen by the consent core.
//!
//! The story content model lives outside this workspace; the consent core
//! only reads the handful of fields that gate sharing decisions.

use serde::{Deserialize, Serialize};

use crate::ids::{OrgId, StoryId, TenantId, UserId};

/// Cultural permission classification of a story.
///
/// `Restricted` and `Sacred` always require elder review before any
/// cross-boundary sharing may activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CulturalLevel {
    Public,
    Community,
    Restricted,
    Sacred,
}

impl CulturalLevel {
    /// String form used in storage and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            CulturalLevel::Public => "public",
            CulturalLevel::Community => "community",
            CulturalLevel::Restricted => "restricted",
            CulturalLevel::Sacred => "sacred",
        }
    }

    /// Parse the storage form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(CulturalLevel::Public),
            "community" => Some(CulturalLevel::Community),
            "restricted" => Some(CulturalLevel::Restricted),
            "sacred" => Some(CulturalLevel::Sacred),
            _ => None,
        }
    }
}

/// Lifecycle status of a story, as reported by the story store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    Published,
    Archived,
    /// The storyteller withdrew the story itself. A hard stop on issuing
    /// new tokens, independent of any consent record.
    Withdrawn,
}

/// The slice of story metadata the consent core consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRef {
    pub id: StoryId,
    pub storyteller_id: UserId,
    pub tenant_id: TenantId,
    pub organization_id: Option<OrgId>,
    pub cultural_level: CulturalLevel,
    /// Set by cultural reviewers on the story itself; forces elder review
    /// even for otherwise public material.
    pub requires_elder_review: bool,
    pub status: StoryStatus,
}

impl StoryRef {
    /// Whether the given caller owns this story.
    pub fn is_owned_by(&self, caller: &UserId) -> bool {
        &self.storyteller_id == caller
    }

    /// Whether the story itself is withdrawn.
    pub fn is_withdrawn(&self) -> bool {
        self.status == StoryStatus::Withdrawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cultural_level_roundtrip() {
        for level in [
            CulturalLevel::Public,
            CulturalLevel::Community,
            CulturalLevel::Restricted,
            CulturalLevel::Sacred,
        ] {
            assert_eq!(CulturalLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(CulturalLevel::parse("unknown"), None);
    }
}

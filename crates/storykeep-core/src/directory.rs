//! Contracts for external collaborators.
//!
//! The consent core does not own stories, identities, or site registration;
//! it consumes them through these traits. Production wires them to the
//! platform's existing services; tests use the in-memory fixtures from
//! `storykeep-testkit`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{OrgId, SiteId, StoryId, UserId};
use crate::story::StoryRef;
use crate::token::TokenHash;

/// Collaborator failure. Transient by construction; callers decide whether
/// to retry (read-only status checks retry once, mutations never do).
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Read access to story metadata.
#[async_trait]
pub trait StoryDirectory: Send + Sync {
    async fn get_story(&self, id: &StoryId) -> Result<Option<StoryRef>, DirectoryError>;
}

/// Roles relevant to consent review, resolved by the identity service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerRoles {
    pub is_elder: bool,
    pub is_admin: bool,
    pub is_cultural_reviewer: bool,
}

impl CallerRoles {
    /// Whether the caller may verify or reject pending consents.
    pub fn can_review(&self) -> bool {
        self.is_elder || self.is_admin || self.is_cultural_reviewer
    }
}

/// Role lookup for verify authorization.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn caller_roles(&self, user: &UserId) -> Result<CallerRoles, DirectoryError>;
}

/// A registered external site/application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: SiteId,
    pub name: String,
    pub allowed_domains: Vec<String>,
    pub organization_id: Option<OrgId>,
    /// Explicitly whitelisted sites may receive syndication from any
    /// organization; others must share the story's organization boundary.
    pub whitelisted: bool,
}

/// Site registry: API-key resolution and site metadata.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    async fn resolve_api_key(&self, key_hash: &TokenHash)
        -> Result<Option<SiteId>, DirectoryError>;

    async fn get_site(&self, id: &SiteId) -> Result<Option<SiteRecord>, DirectoryError>;
}

/// A media attachment reference inside story content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub kind: String,
    pub url: String,
}

/// Story content as handed over by the content store for external reads.
/// The access validator shapes this down before anything leaves the
/// platform; collaborators always hand over the full view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContent {
    pub id: StoryId,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub media: Vec<MediaRef>,
    pub attribution_name: Option<String>,
}

/// Read access to story content, used only on a validated external read.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn get_content(&self, id: &StoryId) -> Result<Option<StoryContent>, DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reviewer_roles() {
        assert!(!CallerRoles::default().can_review());
        assert!(CallerRoles {
            is_elder: true,
            ..Default::default()
        }
        .can_review());
        assert!(CallerRoles {
            is_cultural_reviewer: true,
            ..Default::default()
        }
        .can_review());
    }
}

//! Capability artifacts: share tokens, syndication consents, embed tokens.
//!
//! These are caches of a prior approval, never the source of truth. Every
//! validator re-checks the parent consent's live state on each use, so a
//! withdrawal invalidates all derived artifacts without enumerating them.

use serde::{Deserialize, Serialize};

use crate::ids::{ConsentId, OrgId, SiteId, StoryId, SyndicationId, TenantId, TokenId, UserId};
use crate::story::CulturalLevel;
use crate::time::is_expired;
use crate::token::TokenHash;

/// An ephemeral capability for direct link sharing.
///
/// Created only by the story's owner; logically destroyed by setting
/// `revoked`, never physically deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareToken {
    pub id: TokenId,
    pub story_id: StoryId,
    pub tenant_id: TenantId,
    /// The opaque token string, kept so the owner can re-read the link.
    pub token: String,
    /// Blake3 hash of `token`; the only value used for request-time lookup.
    pub token_hash: TokenHash,
    pub purpose: String,
    /// Channels the link was shared to, e.g. "email", "whatsapp".
    pub shared_to: Vec<String>,
    pub watermark: Option<String>,
    pub expires_at: i64,
    pub max_views: Option<u32>,
    pub view_count: u32,
    pub revoked: bool,
    pub created_by: UserId,
    pub created_at: i64,
    pub last_accessed_at: Option<i64>,
}

impl ShareToken {
    /// Whether the token would validate right now, ignoring the live state
    /// of the parent story/consent (the validator checks that separately).
    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked
            && !is_expired(self.expires_at, now)
            && self.max_views.map_or(true, |max| self.view_count < max)
    }

    /// Views remaining under the cap, if capped.
    pub fn remaining_views(&self) -> Option<u32> {
        self.max_views.map(|max| max.saturating_sub(self.view_count))
    }
}

/// What a syndication consent allows the external site to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePermissions {
    /// Full story content. When false, only a server-side excerpt leaves
    /// the platform.
    pub full_content: bool,
    pub excerpt_only: bool,
    pub media: bool,
    pub comments: bool,
    pub analytics: bool,
}

impl SharePermissions {
    /// Excerpt-only defaults: the most conservative useful grant.
    pub fn excerpt() -> Self {
        Self {
            full_content: false,
            excerpt_only: true,
            media: false,
            comments: false,
            analytics: false,
        }
    }

    /// Human-readable list of allowed uses for the `sharing` response block.
    pub fn allowed_uses(&self) -> Vec<&'static str> {
        let mut uses = Vec::new();
        if self.full_content {
            uses.push("full_content");
        }
        if self.excerpt_only {
            uses.push("excerpt");
        }
        if self.media {
            uses.push("media");
        }
        if self.comments {
            uses.push("comments");
        }
        if self.analytics {
            uses.push("analytics");
        }
        uses
    }
}

/// State of a syndication consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyndicationState {
    PendingApproval,
    Approved,
    Denied,
    Revoked,
}

impl SyndicationState {
    pub fn is_active(&self) -> bool {
        matches!(self, SyndicationState::Approved)
    }

    /// Pending and approved consents block a second grant for the same
    /// (story, site) pair.
    pub fn blocks_duplicate(&self) -> bool {
        matches!(
            self,
            SyndicationState::PendingApproval | SyndicationState::Approved
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyndicationState::PendingApproval => "pending_approval",
            SyndicationState::Approved => "approved",
            SyndicationState::Denied => "denied",
            SyndicationState::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_approval" => Some(SyndicationState::PendingApproval),
            "approved" => Some(SyndicationState::Approved),
            "denied" => Some(SyndicationState::Denied),
            "revoked" => Some(SyndicationState::Revoked),
            _ => None,
        }
    }
}

/// Per (story, external site) cross-boundary grant.
///
/// Always anchored to an active ledger consent record (`consent_id`);
/// revoking that record invalidates this grant and every embed token
/// derived from it at the next validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyndicationConsent {
    pub id: SyndicationId,
    pub story_id: StoryId,
    pub site_id: SiteId,
    pub storyteller_id: UserId,
    pub tenant_id: TenantId,
    pub organization_id: Option<OrgId>,
    pub consent_id: ConsentId,
    pub state: SyndicationState,
    pub expires_at: Option<i64>,
    pub permissions: SharePermissions,
    pub cultural_level: CulturalLevel,
    pub requires_elder_approval: bool,
    pub requested_by: UserId,
    pub requested_at: i64,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub revocation_reason: Option<String>,
    pub view_count: u64,
    pub version: u64,
}

impl SyndicationConsent {
    /// Whether this consent authorizes reads right now, ignoring the live
    /// parent consent record (checked separately by the validator).
    pub fn is_active(&self, now: i64) -> bool {
        self.state.is_active()
            && match self.expires_at {
                Some(at) => !is_expired(at, now),
                None => true,
            }
    }
}

/// Domain-scoped token minted once a syndication consent is approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedToken {
    pub id: TokenId,
    pub syndication_id: SyndicationId,
    pub story_id: StoryId,
    pub site_id: SiteId,
    pub token: String,
    pub token_hash: TokenHash,
    pub allowed_domains: Vec<String>,
    pub expires_at: i64,
    pub revoked: bool,
    pub created_at: i64,
}

impl EmbedToken {
    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && !is_expired(self.expires_at, now)
    }

    /// Whether the requesting origin is inside the allowed domain list.
    /// An empty list means the parent site registered no restriction.
    pub fn allows_domain(&self, origin: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        self.allowed_domains
            .iter()
            .any(|d| origin == d || origin.ends_with(&format!(".{d}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: i64, max_views: Option<u32>, views: u32, revoked: bool) -> ShareToken {
        let raw = crate::token::generate_token();
        ShareToken {
            id: TokenId::fresh(),
            story_id: StoryId::new("story-1"),
            tenant_id: TenantId::new("tenant-1"),
            token_hash: TokenHash::of(&raw),
            token: raw,
            purpose: "direct_share".to_string(),
            shared_to: vec![],
            watermark: None,
            expires_at,
            max_views,
            view_count: views,
            revoked,
            created_by: UserId::new("teller-1"),
            created_at: 0,
            last_accessed_at: None,
        }
    }

    #[test]
    fn test_share_token_active_window() {
        let t = token(1000, None, 0, false);
        assert!(t.is_active(999));
        assert!(!t.is_active(1000)); // boundary is inclusive
        assert!(!t.is_active(2000));
    }

    #[test]
    fn test_share_token_view_cap() {
        let t = token(i64::MAX, Some(3), 2, false);
        assert!(t.is_active(0));
        assert_eq!(t.remaining_views(), Some(1));
        let exhausted = token(i64::MAX, Some(3), 3, false);
        assert!(!exhausted.is_active(0));
    }

    #[test]
    fn test_revoked_beats_remaining_views() {
        let t = token(i64::MAX, Some(3), 1, true);
        assert!(!t.is_active(0));
    }

    #[test]
    fn test_embed_domain_scoping() {
        let raw = crate::token::generate_token();
        let embed = EmbedToken {
            id: TokenId::fresh(),
            syndication_id: SyndicationId::fresh(),
            story_id: StoryId::new("story-1"),
            site_id: SiteId::new("gallery"),
            token_hash: TokenHash::of(&raw),
            token: raw,
            allowed_domains: vec!["gallery.example.org".to_string()],
            expires_at: i64::MAX,
            revoked: false,
            created_at: 0,
        };
        assert!(embed.allows_domain("gallery.example.org"));
        assert!(embed.allows_domain("cdn.gallery.example.org"));
        assert!(!embed.allows_domain("evil.example.com"));
    }

    #[test]
    fn test_allowed_uses_listing() {
        let perms = SharePermissions {
            full_content: true,
            excerpt_only: false,
            media: true,
            comments: false,
            analytics: true,
        };
        assert_eq!(perms.allowed_uses(), vec!["full_content", "media", "analytics"]);
    }
}

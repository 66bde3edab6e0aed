//! Append-only audit entries.
//!
//! Every grant, verification, withdrawal, token issuance, and validated
//! access produces one entry. Entries are never mutated or deleted; the
//! store exposes no update path for them.

use serde::{Deserialize, Serialize};

use crate::ids::{SiteId, StoryId, UserId};
use crate::token::TokenHash;

/// Who performed the audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum AuditActor {
    User(UserId),
    /// External sites are identified by the hash of their API key; the key
    /// itself never appears in the log.
    ApiKey(String),
    /// Anonymous bearer of a share link.
    Bearer,
}

impl AuditActor {
    pub fn api_key(hash: &TokenHash) -> Self {
        AuditActor::ApiKey(hash.to_hex())
    }
}

/// Kind of entity the action targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityKind {
    Consent,
    ShareToken,
    SyndicationConsent,
    EmbedToken,
    Story,
}

impl AuditEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntityKind::Consent => "consent",
            AuditEntityKind::ShareToken => "share_token",
            AuditEntityKind::SyndicationConsent => "syndication_consent",
            AuditEntityKind::EmbedToken => "embed_token",
            AuditEntityKind::Story => "story",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consent" => Some(AuditEntityKind::Consent),
            "share_token" => Some(AuditEntityKind::ShareToken),
            "syndication_consent" => Some(AuditEntityKind::SyndicationConsent),
            "embed_token" => Some(AuditEntityKind::EmbedToken),
            "story" => Some(AuditEntityKind::Story),
            _ => None,
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ConsentGranted,
    ConsentVerified,
    ConsentRejected,
    ConsentWithdrawn,
    ConsentUpdated,
    TokenIssued,
    TokenRevoked,
    EmbedTokenIssued,
    EmbedTokenRevoked,
    ShareAccess,
    ApiRead,
    EmbedAccess,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ConsentGranted => "consent_granted",
            AuditAction::ConsentVerified => "consent_verified",
            AuditAction::ConsentRejected => "consent_rejected",
            AuditAction::ConsentWithdrawn => "consent_withdrawn",
            AuditAction::ConsentUpdated => "consent_updated",
            AuditAction::TokenIssued => "token_issued",
            AuditAction::TokenRevoked => "token_revoked",
            AuditAction::EmbedTokenIssued => "embed_token_issued",
            AuditAction::EmbedTokenRevoked => "embed_token_revoked",
            AuditAction::ShareAccess => "share_access",
            AuditAction::ApiRead => "api_read",
            AuditAction::EmbedAccess => "embed_access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consent_granted" => Some(AuditAction::ConsentGranted),
            "consent_verified" => Some(AuditAction::ConsentVerified),
            "consent_rejected" => Some(AuditAction::ConsentRejected),
            "consent_withdrawn" => Some(AuditAction::ConsentWithdrawn),
            "consent_updated" => Some(AuditAction::ConsentUpdated),
            "token_issued" => Some(AuditAction::TokenIssued),
            "token_revoked" => Some(AuditAction::TokenRevoked),
            "embed_token_issued" => Some(AuditAction::EmbedTokenIssued),
            "embed_token_revoked" => Some(AuditAction::EmbedTokenRevoked),
            "share_access" => Some(AuditAction::ShareAccess),
            "api_read" => Some(AuditAction::ApiRead),
            "embed_access" => Some(AuditAction::EmbedAccess),
            _ => None,
        }
    }
}

/// Allow/deny outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Granted,
    Denied,
}

impl AuditDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditDecision::Granted => "granted",
            AuditDecision::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "granted" => Some(AuditDecision::Granted),
            "denied" => Some(AuditDecision::Denied),
            _ => None,
        }
    }
}

/// Request metadata captured alongside validated accesses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: AuditActor,
    pub entity_kind: AuditEntityKind,
    pub entity_id: String,
    pub action: AuditAction,
    pub decision: AuditDecision,
    pub reason: Option<String>,
    pub story_id: Option<StoryId>,
    /// Set for syndication/API entries; indexed for compliance export.
    pub site_id: Option<SiteId>,
    pub request: Option<RequestMetadata>,
    /// State snapshots around consent transitions.
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub at: i64,
}

impl AuditEntry {
    /// Minimal granted entry; optional fields added with the builders below.
    pub fn granted(
        actor: AuditActor,
        entity_kind: AuditEntityKind,
        entity_id: impl Into<String>,
        action: AuditAction,
        at: i64,
    ) -> Self {
        Self {
            actor,
            entity_kind,
            entity_id: entity_id.into(),
            action,
            decision: AuditDecision::Granted,
            reason: None,
            story_id: None,
            site_id: None,
            request: None,
            previous_state: None,
            new_state: None,
            at,
        }
    }

    /// Minimal denied entry with the denial reason code.
    pub fn denied(
        actor: AuditActor,
        entity_kind: AuditEntityKind,
        entity_id: impl Into<String>,
        action: AuditAction,
        reason: impl Into<String>,
        at: i64,
    ) -> Self {
        Self {
            reason: Some(reason.into()),
            decision: AuditDecision::Denied,
            ..Self::granted(actor, entity_kind, entity_id, action, at)
        }
    }

    pub fn with_story(mut self, story_id: StoryId) -> Self {
        self.story_id = Some(story_id);
        self
    }

    pub fn with_site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn with_request(mut self, request: RequestMetadata) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_states(
        mut self,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }
}

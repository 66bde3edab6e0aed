//! The Platform: unified API for consent, tokens, and access.
//!
//! Wires the consent ledger, the token issuer, the syndication service,
//! and the access validator over one shared store and one set of
//! platform directories.

use std::path::Path;
use std::sync::Arc;

use storykeep_access::{AccessValidator, ApiView, EmbedView, ShareView, SlidingWindow};
use storykeep_consent::{ConsentLedger, ConsentStatus, GrantRequest, WithdrawRequest};
use storykeep_core::{
    ConsentRecord, ContentSource, EmbedToken, RequestMetadata, RoleDirectory, SiteId,
    SiteRegistry, SharePermissions, StoryDirectory, StoryId, SyndicationConsent, SyndicationId,
    TokenId, UserId,
};
use storykeep_store::{MemoryStore, SqliteStore, Store};
use storykeep_tokens::{
    CreateShareLink, EmbedTokenView, IssuerConfig, ShareLink, ShareTokenView, SyndicationRequest,
    SyndicationService, TokenIssuer,
};

use crate::error::Result;

/// External collaborator lookups the platform depends on.
///
/// Stories, roles, sites, and content live in other subsystems; the
/// consent services consult them through these traits.
#[derive(Clone)]
pub struct Directories {
    pub stories: Arc<dyn StoryDirectory>,
    pub roles: Arc<dyn RoleDirectory>,
    pub sites: Arc<dyn SiteRegistry>,
    pub content: Arc<dyn ContentSource>,
}

/// Configuration for the Platform.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Base URL prepended to minted share links.
    pub share_base_url: String,
    /// Lifetime of embed tokens, in milliseconds.
    pub embed_token_ttl_ms: i64,
    /// Per-API-key rate limit applied before consent checks.
    pub rate_limit: SlidingWindow,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let issuer = IssuerConfig::default();
        Self {
            share_base_url: issuer.share_base_url,
            embed_token_ttl_ms: issuer.embed_token_ttl_ms,
            rate_limit: SlidingWindow::default(),
        }
    }
}

impl PlatformConfig {
    fn issuer(&self) -> IssuerConfig {
        IssuerConfig {
            share_base_url: self.share_base_url.clone(),
            embed_token_ttl_ms: self.embed_token_ttl_ms,
        }
    }
}

/// The main Platform struct.
///
/// Provides a unified API for:
/// - Granting, verifying, and withdrawing consent
/// - Minting and revoking share links and embed tokens
/// - Requesting and reviewing syndication consents
/// - Validating external reads
pub struct Platform<S: Store> {
    store: Arc<S>,
    ledger: ConsentLedger<S>,
    issuer: TokenIssuer<S>,
    syndication: SyndicationService<S>,
    validator: AccessValidator<S>,
}

impl Platform<MemoryStore> {
    /// Platform over the in-memory store.
    pub fn in_memory(directories: Directories, config: PlatformConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), directories, config)
    }
}

impl Platform<SqliteStore> {
    /// Platform over a SQLite file, creating and migrating it as needed.
    pub fn open(
        path: impl AsRef<Path>,
        directories: Directories,
        config: PlatformConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            Arc::new(SqliteStore::open(path)?),
            directories,
            config,
        ))
    }
}

impl<S: Store> Platform<S> {
    /// Create a platform over an already-open store.
    pub fn new(store: Arc<S>, directories: Directories, config: PlatformConfig) -> Self {
        let ledger = ConsentLedger::new(
            Arc::clone(&store),
            directories.stories.clone(),
            directories.roles.clone(),
        );
        let issuer = TokenIssuer::new(
            Arc::clone(&store),
            directories.stories.clone(),
            directories.sites.clone(),
            config.issuer(),
        );
        let syndication = SyndicationService::new(
            Arc::clone(&store),
            directories.stories.clone(),
            directories.sites.clone(),
            directories.roles.clone(),
        );
        let validator = AccessValidator::new(
            Arc::clone(&store),
            directories.stories.clone(),
            directories.sites.clone(),
            directories.content.clone(),
            config.rate_limit,
        );
        Self {
            store,
            ledger,
            issuer,
            syndication,
            validator,
        }
    }

    /// Direct store access, for audit queries and admin tooling.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ── Consent ledger ──────────────────────────────────────────────────

    pub async fn grant_consent(&self, request: GrantRequest) -> Result<ConsentRecord> {
        Ok(self.ledger.grant(request).await?)
    }

    pub async fn withdraw_consent(&self, request: WithdrawRequest) -> Result<Vec<ConsentRecord>> {
        Ok(self.ledger.withdraw(request).await?)
    }

    pub async fn verify_consent(
        &self,
        story_id: &StoryId,
        reviewer_id: &UserId,
        approved: bool,
        notes: Option<String>,
        purpose: Option<&str>,
    ) -> Result<ConsentRecord> {
        Ok(self
            .ledger
            .verify(story_id, reviewer_id, approved, notes, purpose)
            .await?)
    }

    /// Read-only standing check; never audited.
    pub async fn consent_status(
        &self,
        story_id: &StoryId,
        purpose: &str,
    ) -> Result<Option<ConsentStatus>> {
        Ok(self.ledger.check_status(story_id, purpose).await?)
    }

    pub async fn consent_history(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<ConsentRecord>> {
        Ok(self.ledger.list(story_id, caller_id).await?)
    }

    // ── Share links ─────────────────────────────────────────────────────

    pub async fn create_share_link(&self, request: CreateShareLink) -> Result<ShareLink> {
        Ok(self.issuer.create_share_link(request).await?)
    }

    pub async fn revoke_share_link(&self, token_id: &TokenId, caller_id: &UserId) -> Result<()> {
        Ok(self.issuer.revoke_share_link(token_id, caller_id).await?)
    }

    pub async fn list_share_links(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<ShareTokenView>> {
        Ok(self.issuer.list_share_links(story_id, caller_id).await?)
    }

    // ── Syndication ─────────────────────────────────────────────────────

    pub async fn request_syndication(
        &self,
        request: SyndicationRequest,
    ) -> Result<SyndicationConsent> {
        Ok(self.syndication.request(request).await?)
    }

    pub async fn review_syndication(
        &self,
        id: &SyndicationId,
        reviewer_id: &UserId,
        approved: bool,
        reason: Option<String>,
    ) -> Result<SyndicationConsent> {
        Ok(self
            .syndication
            .review(id, reviewer_id, approved, reason)
            .await?)
    }

    pub async fn revoke_syndication(
        &self,
        id: &SyndicationId,
        caller_id: &UserId,
        reason: Option<String>,
    ) -> Result<SyndicationConsent> {
        Ok(self.syndication.revoke(id, caller_id, reason).await?)
    }

    pub async fn revoke_story_syndications(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
        reason: Option<String>,
    ) -> Result<Vec<SyndicationConsent>> {
        Ok(self
            .syndication
            .revoke_all_for_story(story_id, caller_id, reason)
            .await?)
    }

    pub async fn update_syndication(
        &self,
        id: &SyndicationId,
        caller_id: &UserId,
        permissions: Option<SharePermissions>,
        expires_in: Option<i64>,
    ) -> Result<SyndicationConsent> {
        Ok(self
            .syndication
            .update(id, caller_id, permissions, expires_in)
            .await?)
    }

    pub async fn syndication_for(
        &self,
        story_id: &StoryId,
        site_id: &SiteId,
    ) -> Result<Option<SyndicationConsent>> {
        Ok(self.syndication.get_for(story_id, site_id).await?)
    }

    pub async fn syndications_for_story(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<SyndicationConsent>> {
        Ok(self.syndication.list_for_story(story_id, caller_id).await?)
    }

    pub async fn syndications_for_site(
        &self,
        site_id: &SiteId,
    ) -> Result<Vec<SyndicationConsent>> {
        Ok(self.syndication.list_for_site(site_id).await?)
    }

    pub async fn issue_embed_token(&self, syndication_id: &SyndicationId) -> Result<EmbedToken> {
        Ok(self.issuer.issue_embed_token(syndication_id).await?)
    }

    pub async fn revoke_embed_token(&self, token_id: &TokenId, caller_id: &UserId) -> Result<()> {
        Ok(self.issuer.revoke_embed_token(token_id, caller_id).await?)
    }

    pub async fn revoke_story_embeds(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<u32> {
        Ok(self.issuer.revoke_story_embeds(story_id, caller_id).await?)
    }

    pub async fn list_embed_tokens(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<EmbedTokenView>> {
        Ok(self.issuer.list_embed_tokens(story_id, caller_id).await?)
    }

    // ── Access validation ───────────────────────────────────────────────

    pub async fn validate_share_token(
        &self,
        presented: &str,
        request: RequestMetadata,
    ) -> Result<ShareView> {
        Ok(self.validator.validate_share_token(presented, request).await?)
    }

    pub async fn validate_api_access(
        &self,
        api_key: &str,
        story_id: &StoryId,
        request: RequestMetadata,
    ) -> Result<ApiView> {
        Ok(self
            .validator
            .validate_api_access(api_key, story_id, request)
            .await?)
    }

    pub async fn validate_embed_token(
        &self,
        presented: &str,
        origin: Option<&str>,
        request: RequestMetadata,
    ) -> Result<EmbedView> {
        Ok(self
            .validator
            .validate_embed_token(presented, origin, request)
            .await?)
    }
}

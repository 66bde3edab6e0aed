//! Capability token issuer: share links and embed tokens.
//!
//! Share links are creator-initiated capabilities and deliberately do not
//! require a ledger consent record; a storyteller distributing their own
//! story is not a third-party use. Embed tokens, by contrast, derive from
//! an approved syndication consent and inherit its domain scoping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storykeep_core::{
    generate_token, now_millis, AuditAction, AuditActor, AuditEntityKind, AuditEntry, DAY_MS,
    EmbedToken, ShareToken, SiteRegistry, StoryDirectory, StoryId, SyndicationId, SyndicationState,
    TokenHash, TokenId, UserId,
};
use storykeep_store::{AuditSink, Store};

use crate::error::{Result, TokenError};

/// Issuer configuration.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Base URL share links are formed against.
    pub share_base_url: String,
    /// Embed token lifetime from issuance.
    pub embed_token_ttl_ms: i64,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            share_base_url: "http://localhost:8080".to_string(),
            embed_token_ttl_ms: 30 * DAY_MS,
        }
    }
}

/// Parameters for creating a share link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShareLink {
    pub story_id: StoryId,
    pub caller_id: UserId,
    /// Relative lifetime in milliseconds.
    pub expires_in: i64,
    pub max_views: Option<u32>,
    pub purpose: String,
    #[serde(default)]
    pub shared_to: Vec<String>,
    pub watermark: Option<String>,
}

/// A freshly minted share link: the stored token plus the outward URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLink {
    pub token: ShareToken,
    pub url: String,
}

/// A listed token with its derived liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareTokenView {
    pub token: ShareToken,
    pub is_active: bool,
    pub url: String,
}

/// A listed embed token with its derived liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedTokenView {
    pub token: EmbedToken,
    pub is_active: bool,
}

/// Mints share-link and embed tokens.
pub struct TokenIssuer<S: Store> {
    store: Arc<S>,
    stories: Arc<dyn StoryDirectory>,
    sites: Arc<dyn SiteRegistry>,
    audit: AuditSink<S>,
    config: IssuerConfig,
}

impl<S: Store> TokenIssuer<S> {
    pub fn new(
        store: Arc<S>,
        stories: Arc<dyn StoryDirectory>,
        sites: Arc<dyn SiteRegistry>,
        config: IssuerConfig,
    ) -> Self {
        let audit = AuditSink::new(Arc::clone(&store));
        Self {
            store,
            stories,
            sites,
            audit,
            config,
        }
    }

    fn share_url(&self, token: &str) -> String {
        format!(
            "{}/share/{}",
            self.config.share_base_url.trim_end_matches('/'),
            token
        )
    }

    /// Mint an ephemeral share link for the caller's own story.
    pub async fn create_share_link(&self, request: CreateShareLink) -> Result<ShareLink> {
        let story = self
            .stories
            .get_story(&request.story_id)
            .await?
            .ok_or_else(|| TokenError::StoryNotFound(request.story_id.to_string()))?;

        if !story.is_owned_by(&request.caller_id) {
            return Err(TokenError::Forbidden);
        }
        if story.is_withdrawn() {
            return Err(TokenError::WithdrawnStoryConsent);
        }

        let now = now_millis();
        let raw = generate_token();
        let token = ShareToken {
            id: TokenId::fresh(),
            story_id: request.story_id,
            tenant_id: story.tenant_id,
            token_hash: TokenHash::of(&raw),
            token: raw.clone(),
            purpose: request.purpose,
            shared_to: request.shared_to,
            watermark: request.watermark,
            expires_at: now + request.expires_in,
            max_views: request.max_views,
            view_count: 0,
            revoked: false,
            created_by: request.caller_id,
            created_at: now,
            last_accessed_at: None,
        };

        self.store.insert_share_token(&token).await?;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(token.created_by.clone()),
                    AuditEntityKind::ShareToken,
                    token.id.as_str(),
                    AuditAction::TokenIssued,
                    now,
                )
                .with_story(token.story_id.clone()),
            )
            .await;

        let url = self.share_url(&raw);
        Ok(ShareLink { token, url })
    }

    /// Revoke a share link. Idempotent, but only for the creator.
    pub async fn revoke_share_link(&self, token_id: &TokenId, caller_id: &UserId) -> Result<()> {
        let token = self
            .store
            .get_share_token_by_id(token_id)
            .await?
            .ok_or_else(|| TokenError::NotFound(token_id.to_string()))?;

        if &token.created_by != caller_id {
            return Err(TokenError::Forbidden);
        }
        if token.revoked {
            return Ok(());
        }

        self.store.set_share_token_revoked(token_id).await?;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(caller_id.clone()),
                    AuditEntityKind::ShareToken,
                    token_id.as_str(),
                    AuditAction::TokenRevoked,
                    now_millis(),
                )
                .with_story(token.story_id),
            )
            .await;

        Ok(())
    }

    /// List the caller's own share links for a story, with derived
    /// liveness. Tokens created by other users are never returned.
    pub async fn list_share_links(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<ShareTokenView>> {
        let now = now_millis();
        Ok(self
            .store
            .list_share_tokens(story_id, caller_id)
            .await?
            .into_iter()
            .map(|token| ShareTokenView {
                is_active: token.is_active(now),
                url: self.share_url(&token.token),
                token,
            })
            .collect())
    }

    /// Mint a domain-scoped embed token against an approved syndication
    /// consent. The allowed-domain list comes from the site registry.
    pub async fn issue_embed_token(&self, syndication_id: &SyndicationId) -> Result<EmbedToken> {
        let consent = self
            .store
            .get_syndication(syndication_id)
            .await?
            .ok_or_else(|| TokenError::NotFound(syndication_id.to_string()))?;

        if consent.state != SyndicationState::Approved {
            return Err(TokenError::ConsentNotApproved);
        }

        let site = self
            .sites
            .get_site(&consent.site_id)
            .await?
            .ok_or_else(|| TokenError::SiteNotFound(consent.site_id.to_string()))?;

        let now = now_millis();
        let raw = generate_token();
        let token = EmbedToken {
            id: TokenId::fresh(),
            syndication_id: consent.id.clone(),
            story_id: consent.story_id.clone(),
            site_id: consent.site_id.clone(),
            token_hash: TokenHash::of(&raw),
            token: raw,
            allowed_domains: site.allowed_domains,
            expires_at: now + self.config.embed_token_ttl_ms,
            revoked: false,
            created_at: now,
        };

        self.store.insert_embed_token(&token).await?;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(consent.storyteller_id.clone()),
                    AuditEntityKind::EmbedToken,
                    token.id.as_str(),
                    AuditAction::EmbedTokenIssued,
                    now,
                )
                .with_story(token.story_id.clone())
                .with_site(token.site_id.clone()),
            )
            .await;

        Ok(token)
    }

    /// Revoke an embed token. Embed tokens carry no creator, so the gate
    /// is ownership of the underlying story. Idempotent.
    pub async fn revoke_embed_token(&self, token_id: &TokenId, caller_id: &UserId) -> Result<()> {
        let token = self
            .store
            .get_embed_token_by_id(token_id)
            .await?
            .ok_or_else(|| TokenError::NotFound(token_id.to_string()))?;

        let story = self
            .stories
            .get_story(&token.story_id)
            .await?
            .ok_or_else(|| TokenError::StoryNotFound(token.story_id.to_string()))?;
        if !story.is_owned_by(caller_id) {
            return Err(TokenError::Forbidden);
        }
        if token.revoked {
            return Ok(());
        }

        self.store.set_embed_token_revoked(token_id).await?;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(caller_id.clone()),
                    AuditEntityKind::EmbedToken,
                    token_id.as_str(),
                    AuditAction::EmbedTokenRevoked,
                    now_millis(),
                )
                .with_story(token.story_id)
                .with_site(token.site_id),
            )
            .await;

        Ok(())
    }

    /// Revoke every live embed token for a story in one sweep. Used when
    /// a storyteller pulls a story back from syndication partners.
    /// Returns the number of tokens revoked.
    pub async fn revoke_story_embeds(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<u32> {
        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| TokenError::StoryNotFound(story_id.to_string()))?;
        if !story.is_owned_by(caller_id) {
            return Err(TokenError::Forbidden);
        }

        let mut revoked = 0;
        for token in self.store.list_embed_tokens(story_id).await? {
            if token.revoked {
                continue;
            }
            self.store.set_embed_token_revoked(&token.id).await?;
            self.audit
                .record(
                    AuditEntry::granted(
                        AuditActor::User(caller_id.clone()),
                        AuditEntityKind::EmbedToken,
                        token.id.as_str(),
                        AuditAction::EmbedTokenRevoked,
                        now_millis(),
                    )
                    .with_story(token.story_id)
                    .with_site(token.site_id),
                )
                .await;
            revoked += 1;
        }
        Ok(revoked)
    }

    /// List a story's embed tokens with derived liveness, newest first.
    /// Only the story's owner may look.
    pub async fn list_embed_tokens(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<EmbedTokenView>> {
        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| TokenError::StoryNotFound(story_id.to_string()))?;
        if !story.is_owned_by(caller_id) {
            return Err(TokenError::Forbidden);
        }

        let now = now_millis();
        Ok(self
            .store
            .list_embed_tokens(story_id)
            .await?
            .into_iter()
            .map(|token| EmbedTokenView {
                is_active: token.is_active(now),
                token,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storykeep_core::{
        ConsentId, CulturalLevel, SharePermissions, StoryStatus, SyndicationConsent, DAY_MS,
    };
    use storykeep_store::MemoryStore;
    use storykeep_testkit::TestWorld;

    fn issuer(world: &TestWorld) -> TokenIssuer<MemoryStore> {
        TokenIssuer::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.sites.clone(),
            IssuerConfig {
                share_base_url: "https://stories.example.org".to_string(),
                ..Default::default()
            },
        )
    }

    fn create_request() -> CreateShareLink {
        CreateShareLink {
            story_id: TestWorld::public_story(),
            caller_id: TestWorld::teller(),
            expires_in: 7 * DAY_MS,
            max_views: Some(3),
            purpose: "direct_share".to_string(),
            shared_to: vec!["email".to_string()],
            watermark: None,
        }
    }

    #[tokio::test]
    async fn test_create_share_link() {
        let world = TestWorld::new();
        let issuer = issuer(&world);

        let link = issuer.create_share_link(create_request()).await.unwrap();
        assert!(link.url.starts_with("https://stories.example.org/share/"));
        assert!(link.url.ends_with(&link.token.token));
        // 32 random bytes, hex-encoded.
        assert_eq!(link.token.token.len(), 64);
        assert_eq!(link.token.view_count, 0);

        let stored = world
            .store
            .get_share_token(&link.token.token_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, link.token.id);
    }

    #[tokio::test]
    async fn test_create_rejects_non_owner() {
        let world = TestWorld::new();
        let issuer = issuer(&world);

        let mut request = create_request();
        request.caller_id = TestWorld::other_teller();
        let err = issuer.create_share_link(request).await.unwrap_err();
        assert!(matches!(err, TokenError::Forbidden));
    }

    #[tokio::test]
    async fn test_create_rejects_withdrawn_story() {
        let world = TestWorld::new();
        let issuer = issuer(&world);

        world
            .stories
            .set_status(&TestWorld::public_story(), StoryStatus::Withdrawn);
        let err = issuer.create_share_link(create_request()).await.unwrap_err();
        assert!(matches!(err, TokenError::WithdrawnStoryConsent));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_creator_only() {
        let world = TestWorld::new();
        let issuer = issuer(&world);

        let link = issuer.create_share_link(create_request()).await.unwrap();

        let err = issuer
            .revoke_share_link(&link.token.id, &TestWorld::other_teller())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Forbidden));

        issuer
            .revoke_share_link(&link.token.id, &TestWorld::teller())
            .await
            .unwrap();
        // Second revoke is a no-op.
        issuer
            .revoke_share_link(&link.token.id, &TestWorld::teller())
            .await
            .unwrap();

        let stored = world
            .store
            .get_share_token_by_id(&link.token.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.revoked);
    }

    #[tokio::test]
    async fn test_list_derives_liveness_and_filters_by_creator() {
        let world = TestWorld::new();
        let issuer = issuer(&world);

        let live = issuer.create_share_link(create_request()).await.unwrap();
        let dead = issuer.create_share_link(create_request()).await.unwrap();
        issuer
            .revoke_share_link(&dead.token.id, &TestWorld::teller())
            .await
            .unwrap();

        let listed = issuer
            .list_share_links(&TestWorld::public_story(), &TestWorld::teller())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        for view in &listed {
            if view.token.id == live.token.id {
                assert!(view.is_active);
            } else {
                assert!(!view.is_active);
            }
        }

        // Another user sees nothing, not Forbidden.
        let other = issuer
            .list_share_links(&TestWorld::public_story(), &TestWorld::other_teller())
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_embed_token_requires_approved_syndication() {
        let world = TestWorld::new();
        let issuer = issuer(&world);

        let err = issuer
            .issue_embed_token(&SyndicationId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::NotFound(_)));
    }

    async fn approved_syndication(world: &TestWorld) -> SyndicationId {
        let consent = SyndicationConsent {
            id: SyndicationId::fresh(),
            story_id: TestWorld::public_story(),
            site_id: TestWorld::site(),
            storyteller_id: TestWorld::teller(),
            tenant_id: TestWorld::tenant(),
            organization_id: None,
            consent_id: ConsentId::fresh(),
            state: SyndicationState::Approved,
            expires_at: None,
            permissions: SharePermissions::excerpt(),
            cultural_level: CulturalLevel::Public,
            requires_elder_approval: false,
            requested_by: TestWorld::teller(),
            requested_at: 1000,
            approved_by: Some(TestWorld::teller()),
            approved_at: Some(1000),
            revoked_at: None,
            revocation_reason: None,
            view_count: 0,
            version: 1,
        };
        world.store.insert_syndication(&consent).await.unwrap();
        consent.id
    }

    #[tokio::test]
    async fn test_revoke_embed_token_is_owner_gated_and_idempotent() {
        let world = TestWorld::new();
        let issuer = issuer(&world);
        let syndication = approved_syndication(&world).await;
        let token = issuer.issue_embed_token(&syndication).await.unwrap();

        let err = issuer
            .revoke_embed_token(&token.id, &TestWorld::other_teller())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Forbidden));

        issuer
            .revoke_embed_token(&token.id, &TestWorld::teller())
            .await
            .unwrap();
        // Second revoke is a no-op.
        issuer
            .revoke_embed_token(&token.id, &TestWorld::teller())
            .await
            .unwrap();

        let stored = world
            .store
            .get_embed_token_by_id(&token.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.revoked);

        let err = issuer
            .revoke_embed_token(&TokenId::fresh(), &TestWorld::teller())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_revoke_story_embeds_sweeps_live_tokens() {
        let world = TestWorld::new();
        let issuer = issuer(&world);
        let syndication = approved_syndication(&world).await;
        let first = issuer.issue_embed_token(&syndication).await.unwrap();
        let second = issuer.issue_embed_token(&syndication).await.unwrap();

        issuer
            .revoke_embed_token(&first.id, &TestWorld::teller())
            .await
            .unwrap();

        // Already-revoked tokens are skipped, not counted again.
        let revoked = issuer
            .revoke_story_embeds(&TestWorld::public_story(), &TestWorld::teller())
            .await
            .unwrap();
        assert_eq!(revoked, 1);

        let stored = world
            .store
            .get_embed_token_by_id(&second.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.revoked);
    }

    #[tokio::test]
    async fn test_list_embed_tokens_is_owner_only_with_liveness() {
        let world = TestWorld::new();
        let issuer = issuer(&world);
        let syndication = approved_syndication(&world).await;
        let live = issuer.issue_embed_token(&syndication).await.unwrap();
        let dead = issuer.issue_embed_token(&syndication).await.unwrap();
        issuer
            .revoke_embed_token(&dead.id, &TestWorld::teller())
            .await
            .unwrap();

        let listed = issuer
            .list_embed_tokens(&TestWorld::public_story(), &TestWorld::teller())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        for view in &listed {
            assert_eq!(view.is_active, view.token.id == live.id);
        }

        let err = issuer
            .list_embed_tokens(&TestWorld::public_story(), &TestWorld::other_teller())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Forbidden));
    }
}

//! The access validator: every external read passes through here.
//!
//! Tokens and syndication consents are caches of a prior approval, so
//! each validation re-checks the live state of the story and its ledger
//! consent before honoring the artifact. Withdrawal therefore invalidates
//! everything derived from a story at its next use, with no enumeration.
//!
//! Every attempt, allowed or denied, produces one audit entry, with a
//! single exception: rate-limited requests are dropped before the consent
//! check and leave no entry, so a misbehaving key cannot flood the log.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storykeep_core::{
    is_expired, now_millis, AuditAction, AuditActor, AuditEntityKind, AuditEntry, ContentSource,
    EmbedToken, RequestMetadata, ShareToken, SiteId, SiteRegistry, StoryDirectory, StoryId,
    StoryRef, SyndicationConsent, SyndicationId, TokenHash,
};
use storykeep_store::{AuditSink, Store, ViewConsume};

use crate::error::{AccessError, Result};
use crate::ratelimit::SlidingWindow;
use crate::shape::{shape_for_share, shape_for_syndication, ShapedStory};

/// A successful share-link validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareView {
    pub story: ShapedStory,
    pub watermark: Option<String>,
    pub remaining_views: Option<u32>,
    pub expires_at: i64,
}

/// A successful API-key read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiView {
    pub story: ShapedStory,
    pub site_id: SiteId,
    pub view_count: u64,
}

/// A successful embed-token validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedView {
    pub story: ShapedStory,
    pub syndication_id: SyndicationId,
    pub expires_at: i64,
}

/// Validates share tokens, API-key reads, and embed tokens.
pub struct AccessValidator<S: Store> {
    store: Arc<S>,
    stories: Arc<dyn StoryDirectory>,
    sites: Arc<dyn SiteRegistry>,
    content: Arc<dyn ContentSource>,
    audit: AuditSink<S>,
    rate_limit: SlidingWindow,
}

impl<S: Store> AccessValidator<S> {
    pub fn new(
        store: Arc<S>,
        stories: Arc<dyn StoryDirectory>,
        sites: Arc<dyn SiteRegistry>,
        content: Arc<dyn ContentSource>,
        rate_limit: SlidingWindow,
    ) -> Self {
        let audit = AuditSink::new(Arc::clone(&store));
        Self {
            store,
            stories,
            sites,
            content,
            audit,
            rate_limit,
        }
    }

    /// Story lookup with one retry. Read-only status checks may retry a
    /// transient collaborator failure; the atomic view consume never does,
    /// to avoid double-counting.
    async fn story_with_retry(&self, id: &StoryId) -> Result<Option<StoryRef>> {
        match self.stories.get_story(id).await {
            Ok(story) => Ok(story),
            Err(first) => {
                tracing::warn!(story = %id, error = %first, "story lookup failed, retrying once");
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(self.stories.get_story(id).await?)
            }
        }
    }

    async fn audit_attempt<T>(
        &self,
        actor: AuditActor,
        kind: AuditEntityKind,
        entity_id: String,
        action: AuditAction,
        story_id: Option<StoryId>,
        site_id: Option<SiteId>,
        request: RequestMetadata,
        result: &Result<T>,
        now: i64,
    ) {
        let mut entry = match result {
            Ok(_) => AuditEntry::granted(actor, kind, entity_id, action, now),
            Err(e) => AuditEntry::denied(actor, kind, entity_id, action, e.reason(), now),
        };
        if let Some(story) = story_id {
            entry = entry.with_story(story);
        }
        if let Some(site) = site_id {
            entry = entry.with_site(site);
        }
        self.audit.record(entry.with_request(request)).await;
    }

    /// Validate a presented share-link token and consume one view.
    pub async fn validate_share_token(
        &self,
        presented: &str,
        request: RequestMetadata,
    ) -> Result<ShareView> {
        let now = now_millis();
        let hash = TokenHash::of(presented);

        // Pre-read for the live-state checks and audit identity; the
        // conditional consume below remains the only gate on the cap.
        let known = self.store.get_share_token(&hash).await?;
        let result = match &known {
            None => Err(AccessError::NotFound),
            Some(token) => self.share_checks(token, &hash, now).await,
        };

        let entity_id = known
            .as_ref()
            .map(|t| t.id.as_str().to_string())
            .unwrap_or_else(|| hash.to_hex());
        self.audit_attempt(
            AuditActor::Bearer,
            AuditEntityKind::ShareToken,
            entity_id,
            AuditAction::ShareAccess,
            known.as_ref().map(|t| t.story_id.clone()),
            None,
            request,
            &result,
            now,
        )
        .await;

        result
    }

    async fn share_checks(
        &self,
        token: &ShareToken,
        hash: &TokenHash,
        now: i64,
    ) -> Result<ShareView> {
        // Withdrawal pre-empts token state: check the story and ledger
        // before even looking at expiry or the cap.
        let story = self
            .story_with_retry(&token.story_id)
            .await?
            .ok_or(AccessError::NotFound)?;
        if story.is_withdrawn() {
            return Err(AccessError::ConsentWithdrawn);
        }
        if let Some(at) = self.store.latest_full_withdrawal(&token.story_id).await? {
            if at >= token.created_at {
                return Err(AccessError::ConsentWithdrawn);
            }
        }

        match self.store.consume_share_view(hash, now).await? {
            ViewConsume::NotFound => Err(AccessError::NotFound),
            ViewConsume::Expired => Err(AccessError::Expired),
            ViewConsume::Revoked => Err(AccessError::Revoked),
            ViewConsume::LimitReached => Err(AccessError::ViewLimitReached),
            ViewConsume::Consumed(consumed) => {
                let content = self
                    .content
                    .get_content(&consumed.story_id)
                    .await?
                    .ok_or(AccessError::NotFound)?;
                Ok(ShareView {
                    story: shape_for_share(content),
                    watermark: consumed.watermark.clone(),
                    remaining_views: consumed.remaining_views(),
                    expires_at: consumed.expires_at,
                })
            }
        }
    }

    /// Validate an external API read against the site's syndication
    /// consent and shape the payload per its permission flags.
    pub async fn validate_api_access(
        &self,
        api_key: &str,
        story_id: &StoryId,
        request: RequestMetadata,
    ) -> Result<ApiView> {
        let now = now_millis();
        let key_hash = TokenHash::of(api_key);

        let site_id = self
            .sites
            .resolve_api_key(&key_hash)
            .await?
            .ok_or(AccessError::InvalidKey)?;

        // Rate limiting comes first and is the one denial that leaves no
        // audit entry.
        if !self
            .rate_limit
            .check_and_record(self.store.as_ref(), &key_hash, now)
            .await?
        {
            return Err(AccessError::RateLimited);
        }

        let result = self.api_checks(story_id, &site_id, now).await;

        self.audit_attempt(
            AuditActor::api_key(&key_hash),
            AuditEntityKind::Story,
            story_id.as_str().to_string(),
            AuditAction::ApiRead,
            Some(story_id.clone()),
            Some(site_id.clone()),
            request,
            &result,
            now,
        )
        .await;

        result
    }

    async fn api_checks(
        &self,
        story_id: &StoryId,
        site_id: &SiteId,
        now: i64,
    ) -> Result<ApiView> {
        let consent = self
            .store
            .get_syndication_for(story_id, site_id)
            .await?
            .ok_or(AccessError::ConsentNotGranted)?;

        if !consent.state.is_active() {
            return Err(AccessError::ConsentNotGranted);
        }
        if let Some(at) = consent.expires_at {
            if is_expired(at, now) {
                return Err(AccessError::ConsentExpired);
            }
        }

        self.live_parent_checks(&consent, now).await?;

        let content = self
            .content
            .get_content(story_id)
            .await?
            .ok_or(AccessError::NotFound)?;

        self.store.increment_syndication_views(&consent.id).await?;

        Ok(ApiView {
            story: shape_for_syndication(content, &consent.permissions),
            site_id: site_id.clone(),
            view_count: consent.view_count + 1,
        })
    }

    /// Validate a presented embed token against its origin and its parent
    /// syndication consent.
    pub async fn validate_embed_token(
        &self,
        presented: &str,
        origin: Option<&str>,
        request: RequestMetadata,
    ) -> Result<EmbedView> {
        let now = now_millis();
        let hash = TokenHash::of(presented);

        let known = self.store.get_embed_token(&hash).await?;
        let result = match &known {
            None => Err(AccessError::NotFound),
            Some(token) => self.embed_checks(token, origin, now).await,
        };

        let entity_id = known
            .as_ref()
            .map(|t| t.id.as_str().to_string())
            .unwrap_or_else(|| hash.to_hex());
        self.audit_attempt(
            AuditActor::Bearer,
            AuditEntityKind::EmbedToken,
            entity_id,
            AuditAction::EmbedAccess,
            known.as_ref().map(|t| t.story_id.clone()),
            known.as_ref().map(|t| t.site_id.clone()),
            request,
            &result,
            now,
        )
        .await;

        result
    }

    async fn embed_checks(
        &self,
        token: &EmbedToken,
        origin: Option<&str>,
        now: i64,
    ) -> Result<EmbedView> {
        if token.revoked {
            return Err(AccessError::Revoked);
        }
        if is_expired(token.expires_at, now) {
            return Err(AccessError::Expired);
        }
        if let Some(origin) = origin {
            if !token.allows_domain(origin) {
                return Err(AccessError::DomainNotAllowed);
            }
        }

        let consent = self
            .store
            .get_syndication(&token.syndication_id)
            .await?
            .ok_or(AccessError::ConsentNotGranted)?;
        if !consent.state.is_active() {
            return Err(AccessError::ConsentNotGranted);
        }
        if let Some(at) = consent.expires_at {
            if is_expired(at, now) {
                return Err(AccessError::ConsentExpired);
            }
        }

        self.live_parent_checks(&consent, now).await?;

        let content = self
            .content
            .get_content(&token.story_id)
            .await?
            .ok_or(AccessError::NotFound)?;

        self.store.increment_syndication_views(&consent.id).await?;

        Ok(EmbedView {
            story: shape_for_syndication(content, &consent.permissions),
            syndication_id: consent.id.clone(),
            expires_at: token.expires_at,
        })
    }

    /// Re-check the story and the anchoring ledger record. A withdrawn
    /// story or a non-active anchor kills every derived artifact.
    async fn live_parent_checks(&self, consent: &SyndicationConsent, now: i64) -> Result<()> {
        let story = self
            .story_with_retry(&consent.story_id)
            .await?
            .ok_or(AccessError::NotFound)?;
        if story.is_withdrawn() {
            return Err(AccessError::ConsentWithdrawn);
        }

        let anchor = self
            .store
            .get_consent(&consent.consent_id)
            .await?
            .ok_or(AccessError::ConsentWithdrawn)?;
        if !anchor.is_active(now) {
            return Err(AccessError::ConsentWithdrawn);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storykeep_consent::{ConsentLedger, GrantRequest, WithdrawRequest};
    use storykeep_core::{ConsentMethod, SharePermissions, WithdrawalScope, DAY_MS};
    use storykeep_store::MemoryStore;
    use storykeep_testkit::TestWorld;
    use storykeep_tokens::{
        CreateShareLink, IssuerConfig, SyndicationRequest, SyndicationService, TokenIssuer,
        SYNDICATION_PURPOSE,
    };

    fn validator(world: &TestWorld) -> AccessValidator<MemoryStore> {
        AccessValidator::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.sites.clone(),
            world.content.clone(),
            SlidingWindow::default(),
        )
    }

    fn ledger(world: &TestWorld) -> ConsentLedger<MemoryStore> {
        ConsentLedger::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.roles.clone(),
        )
    }

    fn issuer(world: &TestWorld) -> TokenIssuer<MemoryStore> {
        TokenIssuer::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.sites.clone(),
            IssuerConfig::default(),
        )
    }

    fn syndication(world: &TestWorld) -> SyndicationService<MemoryStore> {
        SyndicationService::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.sites.clone(),
            world.roles.clone(),
        )
    }

    async fn make_share_link(world: &TestWorld, max_views: Option<u32>) -> String {
        issuer(world)
            .create_share_link(CreateShareLink {
                story_id: TestWorld::public_story(),
                caller_id: TestWorld::teller(),
                expires_in: 7 * DAY_MS,
                max_views,
                purpose: "direct_share".to_string(),
                shared_to: vec![],
                watermark: Some("shared via storykeep".to_string()),
            })
            .await
            .unwrap()
            .token
            .token
    }

    async fn approved_syndication(world: &TestWorld) {
        ledger(world)
            .grant(GrantRequest {
                story_id: TestWorld::public_story(),
                storyteller_id: TestWorld::teller(),
                method: ConsentMethod::Digital,
                purpose: SYNDICATION_PURPOSE.to_string(),
                scope: "syndication".to_string(),
                expires_in: None,
                restrictions: vec![],
                witness_id: None,
            })
            .await
            .unwrap();
        syndication(world)
            .request(SyndicationRequest {
                story_id: TestWorld::public_story(),
                site_id: TestWorld::site(),
                requested_by: TestWorld::teller(),
                permissions: SharePermissions::excerpt(),
                expires_in: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_share_token_validates_and_counts() {
        let world = TestWorld::new();
        let validator = validator(&world);
        let raw = make_share_link(&world, Some(3)).await;

        let view = validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap();
        assert_eq!(view.remaining_views, Some(2));
        assert_eq!(view.watermark.as_deref(), Some("shared via storykeep"));
        assert_eq!(view.story.title, "The River Crossing");
    }

    #[tokio::test]
    async fn test_share_token_view_cap_exhausts() {
        let world = TestWorld::new();
        let validator = validator(&world);
        let raw = make_share_link(&world, Some(3)).await;

        for _ in 0..3 {
            validator
                .validate_share_token(&raw, RequestMetadata::default())
                .await
                .unwrap();
        }
        let err = validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::ViewLimitReached));
    }

    #[tokio::test]
    async fn test_concurrent_validations_respect_cap_of_one() {
        let world = TestWorld::new();
        let validator = Arc::new(validator(&world));
        let raw = make_share_link(&world, Some(1)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let validator = Arc::clone(&validator);
            let raw = raw.clone();
            handles.push(tokio::spawn(async move {
                validator
                    .validate_share_token(&raw, RequestMetadata::default())
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_revocation_beats_remaining_views() {
        let world = TestWorld::new();
        let validator = validator(&world);
        let issuer = issuer(&world);
        let raw = make_share_link(&world, Some(3)).await;

        validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap();

        let token = world
            .store
            .get_share_token(&TokenHash::of(&raw))
            .await
            .unwrap()
            .unwrap();
        issuer
            .revoke_share_link(&token.id, &TestWorld::teller())
            .await
            .unwrap();

        let err = validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Revoked));
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let world = TestWorld::new();
        let validator = validator(&world);

        let err = validator
            .validate_share_token("not-a-real-token", RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound));
    }

    #[tokio::test]
    async fn test_full_withdrawal_kills_existing_share_tokens() {
        let world = TestWorld::new();
        let validator = validator(&world);
        let ledger = ledger(&world);

        ledger
            .grant(GrantRequest {
                story_id: TestWorld::public_story(),
                storyteller_id: TestWorld::teller(),
                method: ConsentMethod::Digital,
                purpose: "public_sharing".to_string(),
                scope: "public_sharing".to_string(),
                expires_in: None,
                restrictions: vec![],
                witness_id: None,
            })
            .await
            .unwrap();
        let raw = make_share_link(&world, None).await;

        // Valid while consent stands.
        validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap();

        ledger
            .withdraw(WithdrawRequest {
                story_id: TestWorld::public_story(),
                caller_id: TestWorld::teller(),
                scope: WithdrawalScope::Full,
                reason: None,
                restrictions: vec![],
                purpose: None,
            })
            .await
            .unwrap();

        // No enumeration, no deletion: the next validation denies.
        let err = validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::ConsentWithdrawn));
    }

    #[tokio::test]
    async fn test_api_access_shapes_excerpt() {
        let world = TestWorld::new();
        let validator = validator(&world);
        approved_syndication(&world).await;

        let view = validator
            .validate_api_access(
                TestWorld::api_key(),
                &TestWorld::public_story(),
                RequestMetadata {
                    origin: Some("gallery.example.org".to_string()),
                    user_agent: Some("gallery-bot/1.0".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(view.view_count, 1);
        assert!(view.story.media.is_empty());
        assert!(view.story.content.len() < 600);
        assert_eq!(
            view.story.sharing.allowed_uses,
            vec!["excerpt".to_string()]
        );
        assert_eq!(
            view.story.sharing.attribution.as_deref(),
            Some("Tellers of the River")
        );
    }

    #[tokio::test]
    async fn test_api_access_invalid_key_and_missing_consent() {
        let world = TestWorld::new();
        let validator = validator(&world);

        let err = validator
            .validate_api_access("wrong-key", &TestWorld::public_story(), RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidKey));

        let err = validator
            .validate_api_access(
                TestWorld::api_key(),
                &TestWorld::public_story(),
                RequestMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::ConsentNotGranted));
    }

    #[tokio::test]
    async fn test_withdrawn_anchor_denies_api_access() {
        let world = TestWorld::new();
        let validator = validator(&world);
        approved_syndication(&world).await;

        ledger(&world)
            .withdraw(WithdrawRequest {
                story_id: TestWorld::public_story(),
                caller_id: TestWorld::teller(),
                scope: WithdrawalScope::Full,
                reason: None,
                restrictions: vec![],
                purpose: Some(SYNDICATION_PURPOSE.to_string()),
            })
            .await
            .unwrap();

        let err = validator
            .validate_api_access(
                TestWorld::api_key(),
                &TestWorld::public_story(),
                RequestMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::ConsentWithdrawn));
    }

    #[tokio::test]
    async fn test_rate_limited_requests_leave_no_audit_entry() {
        let world = TestWorld::new();
        let validator = AccessValidator::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.sites.clone(),
            world.content.clone(),
            SlidingWindow {
                max_requests: 1,
                window_ms: 60_000,
            },
        );
        approved_syndication(&world).await;

        validator
            .validate_api_access(
                TestWorld::api_key(),
                &TestWorld::public_story(),
                RequestMetadata::default(),
            )
            .await
            .unwrap();

        let before = world
            .store
            .audit_for_site(&TestWorld::site())
            .await
            .unwrap()
            .len();

        let err = validator
            .validate_api_access(
                TestWorld::api_key(),
                &TestWorld::public_story(),
                RequestMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::RateLimited));

        let after = world
            .store
            .audit_for_site(&TestWorld::site())
            .await
            .unwrap()
            .len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_embed_token_domain_scoping_and_cascade() {
        let world = TestWorld::new();
        let validator = validator(&world);
        approved_syndication(&world).await;

        let consent = world
            .store
            .get_syndication_for(&TestWorld::public_story(), &TestWorld::site())
            .await
            .unwrap()
            .unwrap();
        let embed = issuer(&world).issue_embed_token(&consent.id).await.unwrap();

        // Allowed origin passes.
        validator
            .validate_embed_token(
                &embed.token,
                Some("gallery.example.org"),
                RequestMetadata::default(),
            )
            .await
            .unwrap();

        // Foreign origin is refused.
        let err = validator
            .validate_embed_token(
                &embed.token,
                Some("evil.example.com"),
                RequestMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::DomainNotAllowed));

        // Revoking the parent syndication kills the embed token without
        // touching the token row.
        syndication(&world)
            .revoke(&consent.id, &TestWorld::teller(), None)
            .await
            .unwrap();
        let err = validator
            .validate_embed_token(
                &embed.token,
                Some("gallery.example.org"),
                RequestMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::ConsentNotGranted));
    }

    #[tokio::test]
    async fn test_revoked_embed_token_is_refused_and_audited() {
        let world = TestWorld::new();
        let validator = validator(&world);
        approved_syndication(&world).await;

        let consent = world
            .store
            .get_syndication_for(&TestWorld::public_story(), &TestWorld::site())
            .await
            .unwrap()
            .unwrap();
        let issuer = issuer(&world);
        let embed = issuer.issue_embed_token(&consent.id).await.unwrap();

        validator
            .validate_embed_token(
                &embed.token,
                Some("gallery.example.org"),
                RequestMetadata::default(),
            )
            .await
            .unwrap();

        issuer
            .revoke_embed_token(&embed.id, &TestWorld::teller())
            .await
            .unwrap();

        // The parent syndication is still approved; the token itself is dead.
        let err = validator
            .validate_embed_token(
                &embed.token,
                Some("gallery.example.org"),
                RequestMetadata::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Revoked));

        let trail = world
            .store
            .audit_for_entity(AuditEntityKind::EmbedToken, embed.id.as_str())
            .await
            .unwrap();
        let last = trail.last().unwrap();
        assert_eq!(last.entry.reason.as_deref(), Some("revoked"));
    }

    #[tokio::test]
    async fn test_every_share_attempt_is_audited() {
        let world = TestWorld::new();
        let validator = validator(&world);
        let raw = make_share_link(&world, Some(1)).await;

        validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap();
        validator
            .validate_share_token(&raw, RequestMetadata::default())
            .await
            .unwrap_err();

        let token = world
            .store
            .get_share_token(&TokenHash::of(&raw))
            .await
            .unwrap()
            .unwrap();
        let entries = world
            .store
            .audit_for_entity(AuditEntityKind::ShareToken, token.id.as_str())
            .await
            .unwrap();
        // Issuance, one granted access, one denied access.
        assert_eq!(entries.len(), 3);
        let denied = entries.last().unwrap();
        assert_eq!(denied.entry.reason.as_deref(), Some("view_limit_reached"));
    }
}

//! Syndication consent lifecycle: cross-site grants per (story, site).
//!
//! Unlike share links, syndication is third-party distribution and is
//! always anchored to an active ledger consent record. The anchor id is
//! stored on the grant so the access validator can re-check the ledger's
//! live state on every external read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storykeep_core::{
    now_millis, AuditAction, AuditActor, AuditEntityKind, AuditEntry, ConsentState,
    RoleDirectory, SharePermissions, SiteId, SiteRegistry, StoryDirectory, StoryId, StoryRef,
    SyndicationConsent, SyndicationId, SyndicationState, UserId,
};
use storykeep_consent::policy;
use storykeep_store::{AuditSink, Store, StoreError, UpdateOutcome};

use crate::error::{Result, TokenError};

/// The ledger purpose a syndication grant is anchored under.
pub const SYNDICATION_PURPOSE: &str = "syndication";

/// Parameters for requesting a syndication grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyndicationRequest {
    pub story_id: StoryId,
    pub site_id: SiteId,
    pub requested_by: UserId,
    pub permissions: SharePermissions,
    /// Relative lifetime in milliseconds; None means no expiry.
    pub expires_in: Option<i64>,
}

/// Manages syndication consents for external sites.
pub struct SyndicationService<S: Store> {
    store: Arc<S>,
    stories: Arc<dyn StoryDirectory>,
    sites: Arc<dyn SiteRegistry>,
    roles: Arc<dyn RoleDirectory>,
    audit: AuditSink<S>,
}

impl<S: Store> SyndicationService<S> {
    pub fn new(
        store: Arc<S>,
        stories: Arc<dyn StoryDirectory>,
        sites: Arc<dyn SiteRegistry>,
        roles: Arc<dyn RoleDirectory>,
    ) -> Self {
        let audit = AuditSink::new(Arc::clone(&store));
        Self {
            store,
            stories,
            sites,
            roles,
            audit,
        }
    }

    async fn owned_story(&self, story_id: &StoryId, caller: &UserId) -> Result<StoryRef> {
        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| TokenError::StoryNotFound(story_id.to_string()))?;
        if !story.is_owned_by(caller) {
            return Err(TokenError::Forbidden);
        }
        Ok(story)
    }

    /// Request syndication of a story to an external site.
    ///
    /// The site must share the story's organization boundary or be
    /// explicitly whitelisted, and the story must carry an active ledger
    /// consent for the syndication purpose. Lands approved, or pending
    /// when the story's cultural classification requires elder review.
    pub async fn request(&self, request: SyndicationRequest) -> Result<SyndicationConsent> {
        let story = self.owned_story(&request.story_id, &request.requested_by).await?;
        if story.is_withdrawn() {
            return Err(TokenError::WithdrawnStoryConsent);
        }

        let site = self
            .sites
            .get_site(&request.site_id)
            .await?
            .ok_or_else(|| TokenError::SiteNotFound(request.site_id.to_string()))?;

        let same_boundary = match (&site.organization_id, &story.organization_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !site.whitelisted && !same_boundary {
            return Err(TokenError::OrganizationBoundary);
        }

        let now = now_millis();
        let anchor = self
            .store
            .get_active_consent(&request.story_id, SYNDICATION_PURPOSE)
            .await?
            .filter(|c| c.state != ConsentState::PendingApproval && c.is_active(now))
            .ok_or(TokenError::NoActiveConsent)?;

        let needs_review = policy::requires_elder_approval(&story);
        let consent = SyndicationConsent {
            id: SyndicationId::fresh(),
            story_id: request.story_id,
            site_id: request.site_id,
            storyteller_id: story.storyteller_id,
            tenant_id: story.tenant_id,
            organization_id: story.organization_id,
            consent_id: anchor.id,
            state: if needs_review {
                SyndicationState::PendingApproval
            } else {
                SyndicationState::Approved
            },
            expires_at: request.expires_in.map(|d| now + d),
            permissions: request.permissions,
            cultural_level: story.cultural_level,
            requires_elder_approval: needs_review,
            requested_by: request.requested_by,
            requested_at: now,
            approved_by: None,
            approved_at: if needs_review { None } else { Some(now) },
            revoked_at: None,
            revocation_reason: None,
            view_count: 0,
            version: 1,
        };

        self.store.insert_syndication(&consent).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => TokenError::DuplicateActiveConsent,
            other => TokenError::Store(other),
        })?;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(consent.requested_by.clone()),
                    AuditEntityKind::SyndicationConsent,
                    consent.id.as_str(),
                    AuditAction::ConsentGranted,
                    now,
                )
                .with_story(consent.story_id.clone())
                .with_site(consent.site_id.clone())
                .with_states(None, snapshot(&consent)),
            )
            .await;

        Ok(consent)
    }

    /// Approve or deny a pending syndication grant. Reviewer-gated.
    pub async fn review(
        &self,
        id: &SyndicationId,
        reviewer_id: &UserId,
        approved: bool,
        reason: Option<String>,
    ) -> Result<SyndicationConsent> {
        if !self.roles.caller_roles(reviewer_id).await?.can_review() {
            return Err(TokenError::Forbidden);
        }

        let consent = self
            .store
            .get_syndication(id)
            .await?
            .ok_or_else(|| TokenError::NotFound(id.to_string()))?;

        if consent.state != SyndicationState::PendingApproval {
            return Err(TokenError::InvalidState(format!(
                "syndication consent is {}, not pending_approval",
                consent.state.as_str()
            )));
        }

        let now = now_millis();
        let before = snapshot(&consent);

        let mut next = consent.clone();
        if approved {
            next.state = SyndicationState::Approved;
            next.approved_by = Some(reviewer_id.clone());
            next.approved_at = Some(now);
        } else {
            next.state = SyndicationState::Denied;
            next.revocation_reason = reason;
        }

        match self.store.update_syndication(&next, consent.version).await? {
            UpdateOutcome::Updated => {}
            UpdateOutcome::Stale => return Err(TokenError::Stale),
        }
        next.version = consent.version + 1;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(reviewer_id.clone()),
                    AuditEntityKind::SyndicationConsent,
                    next.id.as_str(),
                    if approved {
                        AuditAction::ConsentVerified
                    } else {
                        AuditAction::ConsentRejected
                    },
                    now,
                )
                .with_story(next.story_id.clone())
                .with_site(next.site_id.clone())
                .with_states(before, snapshot(&next)),
            )
            .await;

        Ok(next)
    }

    /// Revoke a syndication grant. Idempotent for the storyteller.
    pub async fn revoke(
        &self,
        id: &SyndicationId,
        caller_id: &UserId,
        reason: Option<String>,
    ) -> Result<SyndicationConsent> {
        let consent = self
            .store
            .get_syndication(id)
            .await?
            .ok_or_else(|| TokenError::NotFound(id.to_string()))?;

        self.owned_story(&consent.story_id, caller_id).await?;

        if consent.state == SyndicationState::Revoked {
            return Ok(consent);
        }

        let now = now_millis();
        let before = snapshot(&consent);

        let mut next = consent.clone();
        next.state = SyndicationState::Revoked;
        next.revoked_at = Some(now);
        next.revocation_reason = reason;

        match self.store.update_syndication(&next, consent.version).await? {
            UpdateOutcome::Updated => {}
            UpdateOutcome::Stale => return Err(TokenError::Stale),
        }
        next.version = consent.version + 1;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(caller_id.clone()),
                    AuditEntityKind::SyndicationConsent,
                    next.id.as_str(),
                    AuditAction::ConsentWithdrawn,
                    now,
                )
                .with_story(next.story_id.clone())
                .with_site(next.site_id.clone())
                .with_states(before, snapshot(&next)),
            )
            .await;

        Ok(next)
    }

    /// Revoke every live syndication grant on a story. Used when the
    /// storyteller withdraws consent or the story itself.
    pub async fn revoke_all_for_story(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
        reason: Option<String>,
    ) -> Result<Vec<SyndicationConsent>> {
        self.owned_story(story_id, caller_id).await?;

        let live: Vec<SyndicationConsent> = self
            .store
            .list_syndications_for_story(story_id)
            .await?
            .into_iter()
            .filter(|c| c.state.blocks_duplicate())
            .collect();

        let mut revoked = Vec::with_capacity(live.len());
        for consent in live {
            revoked.push(self.revoke(&consent.id, caller_id, reason.clone()).await?);
        }
        Ok(revoked)
    }

    /// Adjust permissions or expiry on a live grant. Owner-gated.
    pub async fn update(
        &self,
        id: &SyndicationId,
        caller_id: &UserId,
        permissions: Option<SharePermissions>,
        expires_in: Option<i64>,
    ) -> Result<SyndicationConsent> {
        let consent = self
            .store
            .get_syndication(id)
            .await?
            .ok_or_else(|| TokenError::NotFound(id.to_string()))?;

        self.owned_story(&consent.story_id, caller_id).await?;

        if !consent.state.blocks_duplicate() {
            return Err(TokenError::InvalidState(format!(
                "syndication consent is {}",
                consent.state.as_str()
            )));
        }

        let now = now_millis();
        let before = snapshot(&consent);

        let mut next = consent.clone();
        if let Some(p) = permissions {
            next.permissions = p;
        }
        if let Some(d) = expires_in {
            next.expires_at = Some(now + d);
        }

        match self.store.update_syndication(&next, consent.version).await? {
            UpdateOutcome::Updated => {}
            UpdateOutcome::Stale => return Err(TokenError::Stale),
        }
        next.version = consent.version + 1;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(caller_id.clone()),
                    AuditEntityKind::SyndicationConsent,
                    next.id.as_str(),
                    AuditAction::ConsentUpdated,
                    now,
                )
                .with_story(next.story_id.clone())
                .with_site(next.site_id.clone())
                .with_states(before, snapshot(&next)),
            )
            .await;

        Ok(next)
    }

    /// Latest grant for a (story, site) pair, regardless of state.
    pub async fn get_for(
        &self,
        story_id: &StoryId,
        site_id: &SiteId,
    ) -> Result<Option<SyndicationConsent>> {
        Ok(self.store.get_syndication_for(story_id, site_id).await?)
    }

    /// All grants on a story, owner-gated.
    pub async fn list_for_story(
        &self,
        story_id: &StoryId,
        caller_id: &UserId,
    ) -> Result<Vec<SyndicationConsent>> {
        self.owned_story(story_id, caller_id).await?;
        Ok(self.store.list_syndications_for_story(story_id).await?)
    }

    /// All grants held by a site, for compliance export.
    pub async fn list_for_site(&self, site_id: &SiteId) -> Result<Vec<SyndicationConsent>> {
        Ok(self.store.list_syndications_for_site(site_id).await?)
    }
}

fn snapshot(consent: &SyndicationConsent) -> Option<serde_json::Value> {
    serde_json::to_value(consent).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storykeep_consent::{ConsentLedger, GrantRequest};
    use storykeep_core::ConsentMethod;
    use storykeep_store::MemoryStore;
    use storykeep_testkit::TestWorld;

    fn service(world: &TestWorld) -> SyndicationService<MemoryStore> {
        SyndicationService::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.sites.clone(),
            world.roles.clone(),
        )
    }

    async fn grant_anchor(world: &TestWorld, story: StoryId) {
        let ledger = ConsentLedger::new(
            Arc::clone(&world.store),
            world.stories.clone(),
            world.roles.clone(),
        );
        ledger
            .grant(GrantRequest {
                story_id: story.clone(),
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
        // Sacred stories land pending; have the elder approve the anchor.
        if story == TestWorld::sacred_story() {
            ledger
                .verify(&story, &TestWorld::elder(), true, None, None)
                .await
                .unwrap();
        }
    }

    fn request(story: StoryId) -> SyndicationRequest {
        SyndicationRequest {
            story_id: story,
            site_id: TestWorld::site(),
            requested_by: TestWorld::teller(),
            permissions: SharePermissions::excerpt(),
            expires_in: None,
        }
    }

    #[tokio::test]
    async fn test_public_story_auto_approves() {
        let world = TestWorld::new();
        let service = service(&world);
        grant_anchor(&world, TestWorld::public_story()).await;

        let consent = service.request(request(TestWorld::public_story())).await.unwrap();
        assert_eq!(consent.state, SyndicationState::Approved);
        assert!(consent.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_sacred_story_needs_elder_review() {
        let world = TestWorld::new();
        let service = service(&world);
        grant_anchor(&world, TestWorld::sacred_story()).await;

        let consent = service.request(request(TestWorld::sacred_story())).await.unwrap();
        assert_eq!(consent.state, SyndicationState::PendingApproval);

        let err = service
            .review(&consent.id, &TestWorld::teller(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Forbidden));

        let approved = service
            .review(&consent.id, &TestWorld::elder(), true, None)
            .await
            .unwrap();
        assert_eq!(approved.state, SyndicationState::Approved);
        assert_eq!(approved.approved_by, Some(TestWorld::elder()));

        // Reviewing again is InvalidState.
        let err = service
            .review(&consent.id, &TestWorld::elder(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_request_requires_anchor_consent() {
        let world = TestWorld::new();
        let service = service(&world);

        let err = service.request(request(TestWorld::public_story())).await.unwrap_err();
        assert!(matches!(err, TokenError::NoActiveConsent));
    }

    #[tokio::test]
    async fn test_request_enforces_org_boundary() {
        use storykeep_core::SiteRecord;

        let world = TestWorld::new();
        let service = service(&world);
        grant_anchor(&world, TestWorld::public_story()).await;

        world.sites.put(SiteRecord {
            id: SiteId::new("site-foreign"),
            name: "Foreign Site".to_string(),
            allowed_domains: vec![],
            organization_id: Some(storykeep_core::OrgId::new("org-other")),
            whitelisted: false,
        });

        let mut req = request(TestWorld::public_story());
        req.site_id = SiteId::new("site-foreign");
        let err = service.request(req).await.unwrap_err();
        assert!(matches!(err, TokenError::OrganizationBoundary));

        // Whitelisting lifts the boundary.
        world.sites.put(SiteRecord {
            id: SiteId::new("site-foreign"),
            name: "Foreign Site".to_string(),
            allowed_domains: vec![],
            organization_id: Some(storykeep_core::OrgId::new("org-other")),
            whitelisted: true,
        });
        let mut req = request(TestWorld::public_story());
        req.site_id = SiteId::new("site-foreign");
        service.request(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_active_grant_rejected() {
        let world = TestWorld::new();
        let service = service(&world);
        grant_anchor(&world, TestWorld::public_story()).await;

        service.request(request(TestWorld::public_story())).await.unwrap();
        let err = service.request(request(TestWorld::public_story())).await.unwrap_err();
        assert!(matches!(err, TokenError::DuplicateActiveConsent));
    }

    #[tokio::test]
    async fn test_revoke_and_revoke_all() {
        let world = TestWorld::new();
        let service = service(&world);
        grant_anchor(&world, TestWorld::public_story()).await;

        let consent = service.request(request(TestWorld::public_story())).await.unwrap();
        let revoked = service
            .revoke(&consent.id, &TestWorld::teller(), Some("ending pilot".to_string()))
            .await
            .unwrap();
        assert_eq!(revoked.state, SyndicationState::Revoked);

        // Idempotent.
        let again = service.revoke(&consent.id, &TestWorld::teller(), None).await.unwrap();
        assert_eq!(again.state, SyndicationState::Revoked);

        // A revoked grant no longer blocks a new request.
        let fresh = service.request(request(TestWorld::public_story())).await.unwrap();
        let all = service
            .revoke_all_for_story(&TestWorld::public_story(), &TestWorld::teller(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, fresh.id);
    }

    #[tokio::test]
    async fn test_update_permissions() {
        let world = TestWorld::new();
        let service = service(&world);
        grant_anchor(&world, TestWorld::public_story()).await;

        let consent = service.request(request(TestWorld::public_story())).await.unwrap();
        let updated = service
            .update(
                &consent.id,
                &TestWorld::teller(),
                Some(SharePermissions {
                    media: true,
                    ..SharePermissions::excerpt()
                }),
                None,
            )
            .await
            .unwrap();
        assert!(updated.permissions.media);
        assert_eq!(updated.version, 2);
    }
}

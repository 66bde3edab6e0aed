//! In-memory implementation of the Store trait.
//!
//! Primarily for tests. Same semantics as SQLite, including atomicity of
//! the consume/CAS operations: every mutating method holds the write lock
//! for the whole check-and-apply sequence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use storykeep_core::{
    AuditEntityKind, AuditEntry, ConsentId, ConsentRecord, EmbedToken, ShareToken, SiteId, StoryId,
    SyndicationConsent, SyndicationId, TokenHash, TokenId, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::{Store, StoredAuditEntry, UpdateOutcome, ViewConsume};

/// In-memory store. All data is lost on drop. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    consents: HashMap<ConsentId, ConsentRecord>,
    share_tokens: HashMap<TokenId, ShareToken>,
    share_by_hash: HashMap<TokenHash, TokenId>,
    syndications: HashMap<SyndicationId, SyndicationConsent>,
    embed_tokens: HashMap<TokenId, EmbedToken>,
    embed_by_hash: HashMap<TokenHash, TokenId>,
    audit: Vec<StoredAuditEntry>,
    api_requests: HashMap<TokenHash, Vec<i64>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_consent(&self, record: &ConsentRecord) -> Result<()> {
        let mut inner = self.write()?;

        let duplicate = inner.consents.values().any(|c| {
            c.story_id == record.story_id
                && c.purpose == record.purpose
                && c.state.blocks_duplicate()
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "active consent exists for story {} purpose {}",
                record.story_id, record.purpose
            )));
        }

        inner.consents.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_consent(&self, id: &ConsentId) -> Result<Option<ConsentRecord>> {
        Ok(self.read()?.consents.get(id).cloned())
    }

    async fn get_active_consent(
        &self,
        story: &StoryId,
        purpose: &str,
    ) -> Result<Option<ConsentRecord>> {
        Ok(self
            .read()?
            .consents
            .values()
            .find(|c| {
                &c.story_id == story && c.purpose == purpose && c.state.blocks_duplicate()
            })
            .cloned())
    }

    async fn list_consents(&self, story: &StoryId) -> Result<Vec<ConsentRecord>> {
        let mut records: Vec<ConsentRecord> = self
            .read()?
            .consents
            .values()
            .filter(|c| &c.story_id == story)
            .cloned()
            .collect();
        records.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(records)
    }

    async fn list_active_consents(&self, story: &StoryId) -> Result<Vec<ConsentRecord>> {
        let mut records: Vec<ConsentRecord> = self
            .read()?
            .consents
            .values()
            .filter(|c| &c.story_id == story && c.state.blocks_duplicate())
            .cloned()
            .collect();
        records.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(records)
    }

    async fn update_consent(
        &self,
        record: &ConsentRecord,
        expected_version: u64,
    ) -> Result<UpdateOutcome> {
        let mut inner = self.write()?;

        let Some(stored) = inner.consents.get_mut(&record.id) else {
            return Err(StoreError::NotFound(format!("consent {}", record.id)));
        };
        if stored.version != expected_version {
            return Ok(UpdateOutcome::Stale);
        }

        let mut updated = record.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(UpdateOutcome::Updated)
    }

    async fn latest_full_withdrawal(&self, story: &StoryId) -> Result<Option<i64>> {
        Ok(self
            .read()?
            .consents
            .values()
            .filter(|c| &c.story_id == story && c.is_withdrawn_full())
            .filter_map(|c| c.withdrawn_at)
            .max())
    }

    async fn insert_share_token(&self, token: &ShareToken) -> Result<()> {
        let mut inner = self.write()?;
        if inner.share_by_hash.contains_key(&token.token_hash) {
            return Err(StoreError::UniqueViolation("share token hash".to_string()));
        }
        inner.share_by_hash.insert(token.token_hash, token.id.clone());
        inner.share_tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn get_share_token(&self, hash: &TokenHash) -> Result<Option<ShareToken>> {
        let inner = self.read()?;
        Ok(inner
            .share_by_hash
            .get(hash)
            .and_then(|id| inner.share_tokens.get(id))
            .cloned())
    }

    async fn get_share_token_by_id(&self, id: &TokenId) -> Result<Option<ShareToken>> {
        Ok(self.read()?.share_tokens.get(id).cloned())
    }

    async fn list_share_tokens(
        &self,
        story: &StoryId,
        creator: &UserId,
    ) -> Result<Vec<ShareToken>> {
        let mut tokens: Vec<ShareToken> = self
            .read()?
            .share_tokens
            .values()
            .filter(|t| &t.story_id == story && &t.created_by == creator)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(tokens)
    }

    async fn set_share_token_revoked(&self, id: &TokenId) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(token) = inner.share_tokens.get_mut(id) {
            token.revoked = true;
        }
        Ok(())
    }

    async fn consume_share_view(&self, hash: &TokenHash, now: i64) -> Result<ViewConsume> {
        let mut inner = self.write()?;

        let Some(id) = inner.share_by_hash.get(hash).cloned() else {
            return Ok(ViewConsume::NotFound);
        };
        let Some(token) = inner.share_tokens.get_mut(&id) else {
            return Ok(ViewConsume::NotFound);
        };

        if token.revoked {
            return Ok(ViewConsume::Revoked);
        }
        if storykeep_core::is_expired(token.expires_at, now) {
            return Ok(ViewConsume::Expired);
        }
        if let Some(max) = token.max_views {
            if token.view_count >= max {
                return Ok(ViewConsume::LimitReached);
            }
        }

        token.view_count += 1;
        token.last_accessed_at = Some(now);
        Ok(ViewConsume::Consumed(token.clone()))
    }

    async fn insert_syndication(&self, consent: &SyndicationConsent) -> Result<()> {
        let mut inner = self.write()?;

        let duplicate = inner.syndications.values().any(|s| {
            s.story_id == consent.story_id
                && s.site_id == consent.site_id
                && s.state.blocks_duplicate()
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "active syndication consent exists for story {} site {}",
                consent.story_id, consent.site_id
            )));
        }

        inner.syndications.insert(consent.id.clone(), consent.clone());
        Ok(())
    }

    async fn get_syndication(&self, id: &SyndicationId) -> Result<Option<SyndicationConsent>> {
        Ok(self.read()?.syndications.get(id).cloned())
    }

    async fn get_syndication_for(
        &self,
        story: &StoryId,
        site: &SiteId,
    ) -> Result<Option<SyndicationConsent>> {
        Ok(self
            .read()?
            .syndications
            .values()
            .filter(|s| &s.story_id == story && &s.site_id == site)
            .max_by_key(|s| s.requested_at)
            .cloned())
    }

    async fn list_syndications_for_story(
        &self,
        story: &StoryId,
    ) -> Result<Vec<SyndicationConsent>> {
        let mut consents: Vec<SyndicationConsent> = self
            .read()?
            .syndications
            .values()
            .filter(|s| &s.story_id == story)
            .cloned()
            .collect();
        consents.sort_by_key(|s| std::cmp::Reverse(s.requested_at));
        Ok(consents)
    }

    async fn list_syndications_for_site(&self, site: &SiteId) -> Result<Vec<SyndicationConsent>> {
        let mut consents: Vec<SyndicationConsent> = self
            .read()?
            .syndications
            .values()
            .filter(|s| &s.site_id == site)
            .cloned()
            .collect();
        consents.sort_by_key(|s| std::cmp::Reverse(s.requested_at));
        Ok(consents)
    }

    async fn update_syndication(
        &self,
        consent: &SyndicationConsent,
        expected_version: u64,
    ) -> Result<UpdateOutcome> {
        let mut inner = self.write()?;

        let Some(stored) = inner.syndications.get_mut(&consent.id) else {
            return Err(StoreError::NotFound(format!("syndication {}", consent.id)));
        };
        if stored.version != expected_version {
            return Ok(UpdateOutcome::Stale);
        }

        let mut updated = consent.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(UpdateOutcome::Updated)
    }

    async fn increment_syndication_views(&self, id: &SyndicationId) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(consent) = inner.syndications.get_mut(id) {
            consent.view_count += 1;
        }
        Ok(())
    }

    async fn insert_embed_token(&self, token: &EmbedToken) -> Result<()> {
        let mut inner = self.write()?;
        if inner.embed_by_hash.contains_key(&token.token_hash) {
            return Err(StoreError::UniqueViolation("embed token hash".to_string()));
        }
        inner.embed_by_hash.insert(token.token_hash, token.id.clone());
        inner.embed_tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn get_embed_token(&self, hash: &TokenHash) -> Result<Option<EmbedToken>> {
        let inner = self.read()?;
        Ok(inner
            .embed_by_hash
            .get(hash)
            .and_then(|id| inner.embed_tokens.get(id))
            .cloned())
    }

    async fn get_embed_token_by_id(&self, id: &TokenId) -> Result<Option<EmbedToken>> {
        Ok(self.read()?.embed_tokens.get(id).cloned())
    }

    async fn list_embed_tokens(&self, story: &StoryId) -> Result<Vec<EmbedToken>> {
        let inner = self.read()?;
        let mut tokens: Vec<EmbedToken> = inner
            .embed_tokens
            .values()
            .filter(|t| &t.story_id == story)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn set_embed_token_revoked(&self, id: &TokenId) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(token) = inner.embed_tokens.get_mut(id) {
            token.revoked = true;
        }
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<u64> {
        let mut inner = self.write()?;
        let seq = inner.audit.len() as u64 + 1;
        inner.audit.push(StoredAuditEntry {
            seq,
            entry: entry.clone(),
        });
        Ok(seq)
    }

    async fn audit_for_entity(
        &self,
        kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<Vec<StoredAuditEntry>> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|e| e.entry.entity_kind == kind && e.entry.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn audit_for_site(&self, site: &SiteId) -> Result<Vec<StoredAuditEntry>> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|e| e.entry.site_id.as_ref() == Some(site))
            .cloned()
            .collect())
    }

    async fn try_record_api_request(
        &self,
        key: &TokenHash,
        at: i64,
        since: i64,
        max: u32,
    ) -> Result<bool> {
        // Write lock held across check and record.
        let mut inner = self.write()?;
        let times = inner.api_requests.entry(*key).or_default();
        times.retain(|&t| t >= since);
        if times.len() as u32 >= max {
            return Ok(false);
        }
        times.push(at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storykeep_core::{
        generate_token, ConsentMethod, ConsentState, StoryId, TenantId, UserId,
    };

    fn make_consent(story: &str, purpose: &str, state: ConsentState) -> ConsentRecord {
        ConsentRecord {
            id: ConsentId::fresh(),
            story_id: StoryId::new(story),
            storyteller_id: UserId::new("teller-1"),
            tenant_id: TenantId::new("tenant-1"),
            method: ConsentMethod::Digital,
            purpose: purpose.to_string(),
            scope: "public_sharing".to_string(),
            expires_at: None,
            restrictions: vec![],
            witness_id: None,
            state,
            requires_elder_approval: false,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            withdrawn_at: None,
            withdrawal_reason: None,
            created_at: 1000,
            updated_at: 1000,
            version: 1,
        }
    }

    fn make_token(story: &str, max_views: Option<u32>, expires_at: i64) -> ShareToken {
        let raw = generate_token();
        ShareToken {
            id: TokenId::fresh(),
            story_id: StoryId::new(story),
            tenant_id: TenantId::new("tenant-1"),
            token_hash: TokenHash::of(&raw),
            token: raw,
            purpose: "direct_share".to_string(),
            shared_to: vec![],
            watermark: None,
            expires_at,
            max_views,
            view_count: 0,
            revoked: false,
            created_by: UserId::new("teller-1"),
            created_at: 0,
            last_accessed_at: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_active_consent_rejected() {
        let store = MemoryStore::new();
        store
            .insert_consent(&make_consent("s1", "public_sharing", ConsentState::Granted))
            .await
            .unwrap();

        let err = store
            .insert_consent(&make_consent("s1", "public_sharing", ConsentState::Granted))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        // A different purpose is fine.
        store
            .insert_consent(&make_consent("s1", "research", ConsentState::Granted))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_withdrawn_record_does_not_block_regrant() {
        let store = MemoryStore::new();
        store
            .insert_consent(&make_consent(
                "s1",
                "public_sharing",
                ConsentState::WithdrawnFull,
            ))
            .await
            .unwrap();

        store
            .insert_consent(&make_consent("s1", "public_sharing", ConsentState::Granted))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consent_cas_detects_stale_writer() {
        let store = MemoryStore::new();
        let record = make_consent("s1", "public_sharing", ConsentState::Granted);
        store.insert_consent(&record).await.unwrap();

        let mut update = record.clone();
        update.state = ConsentState::WithdrawnFull;
        assert_eq!(
            store.update_consent(&update, 1).await.unwrap(),
            UpdateOutcome::Updated
        );

        // Second writer still holds version 1.
        assert_eq!(
            store.update_consent(&update, 1).await.unwrap(),
            UpdateOutcome::Stale
        );
    }

    #[tokio::test]
    async fn test_consume_view_enforces_cap() {
        let store = MemoryStore::new();
        let token = make_token("s1", Some(2), i64::MAX);
        store.insert_share_token(&token).await.unwrap();

        assert!(matches!(
            store.consume_share_view(&token.token_hash, 10).await.unwrap(),
            ViewConsume::Consumed(_)
        ));
        assert!(matches!(
            store.consume_share_view(&token.token_hash, 11).await.unwrap(),
            ViewConsume::Consumed(_)
        ));
        assert_eq!(
            store.consume_share_view(&token.token_hash, 12).await.unwrap(),
            ViewConsume::LimitReached
        );
    }

    #[tokio::test]
    async fn test_consume_view_expiry_boundary() {
        let store = MemoryStore::new();
        let token = make_token("s1", None, 1000);
        store.insert_share_token(&token).await.unwrap();

        assert_eq!(
            store.consume_share_view(&token.token_hash, 1000).await.unwrap(),
            ViewConsume::Expired
        );
    }

    #[tokio::test]
    async fn test_audit_append_assigns_sequence() {
        use storykeep_core::{AuditAction, AuditActor, AuditEntityKind, AuditEntry};

        let store = MemoryStore::new();
        let entry = AuditEntry::granted(
            AuditActor::Bearer,
            AuditEntityKind::ShareToken,
            "tok-1",
            AuditAction::ShareAccess,
            5,
        );
        assert_eq!(store.append_audit(&entry).await.unwrap(), 1);
        assert_eq!(store.append_audit(&entry).await.unwrap(), 2);

        let entries = store
            .audit_for_entity(AuditEntityKind::ShareToken, "tok-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_api_request_window_is_atomic_at_the_limit() {
        let store = MemoryStore::new();
        let key = TokenHash::of("api-key");

        assert!(store.try_record_api_request(&key, 100, 0, 3).await.unwrap());
        assert!(store.try_record_api_request(&key, 200, 0, 3).await.unwrap());
        assert!(store.try_record_api_request(&key, 300, 0, 3).await.unwrap());

        // At the cap nothing is recorded.
        assert!(!store.try_record_api_request(&key, 350, 0, 3).await.unwrap());

        // Sliding the window past the oldest entry frees a slot, and
        // pruning means the denied attempt above left no trace.
        assert!(store.try_record_api_request(&key, 400, 150, 3).await.unwrap());
        assert!(!store.try_record_api_request(&key, 450, 150, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_api_requests_respect_window_cap() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let key = TokenHash::of("api-key");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.try_record_api_request(&key, 500, 0, 3).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }
}

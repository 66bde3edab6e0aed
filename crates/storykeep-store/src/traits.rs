//! Store trait: the abstract interface for consent and token persistence.
//!
//! This trait keeps the ledger, issuer, and validator storage-agnostic.
//! Implementations include SQLite (primary) and in-memory (for tests).
//!
//! # Design Notes
//!
//! - **Atomic view consumption**: [`Store::consume_share_view`] performs the
//!   increment-and-cap-check as a single conditional update, so concurrent
//!   validations racing for the last remaining view cannot both succeed.
//! - **Optimistic concurrency**: consent mutations carry the version the
//!   caller read; a mismatch returns [`UpdateOutcome::Stale`] instead of
//!   silently interleaving state transitions.
//! - **Append-only audit**: the trait exposes no update or delete for
//!   audit entries.

use async_trait::async_trait;
use storykeep_core::{
    AuditEntityKind, AuditEntry, ConsentId, ConsentRecord, EmbedToken, ShareToken, SiteId, StoryId,
    SyndicationConsent, SyndicationId, TokenHash, TokenId, UserId,
};

use crate::error::Result;

/// Result of a compare-and-swap style update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row matched the expected version and was updated.
    Updated,
    /// Another writer got there first; re-read and retry with fresh state.
    Stale,
}

/// Result of attempting to consume one view from a share token.
///
/// Failure variants carry enough to map directly onto the access error
/// taxonomy without a second read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewConsume {
    /// The view was counted; the returned token reflects the new count.
    Consumed(ShareToken),
    NotFound,
    Expired,
    Revoked,
    LimitReached,
}

/// An audit entry with its store-assigned sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAuditEntry {
    pub seq: u64,
    pub entry: AuditEntry,
}

/// The Store trait: async interface for consent/token persistence.
///
/// All methods are async; the SQLite backend hops through
/// `tokio::task::spawn_blocking` internally so it never blocks the runtime.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────
    // Consent records
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a new consent record.
    ///
    /// Fails with `UniqueViolation` if an active (non-terminal) record
    /// already exists for the same (story, purpose) pair. The check and
    /// insert are atomic.
    async fn insert_consent(&self, record: &ConsentRecord) -> Result<()>;

    async fn get_consent(&self, id: &ConsentId) -> Result<Option<ConsentRecord>>;

    /// The single active record for (story, purpose), if any. O(1) against
    /// the partial unique index; no scans.
    async fn get_active_consent(
        &self,
        story: &StoryId,
        purpose: &str,
    ) -> Result<Option<ConsentRecord>>;

    /// Full history for a story, newest first.
    async fn list_consents(&self, story: &StoryId) -> Result<Vec<ConsentRecord>>;

    /// All currently non-terminal records for a story.
    async fn list_active_consents(&self, story: &StoryId) -> Result<Vec<ConsentRecord>>;

    /// Conditional update: applies `record` only if the stored version
    /// equals `expected_version`. The stored version is bumped on success.
    async fn update_consent(
        &self,
        record: &ConsentRecord,
        expected_version: u64,
    ) -> Result<UpdateOutcome>;

    /// Timestamp of the story's most recent full withdrawal, if any. The
    /// validators deny every share token minted before that instant; tokens
    /// minted after a later re-grant stay valid.
    async fn latest_full_withdrawal(&self, story: &StoryId) -> Result<Option<i64>>;

    // ─────────────────────────────────────────────────────────────────────
    // Share tokens
    // ─────────────────────────────────────────────────────────────────────

    async fn insert_share_token(&self, token: &ShareToken) -> Result<()>;

    /// Lookup by token hash; the only request-time lookup path.
    async fn get_share_token(&self, hash: &TokenHash) -> Result<Option<ShareToken>>;

    async fn get_share_token_by_id(&self, id: &TokenId) -> Result<Option<ShareToken>>;

    /// Tokens a given creator holds for a story, newest first.
    async fn list_share_tokens(
        &self,
        story: &StoryId,
        creator: &UserId,
    ) -> Result<Vec<ShareToken>>;

    /// Idempotent logical delete.
    async fn set_share_token_revoked(&self, id: &TokenId) -> Result<()>;

    /// Atomically increment the view count if and only if the token is
    /// unrevoked, unexpired at `now`, and under its view cap.
    async fn consume_share_view(&self, hash: &TokenHash, now: i64) -> Result<ViewConsume>;

    // ─────────────────────────────────────────────────────────────────────
    // Syndication consents
    // ─────────────────────────────────────────────────────────────────────

    /// Fails with `UniqueViolation` if a pending or approved consent
    /// already exists for the same (story, site) pair.
    async fn insert_syndication(&self, consent: &SyndicationConsent) -> Result<()>;

    async fn get_syndication(&self, id: &SyndicationId) -> Result<Option<SyndicationConsent>>;

    /// Latest consent for (story, site) regardless of state.
    async fn get_syndication_for(
        &self,
        story: &StoryId,
        site: &SiteId,
    ) -> Result<Option<SyndicationConsent>>;

    async fn list_syndications_for_story(
        &self,
        story: &StoryId,
    ) -> Result<Vec<SyndicationConsent>>;

    async fn list_syndications_for_site(&self, site: &SiteId) -> Result<Vec<SyndicationConsent>>;

    /// Conditional update, same contract as [`Store::update_consent`].
    async fn update_syndication(
        &self,
        consent: &SyndicationConsent,
        expected_version: u64,
    ) -> Result<UpdateOutcome>;

    /// Unconditional view counter bump on a validated API read.
    async fn increment_syndication_views(&self, id: &SyndicationId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Embed tokens
    // ─────────────────────────────────────────────────────────────────────

    async fn insert_embed_token(&self, token: &EmbedToken) -> Result<()>;

    async fn get_embed_token(&self, hash: &TokenHash) -> Result<Option<EmbedToken>>;

    async fn get_embed_token_by_id(&self, id: &TokenId) -> Result<Option<EmbedToken>>;

    /// All embed tokens minted for the story, newest first.
    async fn list_embed_tokens(&self, story: &StoryId) -> Result<Vec<EmbedToken>>;

    async fn set_embed_token_revoked(&self, id: &TokenId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Audit log (append-only)
    // ─────────────────────────────────────────────────────────────────────

    /// Append an entry; returns the assigned sequence number.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<u64>;

    async fn audit_for_entity(
        &self,
        kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<Vec<StoredAuditEntry>>;

    /// Compliance export path: every entry tagged with the site.
    async fn audit_for_site(&self, site: &SiteId) -> Result<Vec<StoredAuditEntry>>;

    // ─────────────────────────────────────────────────────────────────────
    // API request accounting (sliding-window rate limiting)
    // ─────────────────────────────────────────────────────────────────────

    /// Count the key's requests at or after `since` and, if under `max`,
    /// record one at `at` and return true. Count and record are a single
    /// atomic step, so concurrent requests at the window edge cannot
    /// jointly exceed the limit. Rows older than `since` are pruned on
    /// the way, keeping the accounting table bounded.
    async fn try_record_api_request(
        &self,
        key: &TokenHash,
        at: i64,
        since: i64,
        max: u32,
    ) -> Result<bool>;
}

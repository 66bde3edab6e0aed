//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. Duplicate-active
//! constraints are enforced by partial unique indexes, and view-count
//! consumption runs as a single conditional UPDATE so concurrent
//! validations cannot exceed a token's cap.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use storykeep_core::{
    AuditActor, AuditEntityKind, AuditEntry, ConsentId, ConsentMethod, ConsentRecord,
    ConsentState, CulturalLevel, EmbedToken, OrgId, RequestMetadata, SharePermissions, ShareToken,
    SiteId, StoryId, SyndicationConsent, SyndicationId, SyndicationState, TenantId, TokenHash,
    TokenId, UserId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Store, StoredAuditEntry, UpdateOutcome, ViewConsume};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn bad_column(name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, name.into(), rusqlite::types::Type::Text)
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    name: &str,
) -> rusqlite::Result<T> {
    let raw: String = row.get(name)?;
    serde_json::from_str(&raw).map_err(|_| bad_column(name))
}

fn opt_json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    name: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(name)?;
    match raw {
        Some(s) => serde_json::from_str(&s).map(Some).map_err(|_| bad_column(name)),
        None => Ok(None),
    }
}

fn hash_column(row: &rusqlite::Row<'_>, name: &str) -> rusqlite::Result<TokenHash> {
    let bytes: Vec<u8> = row.get(name)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| bad_column(name))?;
    Ok(TokenHash::from_bytes(arr))
}

/// Map a constraint violation to UniqueViolation, pass everything else through.
fn map_unique(err: rusqlite::Error, what: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::UniqueViolation(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn row_to_consent(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConsentRecord> {
    let method: String = row.get("method")?;
    let state: String = row.get("state")?;

    Ok(ConsentRecord {
        id: ConsentId::new(row.get::<_, String>("id")?),
        story_id: StoryId::new(row.get::<_, String>("story_id")?),
        storyteller_id: UserId::new(row.get::<_, String>("storyteller_id")?),
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        method: ConsentMethod::parse(&method).ok_or_else(|| bad_column("method"))?,
        purpose: row.get("purpose")?,
        scope: row.get("scope")?,
        expires_at: row.get("expires_at")?,
        restrictions: json_column(row, "restrictions")?,
        witness_id: row.get::<_, Option<String>>("witness_id")?.map(UserId::new),
        state: ConsentState::parse(&state).ok_or_else(|| bad_column("state"))?,
        requires_elder_approval: row.get::<_, i64>("requires_elder_approval")? != 0,
        verified_by: row.get::<_, Option<String>>("verified_by")?.map(UserId::new),
        verified_at: row.get("verified_at")?,
        verification_notes: row.get("verification_notes")?,
        withdrawn_at: row.get("withdrawn_at")?,
        withdrawal_reason: row.get("withdrawal_reason")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get::<_, i64>("version")? as u64,
    })
}

fn row_to_share_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShareToken> {
    Ok(ShareToken {
        id: TokenId::new(row.get::<_, String>("id")?),
        story_id: StoryId::new(row.get::<_, String>("story_id")?),
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        token: row.get("token")?,
        token_hash: hash_column(row, "token_hash")?,
        purpose: row.get("purpose")?,
        shared_to: json_column(row, "shared_to")?,
        watermark: row.get("watermark")?,
        expires_at: row.get("expires_at")?,
        max_views: row.get::<_, Option<i64>>("max_views")?.map(|v| v as u32),
        view_count: row.get::<_, i64>("view_count")? as u32,
        revoked: row.get::<_, i64>("revoked")? != 0,
        created_by: UserId::new(row.get::<_, String>("created_by")?),
        created_at: row.get("created_at")?,
        last_accessed_at: row.get("last_accessed_at")?,
    })
}

fn row_to_syndication(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyndicationConsent> {
    let state: String = row.get("state")?;
    let level: String = row.get("cultural_level")?;
    let permissions: SharePermissions = json_column(row, "permissions")?;

    Ok(SyndicationConsent {
        id: SyndicationId::new(row.get::<_, String>("id")?),
        story_id: StoryId::new(row.get::<_, String>("story_id")?),
        site_id: SiteId::new(row.get::<_, String>("site_id")?),
        storyteller_id: UserId::new(row.get::<_, String>("storyteller_id")?),
        tenant_id: TenantId::new(row.get::<_, String>("tenant_id")?),
        organization_id: row
            .get::<_, Option<String>>("organization_id")?
            .map(OrgId::new),
        consent_id: ConsentId::new(row.get::<_, String>("consent_id")?),
        state: SyndicationState::parse(&state).ok_or_else(|| bad_column("state"))?,
        expires_at: row.get("expires_at")?,
        permissions,
        cultural_level: CulturalLevel::parse(&level).ok_or_else(|| bad_column("cultural_level"))?,
        requires_elder_approval: row.get::<_, i64>("requires_elder_approval")? != 0,
        requested_by: UserId::new(row.get::<_, String>("requested_by")?),
        requested_at: row.get("requested_at")?,
        approved_by: row.get::<_, Option<String>>("approved_by")?.map(UserId::new),
        approved_at: row.get("approved_at")?,
        revoked_at: row.get("revoked_at")?,
        revocation_reason: row.get("revocation_reason")?,
        view_count: row.get::<_, i64>("view_count")? as u64,
        version: row.get::<_, i64>("version")? as u64,
    })
}

fn row_to_embed_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmbedToken> {
    Ok(EmbedToken {
        id: TokenId::new(row.get::<_, String>("id")?),
        syndication_id: SyndicationId::new(row.get::<_, String>("syndication_id")?),
        story_id: StoryId::new(row.get::<_, String>("story_id")?),
        site_id: SiteId::new(row.get::<_, String>("site_id")?),
        token: row.get("token")?,
        token_hash: hash_column(row, "token_hash")?,
        allowed_domains: json_column(row, "allowed_domains")?,
        expires_at: row.get("expires_at")?,
        revoked: row.get::<_, i64>("revoked")? != 0,
        created_at: row.get("created_at")?,
    })
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredAuditEntry> {
    let kind: String = row.get("entity_kind")?;
    let action: String = row.get("action")?;
    let decision: String = row.get("decision")?;
    let actor: AuditActor = json_column(row, "actor")?;
    let request: Option<RequestMetadata> = opt_json_column(row, "request")?;

    Ok(StoredAuditEntry {
        seq: row.get::<_, i64>("seq")? as u64,
        entry: AuditEntry {
            actor,
            entity_kind: storykeep_core::AuditEntityKind::parse(&kind)
                .ok_or_else(|| bad_column("entity_kind"))?,
            entity_id: row.get("entity_id")?,
            action: storykeep_core::AuditAction::parse(&action)
                .ok_or_else(|| bad_column("action"))?,
            decision: storykeep_core::AuditDecision::parse(&decision)
                .ok_or_else(|| bad_column("decision"))?,
            reason: row.get("reason")?,
            story_id: row.get::<_, Option<String>>("story_id")?.map(StoryId::new),
            site_id: row.get::<_, Option<String>>("site_id")?.map(SiteId::new),
            request,
            previous_state: opt_json_column(row, "previous_state")?,
            new_state: opt_json_column(row, "new_state")?,
            at: row.get("at")?,
        },
    })
}

const CONSENT_COLUMNS: &str = "id, story_id, storyteller_id, tenant_id, method, purpose, scope,
    expires_at, restrictions, witness_id, state, requires_elder_approval, verified_by,
    verified_at, verification_notes, withdrawn_at, withdrawal_reason, created_at, updated_at,
    version";

const SHARE_COLUMNS: &str = "id, story_id, tenant_id, token, token_hash, purpose, shared_to,
    watermark, expires_at, max_views, view_count, revoked, created_by, created_at,
    last_accessed_at";

const SYNDICATION_COLUMNS: &str = "id, story_id, site_id, storyteller_id, tenant_id,
    organization_id, consent_id, state, expires_at, permissions, cultural_level,
    requires_elder_approval, requested_by, requested_at, approved_by, approved_at, revoked_at,
    revocation_reason, view_count, version";

const EMBED_COLUMNS: &str = "id, syndication_id, story_id, site_id, token, token_hash,
    allowed_domains, expires_at, revoked, created_at";

const AUDIT_COLUMNS: &str = "seq, actor, entity_kind, entity_id, action, decision, reason,
    story_id, site_id, request, previous_state, new_state, at";

fn json_string<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::InvalidData(e.to_string()))
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_consent(&self, record: &ConsentRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |conn| {
            let restrictions = json_string(&record.restrictions)?;
            conn.execute(
                "INSERT INTO consent_records (
                    id, story_id, storyteller_id, tenant_id, method, purpose, scope,
                    expires_at, restrictions, witness_id, state, requires_elder_approval,
                    verified_by, verified_at, verification_notes, withdrawn_at,
                    withdrawal_reason, created_at, updated_at, version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20)",
                params![
                    record.id.as_str(),
                    record.story_id.as_str(),
                    record.storyteller_id.as_str(),
                    record.tenant_id.as_str(),
                    record.method.as_str(),
                    record.purpose,
                    record.scope,
                    record.expires_at,
                    restrictions,
                    record.witness_id.as_ref().map(|w| w.as_str().to_string()),
                    record.state.as_str(),
                    record.requires_elder_approval as i64,
                    record.verified_by.as_ref().map(|v| v.as_str().to_string()),
                    record.verified_at,
                    record.verification_notes,
                    record.withdrawn_at,
                    record.withdrawal_reason,
                    record.created_at,
                    record.updated_at,
                    record.version as i64,
                ],
            )
            .map_err(|e| map_unique(e, "active consent exists for this story and purpose"))?;
            Ok(())
        })
        .await
    }

    async fn get_consent(&self, id: &ConsentId) -> Result<Option<ConsentRecord>> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {CONSENT_COLUMNS} FROM consent_records WHERE id = ?1"),
                params![id.as_str()],
                row_to_consent,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_active_consent(
        &self,
        story: &StoryId,
        purpose: &str,
    ) -> Result<Option<ConsentRecord>> {
        let story = story.clone();
        let purpose = purpose.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {CONSENT_COLUMNS} FROM consent_records
                     WHERE story_id = ?1 AND purpose = ?2
                       AND state IN ('pending_approval', 'granted', 'verified', 'withdrawn_partial')"
                ),
                params![story.as_str(), purpose],
                row_to_consent,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_consents(&self, story: &StoryId) -> Result<Vec<ConsentRecord>> {
        let story = story.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONSENT_COLUMNS} FROM consent_records
                 WHERE story_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![story.as_str()], row_to_consent)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list_active_consents(&self, story: &StoryId) -> Result<Vec<ConsentRecord>> {
        let story = story.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONSENT_COLUMNS} FROM consent_records
                 WHERE story_id = ?1
                   AND state IN ('pending_approval', 'granted', 'verified', 'withdrawn_partial')
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![story.as_str()], row_to_consent)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn update_consent(
        &self,
        record: &ConsentRecord,
        expected_version: u64,
    ) -> Result<UpdateOutcome> {
        let record = record.clone();
        self.blocking(move |conn| {
            let restrictions = json_string(&record.restrictions)?;
            let changed = conn.execute(
                "UPDATE consent_records SET
                    state = ?1, restrictions = ?2, expires_at = ?3, verified_by = ?4,
                    verified_at = ?5, verification_notes = ?6, withdrawn_at = ?7,
                    withdrawal_reason = ?8, updated_at = ?9, version = ?10
                 WHERE id = ?11 AND version = ?12",
                params![
                    record.state.as_str(),
                    restrictions,
                    record.expires_at,
                    record.verified_by.as_ref().map(|v| v.as_str().to_string()),
                    record.verified_at,
                    record.verification_notes,
                    record.withdrawn_at,
                    record.withdrawal_reason,
                    record.updated_at,
                    (expected_version + 1) as i64,
                    record.id.as_str(),
                    expected_version as i64,
                ],
            )?;

            if changed == 1 {
                return Ok(UpdateOutcome::Updated);
            }

            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM consent_records WHERE id = ?1",
                    params![record.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("consent {}", record.id)));
            }
            Ok(UpdateOutcome::Stale)
        })
        .await
    }

    async fn latest_full_withdrawal(&self, story: &StoryId) -> Result<Option<i64>> {
        let story = story.clone();
        self.blocking(move |conn| {
            let at: Option<i64> = conn.query_row(
                "SELECT MAX(withdrawn_at) FROM consent_records
                 WHERE story_id = ?1 AND state = 'withdrawn_full'",
                params![story.as_str()],
                |row| row.get(0),
            )?;
            Ok(at)
        })
        .await
    }

    async fn insert_share_token(&self, token: &ShareToken) -> Result<()> {
        let token = token.clone();
        self.blocking(move |conn| {
            let shared_to = json_string(&token.shared_to)?;
            conn.execute(
                "INSERT INTO share_tokens (
                    id, story_id, tenant_id, token, token_hash, purpose, shared_to,
                    watermark, expires_at, max_views, view_count, revoked, created_by,
                    created_at, last_accessed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    token.id.as_str(),
                    token.story_id.as_str(),
                    token.tenant_id.as_str(),
                    token.token,
                    token.token_hash.as_bytes().as_slice(),
                    token.purpose,
                    shared_to,
                    token.watermark,
                    token.expires_at,
                    token.max_views.map(|v| v as i64),
                    token.view_count as i64,
                    token.revoked as i64,
                    token.created_by.as_str(),
                    token.created_at,
                    token.last_accessed_at,
                ],
            )
            .map_err(|e| map_unique(e, "share token hash"))?;
            Ok(())
        })
        .await
    }

    async fn get_share_token(&self, hash: &TokenHash) -> Result<Option<ShareToken>> {
        let hash = *hash;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {SHARE_COLUMNS} FROM share_tokens WHERE token_hash = ?1"),
                params![hash.as_bytes().as_slice()],
                row_to_share_token,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_share_token_by_id(&self, id: &TokenId) -> Result<Option<ShareToken>> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {SHARE_COLUMNS} FROM share_tokens WHERE id = ?1"),
                params![id.as_str()],
                row_to_share_token,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_share_tokens(
        &self,
        story: &StoryId,
        creator: &UserId,
    ) -> Result<Vec<ShareToken>> {
        let story = story.clone();
        let creator = creator.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SHARE_COLUMNS} FROM share_tokens
                 WHERE story_id = ?1 AND created_by = ?2 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![story.as_str(), creator.as_str()], row_to_share_token)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn set_share_token_revoked(&self, id: &TokenId) -> Result<()> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE share_tokens SET revoked = 1 WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn consume_share_view(&self, hash: &TokenHash, now: i64) -> Result<ViewConsume> {
        let hash = *hash;
        self.blocking(move |conn| {
            // The guard conditions live inside the UPDATE, so two concurrent
            // consumers can never both pass a max_views=N cap.
            let changed = conn.execute(
                "UPDATE share_tokens
                 SET view_count = view_count + 1, last_accessed_at = ?2
                 WHERE token_hash = ?1
                   AND revoked = 0
                   AND expires_at > ?2
                   AND (max_views IS NULL OR view_count < max_views)",
                params![hash.as_bytes().as_slice(), now],
            )?;

            let token = conn
                .query_row(
                    &format!("SELECT {SHARE_COLUMNS} FROM share_tokens WHERE token_hash = ?1"),
                    params![hash.as_bytes().as_slice()],
                    row_to_share_token,
                )
                .optional()?;

            let Some(token) = token else {
                return Ok(ViewConsume::NotFound);
            };

            if changed == 1 {
                return Ok(ViewConsume::Consumed(token));
            }
            if token.revoked {
                return Ok(ViewConsume::Revoked);
            }
            if storykeep_core::is_expired(token.expires_at, now) {
                return Ok(ViewConsume::Expired);
            }
            Ok(ViewConsume::LimitReached)
        })
        .await
    }

    async fn insert_syndication(&self, consent: &SyndicationConsent) -> Result<()> {
        let consent = consent.clone();
        self.blocking(move |conn| {
            let permissions = json_string(&consent.permissions)?;
            conn.execute(
                "INSERT INTO syndication_consents (
                    id, story_id, site_id, storyteller_id, tenant_id, organization_id,
                    consent_id, state, expires_at, permissions, cultural_level,
                    requires_elder_approval, requested_by, requested_at, approved_by,
                    approved_at, revoked_at, revocation_reason, view_count, version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20)",
                params![
                    consent.id.as_str(),
                    consent.story_id.as_str(),
                    consent.site_id.as_str(),
                    consent.storyteller_id.as_str(),
                    consent.tenant_id.as_str(),
                    consent.organization_id.as_ref().map(|o| o.as_str().to_string()),
                    consent.consent_id.as_str(),
                    consent.state.as_str(),
                    consent.expires_at,
                    permissions,
                    consent.cultural_level.as_str(),
                    consent.requires_elder_approval as i64,
                    consent.requested_by.as_str(),
                    consent.requested_at,
                    consent.approved_by.as_ref().map(|a| a.as_str().to_string()),
                    consent.approved_at,
                    consent.revoked_at,
                    consent.revocation_reason,
                    consent.view_count as i64,
                    consent.version as i64,
                ],
            )
            .map_err(|e| map_unique(e, "active syndication consent exists for this story and site"))?;
            Ok(())
        })
        .await
    }

    async fn get_syndication(&self, id: &SyndicationId) -> Result<Option<SyndicationConsent>> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {SYNDICATION_COLUMNS} FROM syndication_consents WHERE id = ?1"),
                params![id.as_str()],
                row_to_syndication,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_syndication_for(
        &self,
        story: &StoryId,
        site: &SiteId,
    ) -> Result<Option<SyndicationConsent>> {
        let story = story.clone();
        let site = site.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SYNDICATION_COLUMNS} FROM syndication_consents
                     WHERE story_id = ?1 AND site_id = ?2
                     ORDER BY requested_at DESC LIMIT 1"
                ),
                params![story.as_str(), site.as_str()],
                row_to_syndication,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_syndications_for_story(
        &self,
        story: &StoryId,
    ) -> Result<Vec<SyndicationConsent>> {
        let story = story.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SYNDICATION_COLUMNS} FROM syndication_consents
                 WHERE story_id = ?1 ORDER BY requested_at DESC"
            ))?;
            let rows = stmt.query_map(params![story.as_str()], row_to_syndication)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list_syndications_for_site(&self, site: &SiteId) -> Result<Vec<SyndicationConsent>> {
        let site = site.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SYNDICATION_COLUMNS} FROM syndication_consents
                 WHERE site_id = ?1 ORDER BY requested_at DESC"
            ))?;
            let rows = stmt.query_map(params![site.as_str()], row_to_syndication)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn update_syndication(
        &self,
        consent: &SyndicationConsent,
        expected_version: u64,
    ) -> Result<UpdateOutcome> {
        let consent = consent.clone();
        self.blocking(move |conn| {
            let permissions = json_string(&consent.permissions)?;
            let changed = conn.execute(
                "UPDATE syndication_consents SET
                    state = ?1, expires_at = ?2, permissions = ?3, approved_by = ?4,
                    approved_at = ?5, revoked_at = ?6, revocation_reason = ?7, version = ?8
                 WHERE id = ?9 AND version = ?10",
                params![
                    consent.state.as_str(),
                    consent.expires_at,
                    permissions,
                    consent.approved_by.as_ref().map(|a| a.as_str().to_string()),
                    consent.approved_at,
                    consent.revoked_at,
                    consent.revocation_reason,
                    (expected_version + 1) as i64,
                    consent.id.as_str(),
                    expected_version as i64,
                ],
            )?;

            if changed == 1 {
                return Ok(UpdateOutcome::Updated);
            }

            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM syndication_consents WHERE id = ?1",
                    params![consent.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("syndication {}", consent.id)));
            }
            Ok(UpdateOutcome::Stale)
        })
        .await
    }

    async fn increment_syndication_views(&self, id: &SyndicationId) -> Result<()> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE syndication_consents SET view_count = view_count + 1 WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_embed_token(&self, token: &EmbedToken) -> Result<()> {
        let token = token.clone();
        self.blocking(move |conn| {
            let domains = json_string(&token.allowed_domains)?;
            conn.execute(
                "INSERT INTO embed_tokens (
                    id, syndication_id, story_id, site_id, token, token_hash,
                    allowed_domains, expires_at, revoked, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    token.id.as_str(),
                    token.syndication_id.as_str(),
                    token.story_id.as_str(),
                    token.site_id.as_str(),
                    token.token,
                    token.token_hash.as_bytes().as_slice(),
                    domains,
                    token.expires_at,
                    token.revoked as i64,
                    token.created_at,
                ],
            )
            .map_err(|e| map_unique(e, "embed token hash"))?;
            Ok(())
        })
        .await
    }

    async fn get_embed_token(&self, hash: &TokenHash) -> Result<Option<EmbedToken>> {
        let hash = *hash;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {EMBED_COLUMNS} FROM embed_tokens WHERE token_hash = ?1"),
                params![hash.as_bytes().as_slice()],
                row_to_embed_token,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_embed_token_by_id(&self, id: &TokenId) -> Result<Option<EmbedToken>> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {EMBED_COLUMNS} FROM embed_tokens WHERE id = ?1"),
                params![id.as_str()],
                row_to_embed_token,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_embed_tokens(&self, story: &StoryId) -> Result<Vec<EmbedToken>> {
        let story = story.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EMBED_COLUMNS} FROM embed_tokens
                 WHERE story_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![story.as_str()], row_to_embed_token)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn set_embed_token_revoked(&self, id: &TokenId) -> Result<()> {
        let id = id.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE embed_tokens SET revoked = 1 WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<u64> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            let actor = json_string(&entry.actor)?;
            let request = entry.request.as_ref().map(json_string).transpose()?;
            let previous = entry.previous_state.as_ref().map(json_string).transpose()?;
            let new = entry.new_state.as_ref().map(json_string).transpose()?;

            conn.execute(
                "INSERT INTO audit_log (
                    actor, entity_kind, entity_id, action, decision, reason,
                    story_id, site_id, request, previous_state, new_state, at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    actor,
                    entry.entity_kind.as_str(),
                    entry.entity_id,
                    entry.action.as_str(),
                    entry.decision.as_str(),
                    entry.reason,
                    entry.story_id.as_ref().map(|s| s.as_str().to_string()),
                    entry.site_id.as_ref().map(|s| s.as_str().to_string()),
                    request,
                    previous,
                    new,
                    entry.at,
                ],
            )?;
            Ok(conn.last_insert_rowid() as u64)
        })
        .await
    }

    async fn audit_for_entity(
        &self,
        kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<Vec<StoredAuditEntry>> {
        let entity_id = entity_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log
                 WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY seq ASC"
            ))?;
            let rows = stmt.query_map(params![kind.as_str(), entity_id], row_to_audit)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn audit_for_site(&self, site: &SiteId) -> Result<Vec<StoredAuditEntry>> {
        let site = site.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE site_id = ?1 ORDER BY seq ASC"
            ))?;
            let rows = stmt.query_map(params![site.as_str()], row_to_audit)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn try_record_api_request(
        &self,
        key: &TokenHash,
        at: i64,
        since: i64,
        max: u32,
    ) -> Result<bool> {
        let key = *key;
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM api_requests WHERE key_hash = ?1 AND at < ?2",
                params![key.as_bytes().as_slice(), since],
            )?;
            // The guarded INSERT counts and records in one statement, so the
            // connection never observes a gap between the two.
            let inserted = conn.execute(
                "INSERT INTO api_requests (key_hash, at)
                 SELECT ?1, ?2
                 WHERE (SELECT COUNT(*) FROM api_requests
                        WHERE key_hash = ?1 AND at >= ?3) < ?4",
                params![key.as_bytes().as_slice(), at, since, max],
            )?;
            Ok(inserted == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storykeep_core::generate_token;

    fn consent(story: &str, purpose: &str, state: ConsentState) -> ConsentRecord {
        ConsentRecord {
            id: ConsentId::fresh(),
            story_id: StoryId::new(story),
            storyteller_id: UserId::new("teller-1"),
            tenant_id: TenantId::new("tenant-1"),
            method: ConsentMethod::Digital,
            purpose: purpose.to_string(),
            scope: "public_sharing".to_string(),
            expires_at: None,
            restrictions: vec!["no_remix".to_string()],
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

    fn share_token(story: &str, max_views: Option<u32>, expires_at: i64) -> ShareToken {
        let raw = generate_token();
        ShareToken {
            id: TokenId::fresh(),
            story_id: StoryId::new(story),
            tenant_id: TenantId::new("tenant-1"),
            token_hash: TokenHash::of(&raw),
            token: raw,
            purpose: "direct_share".to_string(),
            shared_to: vec!["reviewer@example.org".to_string()],
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
    async fn test_consent_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let record = consent("s1", "public_sharing", ConsentState::Granted);
        store.insert_consent(&record).await.unwrap();

        let loaded = store.get_consent(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let active = store
            .get_active_consent(&record.story_id, "public_sharing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, record.id);
    }

    #[tokio::test]
    async fn test_duplicate_active_consent_maps_to_unique_violation() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .insert_consent(&consent("s1", "public_sharing", ConsentState::Granted))
            .await
            .unwrap();

        let err = store
            .insert_consent(&consent("s1", "public_sharing", ConsentState::PendingApproval))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        // Terminal history rows never block a fresh grant.
        store
            .insert_consent(&consent("s2", "public_sharing", ConsentState::WithdrawnFull))
            .await
            .unwrap();
        store
            .insert_consent(&consent("s2", "public_sharing", ConsentState::Granted))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consent_cas() {
        let store = SqliteStore::open_memory().unwrap();
        let record = consent("s1", "public_sharing", ConsentState::Granted);
        store.insert_consent(&record).await.unwrap();

        let mut update = record.clone();
        update.state = ConsentState::WithdrawnFull;
        update.withdrawn_at = Some(2000);
        assert_eq!(
            store.update_consent(&update, 1).await.unwrap(),
            UpdateOutcome::Updated
        );
        assert_eq!(
            store.update_consent(&update, 1).await.unwrap(),
            UpdateOutcome::Stale
        );

        let loaded = store.get_consent(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, ConsentState::WithdrawnFull);
        assert_eq!(loaded.version, 2);
        assert_eq!(
            store.latest_full_withdrawal(&record.story_id).await.unwrap(),
            Some(2000)
        );
    }

    #[tokio::test]
    async fn test_share_token_lookup_by_hash() {
        let store = SqliteStore::open_memory().unwrap();
        let token = share_token("s1", Some(3), i64::MAX);
        store.insert_share_token(&token).await.unwrap();

        let loaded = store.get_share_token(&token.token_hash).await.unwrap().unwrap();
        assert_eq!(loaded, token);

        assert!(store
            .get_share_token(&TokenHash::of("not-a-token"))
            .await
            .unwrap()
            .is_none());
    }

    fn embed_token(story: &str, created_at: i64) -> EmbedToken {
        let raw = generate_token();
        EmbedToken {
            id: TokenId::fresh(),
            syndication_id: SyndicationId::fresh(),
            story_id: StoryId::new(story),
            site_id: SiteId::new("site-1"),
            token_hash: TokenHash::of(&raw),
            token: raw,
            allowed_domains: vec![],
            expires_at: i64::MAX,
            revoked: false,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_embed_token_lookup_list_and_revoke() {
        let store = SqliteStore::open_memory().unwrap();
        let older = embed_token("s1", 100);
        let newer = embed_token("s1", 200);
        store.insert_embed_token(&older).await.unwrap();
        store.insert_embed_token(&newer).await.unwrap();
        store.insert_embed_token(&embed_token("s2", 300)).await.unwrap();

        let by_id = store.get_embed_token_by_id(&older.id).await.unwrap().unwrap();
        assert_eq!(by_id, older);
        assert!(store
            .get_embed_token_by_id(&TokenId::fresh())
            .await
            .unwrap()
            .is_none());

        let listed = store.list_embed_tokens(&StoryId::new("s1")).await.unwrap();
        assert_eq!(
            listed.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            vec![newer.id.clone(), older.id.clone()]
        );

        store.set_embed_token_revoked(&newer.id).await.unwrap();
        let revoked = store.get_embed_token(&newer.token_hash).await.unwrap().unwrap();
        assert!(revoked.revoked);
    }

    #[tokio::test]
    async fn test_consume_share_view_cap_and_classification() {
        let store = SqliteStore::open_memory().unwrap();
        let token = share_token("s1", Some(1), 5000);
        store.insert_share_token(&token).await.unwrap();

        let consumed = store.consume_share_view(&token.token_hash, 10).await.unwrap();
        match consumed {
            ViewConsume::Consumed(t) => {
                assert_eq!(t.view_count, 1);
                assert_eq!(t.last_accessed_at, Some(10));
            }
            other => panic!("expected Consumed, got {:?}", other),
        }

        assert_eq!(
            store.consume_share_view(&token.token_hash, 20).await.unwrap(),
            ViewConsume::LimitReached
        );

        // Expiry classification takes over once the deadline passes.
        assert_eq!(
            store.consume_share_view(&token.token_hash, 5000).await.unwrap(),
            ViewConsume::Expired
        );

        store.set_share_token_revoked(&token.id).await.unwrap();
        assert_eq!(
            store.consume_share_view(&token.token_hash, 20).await.unwrap(),
            ViewConsume::Revoked
        );
    }

    #[tokio::test]
    async fn test_syndication_roundtrip_and_duplicate() {
        let store = SqliteStore::open_memory().unwrap();
        let consent_row = consent("s1", "syndication", ConsentState::Granted);
        store.insert_consent(&consent_row).await.unwrap();

        let synd = SyndicationConsent {
            id: SyndicationId::fresh(),
            story_id: StoryId::new("s1"),
            site_id: SiteId::new("site-1"),
            storyteller_id: UserId::new("teller-1"),
            tenant_id: TenantId::new("tenant-1"),
            organization_id: Some(OrgId::new("org-1")),
            consent_id: consent_row.id.clone(),
            state: SyndicationState::Approved,
            expires_at: None,
            permissions: SharePermissions::excerpt(),
            cultural_level: CulturalLevel::Public,
            requires_elder_approval: false,
            requested_by: UserId::new("teller-1"),
            requested_at: 100,
            approved_by: None,
            approved_at: None,
            revoked_at: None,
            revocation_reason: None,
            view_count: 0,
            version: 1,
        };
        store.insert_syndication(&synd).await.unwrap();

        let loaded = store.get_syndication(&synd.id).await.unwrap().unwrap();
        assert_eq!(loaded, synd);

        let mut dup = synd.clone();
        dup.id = SyndicationId::fresh();
        let err = store.insert_syndication(&dup).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        store.increment_syndication_views(&synd.id).await.unwrap();
        let bumped = store.get_syndication(&synd.id).await.unwrap().unwrap();
        assert_eq!(bumped.view_count, 1);
    }

    #[tokio::test]
    async fn test_audit_roundtrip() {
        use storykeep_core::{AuditAction, AuditActor};

        let store = SqliteStore::open_memory().unwrap();
        let entry = AuditEntry::denied(
            AuditActor::User(UserId::new("u1")),
            AuditEntityKind::Consent,
            "c1",
            AuditAction::ConsentWithdrawn,
            "stale_version",
            77,
        )
        .with_story(StoryId::new("s1"))
        .with_states(Some(serde_json::json!({"state": "granted"})), None);

        let seq = store.append_audit(&entry).await.unwrap();
        assert_eq!(seq, 1);

        let entries = store
            .audit_for_entity(AuditEntityKind::Consent, "c1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[0].entry, entry);
    }

    #[tokio::test]
    async fn test_api_request_window_is_atomic_at_the_limit() {
        let store = SqliteStore::open_memory().unwrap();
        let key = TokenHash::of("api-key");

        for at in [100, 200, 300] {
            assert!(store.try_record_api_request(&key, at, 0, 3).await.unwrap());
        }
        // At the cap the guarded insert records nothing.
        assert!(!store.try_record_api_request(&key, 350, 0, 3).await.unwrap());

        // Sliding the window past the oldest entry frees a slot.
        assert!(store.try_record_api_request(&key, 400, 150, 3).await.unwrap());

        // Other keys are counted independently.
        let other = TokenHash::of("other-key");
        assert!(store.try_record_api_request(&other, 400, 150, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storykeep.db");

        let record = consent("s1", "public_sharing", ConsentState::Granted);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_consent(&record).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.get_consent(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }
}

//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, storykeep_core::now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Consent ledger. One row per consent record; state transitions
        -- update the row in place guarded by the version column.
        CREATE TABLE consent_records (
            id TEXT PRIMARY KEY,
            story_id TEXT NOT NULL,
            storyteller_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            method TEXT NOT NULL,
            purpose TEXT NOT NULL,
            scope TEXT NOT NULL,
            expires_at INTEGER,                -- Unix ms, NULL = no expiry
            restrictions TEXT NOT NULL,        -- JSON array of strings
            witness_id TEXT,
            state TEXT NOT NULL,
            requires_elder_approval INTEGER NOT NULL DEFAULT 0,
            verified_by TEXT,
            verified_at INTEGER,
            verification_notes TEXT,
            withdrawn_at INTEGER,
            withdrawal_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );

        -- At most one non-terminal consent per (story, purpose). Terminal
        -- records (rejected, withdrawn_full) stay behind as history and do
        -- not block a fresh grant.
        CREATE UNIQUE INDEX idx_consent_one_active
            ON consent_records(story_id, purpose)
            WHERE state IN ('pending_approval', 'granted', 'verified', 'withdrawn_partial');

        CREATE INDEX idx_consent_story ON consent_records(story_id);
        CREATE INDEX idx_consent_state ON consent_records(state);

        -- Ephemeral share links. Lookups go through token_hash; the plaintext
        -- token column exists only so owners can list their own links.
        CREATE TABLE share_tokens (
            id TEXT PRIMARY KEY,
            story_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            token TEXT NOT NULL,
            token_hash BLOB NOT NULL UNIQUE,   -- 32 bytes, Blake3 of plaintext
            purpose TEXT NOT NULL,
            shared_to TEXT NOT NULL,           -- JSON array of strings
            watermark TEXT,
            expires_at INTEGER NOT NULL,
            max_views INTEGER,                 -- NULL = unlimited
            view_count INTEGER NOT NULL DEFAULT 0,
            revoked INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_accessed_at INTEGER
        );

        CREATE INDEX idx_share_story_creator ON share_tokens(story_id, created_by);

        -- Syndication consent per (story, site).
        CREATE TABLE syndication_consents (
            id TEXT PRIMARY KEY,
            story_id TEXT NOT NULL,
            site_id TEXT NOT NULL,
            storyteller_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            organization_id TEXT,
            consent_id TEXT NOT NULL,          -- anchoring ledger record
            state TEXT NOT NULL,
            expires_at INTEGER,
            permissions TEXT NOT NULL,         -- JSON SharePermissions
            cultural_level TEXT NOT NULL,
            requires_elder_approval INTEGER NOT NULL DEFAULT 0,
            requested_by TEXT NOT NULL,
            requested_at INTEGER NOT NULL,
            approved_by TEXT,
            approved_at INTEGER,
            revoked_at INTEGER,
            revocation_reason TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1
        );

        -- At most one pending or approved syndication per (story, site).
        CREATE UNIQUE INDEX idx_syndication_one_active
            ON syndication_consents(story_id, site_id)
            WHERE state IN ('pending_approval', 'approved');

        CREATE INDEX idx_syndication_story ON syndication_consents(story_id);
        CREATE INDEX idx_syndication_site ON syndication_consents(site_id);

        -- Embed tokens issued against an approved syndication consent.
        CREATE TABLE embed_tokens (
            id TEXT PRIMARY KEY,
            syndication_id TEXT NOT NULL,
            story_id TEXT NOT NULL,
            site_id TEXT NOT NULL,
            token TEXT NOT NULL,
            token_hash BLOB NOT NULL UNIQUE,
            allowed_domains TEXT NOT NULL,     -- JSON array of strings
            expires_at INTEGER NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_embed_syndication ON embed_tokens(syndication_id);

        -- Append-only audit log. seq is assigned by SQLite and never reused.
        CREATE TABLE audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            actor TEXT NOT NULL,               -- JSON AuditActor
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL,
            decision TEXT NOT NULL,
            reason TEXT,
            story_id TEXT,
            site_id TEXT,
            request TEXT,                      -- JSON RequestMetadata
            previous_state TEXT,               -- JSON snapshot
            new_state TEXT,                    -- JSON snapshot
            at INTEGER NOT NULL
        );

        CREATE INDEX idx_audit_entity ON audit_log(entity_kind, entity_id);
        CREATE INDEX idx_audit_site ON audit_log(site_id);

        -- Sliding-window request tracking keyed by API key hash.
        CREATE TABLE api_requests (
            key_hash BLOB NOT NULL,
            at INTEGER NOT NULL
        );

        CREATE INDEX idx_api_requests_key ON api_requests(key_hash, at);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"consent_records".to_string()));
        assert!(tables.contains(&"share_tokens".to_string()));
        assert!(tables.contains(&"syndication_consents".to_string()));
        assert!(tables.contains(&"embed_tokens".to_string()));
        assert!(tables.contains(&"audit_log".to_string()));
        assert!(tables.contains(&"api_requests".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row(
                "SELECT MAX(version) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_partial_unique_index_allows_terminal_duplicates() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let insert = |conn: &Connection, id: &str, state: &str| {
            conn.execute(
                "INSERT INTO consent_records
                 (id, story_id, storyteller_id, tenant_id, method, purpose, scope,
                  restrictions, state, created_at, updated_at)
                 VALUES (?1, 's1', 'u1', 't1', 'digital', 'public_sharing', 'full',
                         '[]', ?2, 0, 0)",
                rusqlite::params![id, state],
            )
        };

        insert(&conn, "c1", "withdrawn_full").unwrap();
        insert(&conn, "c2", "granted").unwrap();
        // Second non-terminal row for the same (story, purpose) must fail.
        assert!(insert(&conn, "c3", "pending_approval").is_err());
    }
}

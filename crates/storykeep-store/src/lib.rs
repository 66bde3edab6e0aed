//! # Storykeep Store
//!
//! Storage abstraction for the consent and sharing subsystem. Provides a
//! trait-based interface for consent, token, and audit persistence with
//! SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The store module abstracts persistence behind the [`Store`] trait, so the
//! consent ledger and validators stay storage-agnostic. The primary
//! implementation is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`ViewConsume`] - Outcome of atomically consuming a share-link view
//! - [`UpdateOutcome`] - Outcome of a version-guarded update
//! - [`AuditSink`] - Append-only audit recording that never blocks decisions
//!
//! ## Design Notes
//!
//! - **One active record**: Partial unique indexes reject a second live
//!   consent per (story, purpose), and per (story, site) for syndication
//! - **Atomic view caps**: `consume_share_view` increments and checks the
//!   cap in a single conditional UPDATE
//! - **Optimistic concurrency**: Consent and syndication updates carry an
//!   expected version; stale writers get [`UpdateOutcome::Stale`]
//! - **Hash-keyed lookup**: Presented tokens are looked up by Blake3 hash,
//!   never compared as strings

pub mod error;
pub mod memory;
pub mod migration;
pub mod sink;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sink::AuditSink;
pub use sqlite::SqliteStore;
pub use traits::{Store, StoredAuditEntry, UpdateOutcome, ViewConsume};

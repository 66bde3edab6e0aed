//! # storykeep
//!
//! Consent and ephemeral access control for a multi-tenant storytelling
//! platform.
//!
//! ## Overview
//!
//! The platform treats consent as the root of every access decision:
//!
//! - **Consent ledger**: per-story, per-purpose grants moving through an
//!   explicit state machine, with elder review for culturally sensitive
//!   stories
//! - **Capability tokens**: unguessable share links with view caps and
//!   expiry, plus domain-scoped embed tokens
//! - **Syndication**: cross-organization grants anchored to a ledger
//!   record, so withdrawing the record invalidates the grant
//! - **Validation**: every external read re-checks the live consent
//!   chain, which makes withdrawal effective at the next access without
//!   enumerating derived artifacts
//! - **Audit**: an append-only log of every consent change and every
//!   validated access
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storykeep::{Directories, Platform, PlatformConfig};
//! use storykeep::consent::GrantRequest;
//! use storykeep::core::{ConsentMethod, StoryId, UserId};
//!
//! async fn example(directories: Directories) {
//!     let platform = Platform::open("consent.db", directories, PlatformConfig::default())
//!         .unwrap();
//!
//!     let record = platform
//!         .grant_consent(GrantRequest {
//!             story_id: StoryId::new("story-1"),
//!             storyteller_id: UserId::new("user-1"),
//!             method: ConsentMethod::Digital,
//!             purpose: "public_sharing".to_string(),
//!             scope: "public_sharing".to_string(),
//!             expires_in: None,
//!             restrictions: vec![],
//!             witness_id: None,
//!         })
//!         .await
//!         .unwrap();
//!
//!     println!("consent {} is {:?}", record.id, record.state);
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `storykeep::core` - Domain types (ConsentRecord, ShareToken, etc.)
//! - `storykeep::store` - Storage abstraction, SQLite and in-memory
//! - `storykeep::consent` - The consent ledger
//! - `storykeep::tokens` - Share link and syndication services
//! - `storykeep::access` - Request-time validators

pub mod error;
pub mod platform;

// Re-export component crates
pub use storykeep_access as access;
pub use storykeep_consent as consent;
pub use storykeep_core as core;
pub use storykeep_store as store;
pub use storykeep_tokens as tokens;

// Re-export main types for convenience
pub use error::{PlatformError, Result};
pub use platform::{Directories, Platform, PlatformConfig};

// Re-export commonly used component types
pub use storykeep_access::{AccessError, ApiView, EmbedView, ShapedStory, ShareView, SlidingWindow};
pub use storykeep_consent::{ConsentError, ConsentStatus, GrantRequest, WithdrawRequest};
pub use storykeep_core::{
    ConsentRecord, ConsentState, RequestMetadata, ShareToken, StoryId, SyndicationConsent,
    UserId, WithdrawalScope,
};
pub use storykeep_store::{MemoryStore, SqliteStore, Store};
pub use storykeep_tokens::{
    CreateShareLink, EmbedTokenView, ShareLink, SyndicationRequest, TokenError,
};

//! # storykeep-core
//!
//! Pure primitives for the storykeep consent kernel: identifiers, consent
//! records, capability tokens, audit entries, and collaborator contracts.
//!
//! This crate contains no I/O and no storage. It is pure data plus the
//! validity predicates the rest of the workspace builds on.
//!
//! ## Key Types
//!
//! - [`ConsentRecord`] / [`ConsentState`] - the consent state machine
//! - [`ShareToken`] - ephemeral capability for direct link sharing
//! - [`SyndicationConsent`] / [`EmbedToken`] - cross-site grants
//! - [`AuditEntry`] - append-only audit record
//! - [`TokenHash`] - Blake3 lookup key for capability tokens
//!
//! ## Time
//!
//! Every validity check takes `now` as a parameter. Expiry boundaries are
//! inclusive: `expires_at == now` is expired.

pub mod audit;
pub mod consent;
pub mod directory;
pub mod ids;
pub mod sharing;
pub mod story;
pub mod time;
pub mod token;

pub use audit::{
    AuditAction, AuditActor, AuditDecision, AuditEntityKind, AuditEntry, RequestMetadata,
};
pub use consent::{ConsentMethod, ConsentRecord, ConsentState, WithdrawalScope};
pub use directory::{
    CallerRoles, ContentSource, DirectoryError, MediaRef, RoleDirectory, SiteRecord, SiteRegistry,
    StoryContent, StoryDirectory,
};
pub use ids::{ConsentId, OrgId, SiteId, StoryId, SyndicationId, TenantId, TokenId, UserId};
pub use sharing::{EmbedToken, SharePermissions, ShareToken, SyndicationConsent, SyndicationState};
pub use story::{CulturalLevel, StoryRef, StoryStatus};
pub use time::{is_expired, now_millis, DAY_MS, HOUR_MS};
pub use token::{generate_token, TokenHash, TOKEN_BYTES};

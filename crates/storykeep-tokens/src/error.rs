//! Error types for token issuance and syndication.

use storykeep_core::DirectoryError;
use storykeep_store::StoreError;
use thiserror::Error;

/// Errors for issuer and syndication operations.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("story not found: {0}")]
    StoryNotFound(String),

    #[error("site not found: {0}")]
    SiteNotFound(String),

    #[error("token or consent not found: {0}")]
    NotFound(String),

    #[error("caller does not own this resource")]
    Forbidden,

    #[error("the story itself is withdrawn; no new tokens may be issued")]
    WithdrawnStoryConsent,

    #[error("no active syndication ledger consent for this story")]
    NoActiveConsent,

    #[error("an active syndication consent already exists for this story and site")]
    DuplicateActiveConsent,

    #[error("site is outside the story's organization boundary and not whitelisted")]
    OrganizationBoundary,

    #[error("syndication consent is not approved")]
    ConsentNotApproved,

    #[error("operation not legal from current state: {0}")]
    InvalidState(String),

    #[error("record was modified concurrently; re-fetch and retry")]
    Stale,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("collaborator error: {0}")]
    Directory(#[from] DirectoryError),
}

pub type Result<T> = std::result::Result<T, TokenError>;

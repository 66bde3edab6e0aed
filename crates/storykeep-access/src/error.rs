//! Error types for access validation.
//!
//! Every denial carries a distinct reason so a storyteller can tell "your
//! link expired" from "this story's consent was withdrawn", and so the
//! audit log records why each attempt was denied.

use storykeep_core::DirectoryError;
use storykeep_store::StoreError;
use thiserror::Error;

/// Validation failures. All are terminal for the request; a denial is
/// never downgraded to partial content.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("unknown token")]
    NotFound,

    #[error("token has expired")]
    Expired,

    #[error("token was revoked")]
    Revoked,

    #[error("view limit reached")]
    ViewLimitReached,

    #[error("consent for this story was withdrawn")]
    ConsentWithdrawn,

    #[error("no approved syndication consent for this story and site")]
    ConsentNotGranted,

    #[error("syndication consent has expired")]
    ConsentExpired,

    #[error("API key could not be resolved")]
    InvalidKey,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("requesting origin is not in the allowed domain list")]
    DomainNotAllowed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("collaborator error: {0}")]
    Directory(#[from] DirectoryError),
}

impl AccessError {
    /// Stable reason code recorded on denied audit entries.
    pub fn reason(&self) -> &'static str {
        match self {
            AccessError::NotFound => "not_found",
            AccessError::Expired => "expired",
            AccessError::Revoked => "revoked",
            AccessError::ViewLimitReached => "view_limit_reached",
            AccessError::ConsentWithdrawn => "consent_withdrawn",
            AccessError::ConsentNotGranted => "consent_not_granted",
            AccessError::ConsentExpired => "consent_expired",
            AccessError::InvalidKey => "invalid_key",
            AccessError::RateLimited => "rate_limited",
            AccessError::DomainNotAllowed => "domain_not_allowed",
            AccessError::Store(_) | AccessError::Directory(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AccessError>;

//! Unified error type over the component services.

use storykeep_access::AccessError;
use storykeep_consent::ConsentError;
use storykeep_store::StoreError;
use storykeep_tokens::TokenError;
use thiserror::Error;

/// Errors surfaced by [`crate::Platform`] operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Consent ledger error.
    #[error("consent error: {0}")]
    Consent(#[from] ConsentError),

    /// Token issuance or syndication error.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Access validation denial or failure.
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for Platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

//! Error types for the consent ledger.

use storykeep_core::DirectoryError;
use storykeep_store::StoreError;
use thiserror::Error;

/// Errors for ledger operations.
#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("story not found: {0}")]
    StoryNotFound(String),

    #[error("caller is not the story's storyteller")]
    NotOwner,

    #[error("an active consent already exists for this story and purpose")]
    DuplicateActiveConsent,

    #[error("no active consent to operate on")]
    NoActiveConsent,

    #[error("caller lacks the reviewer role")]
    Forbidden,

    #[error("operation not legal from current state: {0}")]
    InvalidState(String),

    #[error("record was modified concurrently; re-fetch and retry")]
    Stale,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("collaborator error: {0}")]
    Directory(#[from] DirectoryError),
}

pub type Result<T> = std::result::Result<T, ConsentError>;

//! # Storykeep Tokens
//!
//! Capability token issuance and the syndication consent lifecycle.
//!
//! ## Overview
//!
//! - [`TokenIssuer`] - mints ephemeral share links for a storyteller's own
//!   distribution, and domain-scoped embed tokens derived from approved
//!   syndication consents
//! - [`SyndicationService`] - per (story, site) cross-boundary grants,
//!   anchored to the consent ledger and gated by elder review when the
//!   story's cultural classification requires it
//!
//! Tokens are caches of a prior approval, never the source of truth: the
//! access validators re-check the parent consent's live state on every
//! use, so revocation and withdrawal need no token enumeration.

pub mod error;
pub mod issuer;
pub mod syndication;

pub use error::{Result, TokenError};
pub use issuer::{
    CreateShareLink, EmbedTokenView, IssuerConfig, ShareLink, ShareTokenView, TokenIssuer,
};
pub use syndication::{SyndicationRequest, SyndicationService, SYNDICATION_PURPOSE};

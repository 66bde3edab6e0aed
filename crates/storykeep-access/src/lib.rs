//! # storykeep-access
//!
//! ## Overview
//!
//! Request-time validation for every external read path: share links,
//! syndication API keys, and embed tokens. Validation treats each token
//! as a claim to be re-checked rather than a standing right, so consent
//! withdrawal takes effect at the next access with no token enumeration.
//!
//! ## Key Types
//!
//! - [`AccessValidator`]: the three validation entry points.
//! - [`SlidingWindow`]: per-key API rate limiting.
//! - [`ShapedStory`]: the permission-shaped payload handed outward.
//! - [`AccessError`]: denial taxonomy with stable reason codes.
//!
//! ## Design Notes
//!
//! View caps are enforced by the store's conditional consume, never by a
//! read-then-write in this crate. Rate-limited requests are rejected
//! before the consent check and are the only denials absent from the
//! audit log.

pub mod error;
pub mod ratelimit;
pub mod shape;
pub mod validator;

pub use error::{AccessError, Result};
pub use ratelimit::SlidingWindow;
pub use shape::{shape_for_share, shape_for_syndication, ShapedStory, SharingBlock, EXCERPT_CHARS};
pub use validator::{AccessValidator, ApiView, EmbedView, ShareView};

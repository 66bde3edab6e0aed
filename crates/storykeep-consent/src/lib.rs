//! # Storykeep Consent
//!
//! The consent ledger and approval workflow.
//!
//! ## Overview
//!
//! A storyteller's explicit, revocable permission gates everything that
//! leaves the platform: share links, syndication, API reads. This crate
//! owns the consent state machine and its review gate:
//!
//! - [`ConsentLedger`] - grant, withdraw, verify, and status reads
//! - [`policy::requires_elder_approval`] - the approval workflow policy,
//!   evaluated once at grant time and frozen onto the record
//!
//! ## State machine
//!
//! A grant lands in `Granted`, or `PendingApproval` when the story's
//! cultural classification requires elder review. Pending records are
//! verified or rejected by a reviewer. Active records can be withdrawn
//! fully (terminal, pre-empts all derived tokens) or partially (adds
//! restrictions, stays granted-equivalent).

pub mod error;
pub mod ledger;
pub mod policy;

pub use error::{ConsentError, Result};
pub use ledger::{ConsentLedger, ConsentStatus, GrantRequest, WithdrawRequest};

//! Consent records: the storyteller's explicit, scoped, revocable
//! permission for a story to be used for a stated purpose.
//!
//! State machine per record:
//!
//! ```text
//! (unset) ──grant──▶ GRANTED ─────────────┐
//!    │                                    ├──withdraw──▶ WITHDRAWN_FULL (terminal)
//!    └──grant──▶ PENDING_APPROVAL         │              WITHDRAWN_PARTIAL (restrictions narrowed,
//!                   │        │            │                                 still granted-equivalent)
//!                verify    verify      VERIFIED
//!                (yes)      (no)
//!                   ▼          ▼
//!               VERIFIED    REJECTED (terminal)
//! ```
//!
//! Withdrawal never deletes: the record keeps its history and a fresh
//! `grant` creates a new record version. The ledger is additive.

use serde::{Deserialize, Serialize};

use crate::ids::{ConsentId, StoryId, TenantId, UserId};
use crate::time::is_expired;

/// How consent was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMethod {
    Written,
    Verbal,
    Digital,
    Recorded,
    Witnessed,
}

impl ConsentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentMethod::Written => "written",
            ConsentMethod::Verbal => "verbal",
            ConsentMethod::Digital => "digital",
            ConsentMethod::Recorded => "recorded",
            ConsentMethod::Witnessed => "witnessed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "written" => Some(ConsentMethod::Written),
            "verbal" => Some(ConsentMethod::Verbal),
            "digital" => Some(ConsentMethod::Digital),
            "recorded" => Some(ConsentMethod::Recorded),
            "witnessed" => Some(ConsentMethod::Witnessed),
            _ => None,
        }
    }
}

/// Current state of a consent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    PendingApproval,
    Granted,
    Verified,
    Rejected,
    /// Restrictions narrowed; the record is still granted-equivalent.
    WithdrawnPartial,
    /// Terminal. Pre-empts every token derived from this story.
    WithdrawnFull,
}

impl ConsentState {
    /// Whether this state permits access (subject to expiry).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConsentState::Granted | ConsentState::Verified | ConsentState::WithdrawnPartial
        )
    }

    /// Whether this state is terminal: no further transitions are legal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsentState::Rejected | ConsentState::WithdrawnFull)
    }

    /// Whether a record in this state blocks a second grant for the same
    /// (story, purpose) pair. Everything non-terminal does: pending,
    /// granted, verified, and partially-withdrawn records.
    pub fn blocks_duplicate(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether transitioning to `next` is legal from this state.
    pub fn can_become(&self, next: ConsentState) -> bool {
        use ConsentState::*;
        match (self, next) {
            (PendingApproval, Verified) | (PendingApproval, Rejected) => true,
            (Granted, WithdrawnFull) | (Granted, WithdrawnPartial) => true,
            (Verified, WithdrawnFull) | (Verified, WithdrawnPartial) => true,
            // A partially-withdrawn record can be narrowed again or closed.
            (WithdrawnPartial, WithdrawnPartial) | (WithdrawnPartial, WithdrawnFull) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentState::PendingApproval => "pending_approval",
            ConsentState::Granted => "granted",
            ConsentState::Verified => "verified",
            ConsentState::Rejected => "rejected",
            ConsentState::WithdrawnPartial => "withdrawn_partial",
            ConsentState::WithdrawnFull => "withdrawn_full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_approval" => Some(ConsentState::PendingApproval),
            "granted" => Some(ConsentState::Granted),
            "verified" => Some(ConsentState::Verified),
            "rejected" => Some(ConsentState::Rejected),
            "withdrawn_partial" => Some(ConsentState::WithdrawnPartial),
            "withdrawn_full" => Some(ConsentState::WithdrawnFull),
            _ => None,
        }
    }
}

/// Scope of a withdrawal call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalScope {
    Full,
    Partial,
}

/// One consent record per (story, purpose). At most one active record per
/// pair; history is retained, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: ConsentId,
    pub story_id: StoryId,
    pub storyteller_id: UserId,
    pub tenant_id: TenantId,
    pub method: ConsentMethod,
    pub purpose: String,
    /// Free-text classification, e.g. "public_sharing", "research".
    pub scope: String,
    pub expires_at: Option<i64>,
    pub restrictions: Vec<String>,
    pub witness_id: Option<UserId>,
    pub state: ConsentState,
    /// Derived once at grant time and stored, so historical consents keep
    /// the policy that applied when they were created.
    pub requires_elder_approval: bool,
    pub verified_by: Option<UserId>,
    pub verified_at: Option<i64>,
    pub verification_notes: Option<String>,
    pub withdrawn_at: Option<i64>,
    pub withdrawal_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Optimistic-concurrency column; bumped on every state change.
    pub version: u64,
}

impl ConsentRecord {
    /// Whether this record currently authorizes access.
    pub fn is_active(&self, now: i64) -> bool {
        if !self.state.is_active() {
            return false;
        }
        match self.expires_at {
            Some(at) => !is_expired(at, now),
            None => true,
        }
    }

    /// Whether this record has been fully withdrawn.
    pub fn is_withdrawn_full(&self) -> bool {
        self.state == ConsentState::WithdrawnFull
    }
}

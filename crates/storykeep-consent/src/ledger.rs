//! The consent ledger: grant, withdraw, verify, and status checks.
//!
//! The ledger is additive. Withdrawal moves an existing record into a
//! terminal (or narrowed) state and leaves it behind as history; a fresh
//! grant always creates a new record. Every state change lands in the audit
//! log, with before/after snapshots for compliance review.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storykeep_core::{
    now_millis, AuditAction, AuditActor, AuditEntityKind, AuditEntry, ConsentId, ConsentMethod,
    ConsentRecord, ConsentState, RoleDirectory, StoryDirectory, StoryId, UserId, WithdrawalScope,
};
use storykeep_store::{AuditSink, Store, StoreError, UpdateOutcome};

use crate::error::{ConsentError, Result};
use crate::policy;

/// Parameters for a grant call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    pub story_id: StoryId,
    pub storyteller_id: UserId,
    pub method: ConsentMethod,
    pub purpose: String,
    pub scope: String,
    /// Relative duration in milliseconds; persisted as an absolute deadline.
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub restrictions: Vec<String>,
    pub witness_id: Option<UserId>,
}

/// Parameters for a withdraw call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub story_id: StoryId,
    pub caller_id: UserId,
    pub scope: WithdrawalScope,
    pub reason: Option<String>,
    /// For partial withdrawal: restrictions to add to the record.
    #[serde(default)]
    pub restrictions: Vec<String>,
    /// Restrict the withdrawal to one purpose; None withdraws every
    /// active record on the story.
    pub purpose: Option<String>,
}

/// Current consent standing for a (story, purpose) pair, as consulted by
/// the access validators on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentStatus {
    pub consent_id: ConsentId,
    pub state: ConsentState,
    pub purpose: String,
    pub scope: String,
    pub expires_at: Option<i64>,
    pub restrictions: Vec<String>,
    pub requires_elder_approval: bool,
}

impl ConsentStatus {
    fn of(record: &ConsentRecord) -> Self {
        Self {
            consent_id: record.id.clone(),
            state: record.state,
            purpose: record.purpose.clone(),
            scope: record.scope.clone(),
            expires_at: record.expires_at,
            restrictions: record.restrictions.clone(),
            requires_elder_approval: record.requires_elder_approval,
        }
    }
}

/// The consent ledger service.
///
/// Generic over the store; collaborators come in as trait objects since
/// production wires them to live platform services.
pub struct ConsentLedger<S: Store> {
    store: Arc<S>,
    stories: Arc<dyn StoryDirectory>,
    roles: Arc<dyn RoleDirectory>,
    audit: AuditSink<S>,
}

impl<S: Store> ConsentLedger<S> {
    pub fn new(
        store: Arc<S>,
        stories: Arc<dyn StoryDirectory>,
        roles: Arc<dyn RoleDirectory>,
    ) -> Self {
        let audit = AuditSink::new(Arc::clone(&store));
        Self {
            store,
            stories,
            roles,
            audit,
        }
    }

    /// Record a new consent grant.
    ///
    /// The record lands in `Granted`, or in `PendingApproval` when the
    /// story's cultural classification requires elder review.
    pub async fn grant(&self, request: GrantRequest) -> Result<ConsentRecord> {
        let story = self
            .stories
            .get_story(&request.story_id)
            .await?
            .ok_or_else(|| ConsentError::StoryNotFound(request.story_id.to_string()))?;

        if !story.is_owned_by(&request.storyteller_id) {
            return Err(ConsentError::NotOwner);
        }

        let needs_review = policy::requires_elder_approval(&story);
        let now = now_millis();
        let record = ConsentRecord {
            id: ConsentId::fresh(),
            story_id: request.story_id,
            storyteller_id: request.storyteller_id,
            tenant_id: story.tenant_id,
            method: request.method,
            purpose: request.purpose,
            scope: request.scope,
            expires_at: request.expires_in.map(|d| now + d),
            restrictions: request.restrictions,
            witness_id: request.witness_id,
            state: if needs_review {
                ConsentState::PendingApproval
            } else {
                ConsentState::Granted
            },
            requires_elder_approval: needs_review,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            withdrawn_at: None,
            withdrawal_reason: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        self.store.insert_consent(&record).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => ConsentError::DuplicateActiveConsent,
            other => ConsentError::Store(other),
        })?;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(record.storyteller_id.clone()),
                    AuditEntityKind::Consent,
                    record.id.as_str(),
                    AuditAction::ConsentGranted,
                    now,
                )
                .with_story(record.story_id.clone())
                .with_states(None, snapshot(&record)),
            )
            .await;

        Ok(record)
    }

    /// Withdraw consent, fully or partially.
    ///
    /// Full withdrawal moves every matching active record to
    /// `WithdrawnFull`; the access validators then deny all derived tokens
    /// at their next use. Partial withdrawal adds restrictions while the
    /// record stays granted-equivalent. Returns the updated records.
    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<Vec<ConsentRecord>> {
        let story = self
            .stories
            .get_story(&request.story_id)
            .await?
            .ok_or_else(|| ConsentError::StoryNotFound(request.story_id.to_string()))?;

        if !story.is_owned_by(&request.caller_id) {
            return Err(ConsentError::NotOwner);
        }

        let target = match request.scope {
            WithdrawalScope::Full => ConsentState::WithdrawnFull,
            WithdrawalScope::Partial => ConsentState::WithdrawnPartial,
        };

        let candidates: Vec<ConsentRecord> = self
            .store
            .list_active_consents(&request.story_id)
            .await?
            .into_iter()
            .filter(|r| match &request.purpose {
                Some(p) => &r.purpose == p,
                None => true,
            })
            .filter(|r| r.state.can_become(target))
            .collect();

        if candidates.is_empty() {
            return Err(ConsentError::NoActiveConsent);
        }

        let now = now_millis();
        let mut updated = Vec::with_capacity(candidates.len());
        for record in candidates {
            let before = snapshot(&record);

            let mut next = record.clone();
            next.state = target;
            next.withdrawn_at = Some(now);
            next.withdrawal_reason = request.reason.clone();
            next.updated_at = now;
            if request.scope == WithdrawalScope::Partial {
                for restriction in &request.restrictions {
                    if !next.restrictions.contains(restriction) {
                        next.restrictions.push(restriction.clone());
                    }
                }
            }

            match self.store.update_consent(&next, record.version).await? {
                UpdateOutcome::Updated => {}
                UpdateOutcome::Stale => return Err(ConsentError::Stale),
            }
            next.version = record.version + 1;

            self.audit
                .record(
                    AuditEntry::granted(
                        AuditActor::User(request.caller_id.clone()),
                        AuditEntityKind::Consent,
                        next.id.as_str(),
                        AuditAction::ConsentWithdrawn,
                        now,
                    )
                    .with_story(next.story_id.clone())
                    .with_states(before, snapshot(&next)),
                )
                .await;

            updated.push(next);
        }

        Ok(updated)
    }

    /// Review a pending consent: approve into `Verified` or reject.
    ///
    /// Callable only by a principal the role directory marks as elder,
    /// admin, or cultural reviewer.
    pub async fn verify(
        &self,
        story_id: &StoryId,
        reviewer_id: &UserId,
        approved: bool,
        notes: Option<String>,
        purpose: Option<&str>,
    ) -> Result<ConsentRecord> {
        if !self.roles.caller_roles(reviewer_id).await?.can_review() {
            return Err(ConsentError::Forbidden);
        }

        let record = match purpose {
            Some(p) => self
                .store
                .get_active_consent(story_id, p)
                .await?
                .ok_or(ConsentError::NoActiveConsent)?,
            None => {
                let active = self.store.list_active_consents(story_id).await?;
                // Prefer the pending record, surface InvalidState otherwise.
                active
                    .iter()
                    .find(|r| r.state == ConsentState::PendingApproval)
                    .or_else(|| active.first())
                    .cloned()
                    .ok_or(ConsentError::NoActiveConsent)?
            }
        };

        if record.state != ConsentState::PendingApproval {
            return Err(ConsentError::InvalidState(format!(
                "consent is {}, not pending_approval",
                record.state.as_str()
            )));
        }

        let now = now_millis();
        let before = snapshot(&record);

        let mut next = record.clone();
        next.state = if approved {
            ConsentState::Verified
        } else {
            ConsentState::Rejected
        };
        next.verified_by = Some(reviewer_id.clone());
        next.verified_at = Some(now);
        next.verification_notes = notes;
        next.updated_at = now;

        match self.store.update_consent(&next, record.version).await? {
            UpdateOutcome::Updated => {}
            UpdateOutcome::Stale => return Err(ConsentError::Stale),
        }
        next.version = record.version + 1;

        self.audit
            .record(
                AuditEntry::granted(
                    AuditActor::User(reviewer_id.clone()),
                    AuditEntityKind::Consent,
                    next.id.as_str(),
                    if approved {
                        AuditAction::ConsentVerified
                    } else {
                        AuditAction::ConsentRejected
                    },
                    now,
                )
                .with_story(next.story_id.clone())
                .with_states(before, snapshot(&next)),
            )
            .await;

        Ok(next)
    }

    /// Current standing for (story, purpose). Pure read; keyed lookup,
    /// no audit entry.
    pub async fn check_status(
        &self,
        story_id: &StoryId,
        purpose: &str,
    ) -> Result<Option<ConsentStatus>> {
        Ok(self
            .store
            .get_active_consent(story_id, purpose)
            .await?
            .as_ref()
            .map(ConsentStatus::of))
    }

    /// Full consent history for a story, owner-gated.
    pub async fn list(&self, story_id: &StoryId, caller_id: &UserId) -> Result<Vec<ConsentRecord>> {
        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| ConsentError::StoryNotFound(story_id.to_string()))?;

        if !story.is_owned_by(caller_id) {
            return Err(ConsentError::NotOwner);
        }

        Ok(self.store.list_consents(story_id).await?)
    }
}

fn snapshot(record: &ConsentRecord) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

//! Approval workflow policy.
//!
//! A pure function of story metadata, evaluated once at grant time. The
//! result is stored on the consent record so the policy that applied when
//! consent was captured keeps governing it, even if the story's
//! classification changes later.

use storykeep_core::{CulturalLevel, StoryRef};

/// Whether a grant against this story must pass elder/cultural review
/// before it activates.
pub fn requires_elder_approval(story: &StoryRef) -> bool {
    story.requires_elder_review
        || matches!(
            story.cultural_level,
            CulturalLevel::Restricted | CulturalLevel::Sacred
        )
}

//! Response payload shaping.
//!
//! Whatever leaves the platform is cut down server-side to exactly what
//! the consent's permission flags allow. The client is never trusted to
//! respect an "excerpt only" flag it could ignore.

use serde::{Deserialize, Serialize};
use storykeep_core::{MediaRef, SharePermissions, StoryContent, StoryId};

/// Maximum excerpt length in characters.
pub const EXCERPT_CHARS: usize = 500;

/// The `sharing` block attached to every external read, stating what the
/// recipient may do with the payload and whom to attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingBlock {
    pub allowed_uses: Vec<String>,
    pub attribution: Option<String>,
}

/// A story payload after shaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapedStory {
    pub id: StoryId,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub media: Vec<MediaRef>,
    pub sharing: SharingBlock,
}

/// Truncate to [`EXCERPT_CHARS`] characters on a char boundary.
pub fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Shape a story per a syndication consent's permission flags.
pub fn shape_for_syndication(content: StoryContent, permissions: &SharePermissions) -> ShapedStory {
    let body = if permissions.full_content {
        content.content
    } else {
        excerpt(&content.content)
    };
    ShapedStory {
        id: content.id,
        title: content.title,
        content: body,
        summary: content.summary,
        media: if permissions.media { content.media } else { vec![] },
        sharing: SharingBlock {
            allowed_uses: permissions
                .allowed_uses()
                .into_iter()
                .map(String::from)
                .collect(),
            attribution: content.attribution_name,
        },
    }
}

/// Shape a story for the owner's own share link: full content, personal
/// use only.
pub fn shape_for_share(content: StoryContent) -> ShapedStory {
    ShapedStory {
        id: content.id,
        title: content.title,
        content: content.content,
        summary: content.summary,
        media: content.media,
        sharing: SharingBlock {
            allowed_uses: vec!["view".to_string()],
            attribution: content.attribution_name,
        },
    }
}

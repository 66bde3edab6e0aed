//! Test fixtures and helpers.
//!
//! In-memory implementations of the collaborator traits plus a seeded world
//! used by the integration scenarios: two storytellers, an elder reviewer,
//! a public story, a sacred story, and a registered external site.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use storykeep_core::{
    CallerRoles, ContentSource, CulturalLevel, DirectoryError, MediaRef, OrgId, RoleDirectory,
    SiteId, SiteRecord, SiteRegistry, StoryContent, StoryDirectory, StoryId, StoryRef,
    StoryStatus, TenantId, TokenHash, UserId,
};
use storykeep_store::MemoryStore;

/// In-memory story directory backed by a HashMap.
#[derive(Default)]
pub struct FakeStories {
    stories: RwLock<HashMap<StoryId, StoryRef>>,
}

impl FakeStories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, story: StoryRef) {
        self.stories
            .write()
            .expect("story map poisoned")
            .insert(story.id.clone(), story);
    }

    /// Flip a story's status, e.g. to Withdrawn mid-test.
    pub fn set_status(&self, id: &StoryId, status: StoryStatus) {
        if let Some(story) = self
            .stories
            .write()
            .expect("story map poisoned")
            .get_mut(id)
        {
            story.status = status;
        }
    }
}

#[async_trait]
impl StoryDirectory for FakeStories {
    async fn get_story(&self, id: &StoryId) -> Result<Option<StoryRef>, DirectoryError> {
        Ok(self
            .stories
            .read()
            .expect("story map poisoned")
            .get(id)
            .cloned())
    }
}

/// In-memory role directory.
#[derive(Default)]
pub struct FakeRoles {
    roles: RwLock<HashMap<UserId, CallerRoles>>,
}

impl FakeRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, user: UserId, roles: CallerRoles) {
        self.roles
            .write()
            .expect("role map poisoned")
            .insert(user, roles);
    }
}

#[async_trait]
impl RoleDirectory for FakeRoles {
    async fn caller_roles(&self, user: &UserId) -> Result<CallerRoles, DirectoryError> {
        Ok(self
            .roles
            .read()
            .expect("role map poisoned")
            .get(user)
            .copied()
            .unwrap_or_default())
    }
}

/// In-memory site registry. API keys are registered by hash, the way a real
/// registry would store them.
#[derive(Default)]
pub struct FakeSites {
    sites: RwLock<HashMap<SiteId, SiteRecord>>,
    keys: RwLock<HashMap<TokenHash, SiteId>>,
}

impl FakeSites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, site: SiteRecord) {
        self.sites
            .write()
            .expect("site map poisoned")
            .insert(site.id.clone(), site);
    }

    pub fn register_key(&self, api_key: &str, site: SiteId) {
        self.keys
            .write()
            .expect("key map poisoned")
            .insert(TokenHash::of(api_key), site);
    }
}

#[async_trait]
impl SiteRegistry for FakeSites {
    async fn resolve_api_key(
        &self,
        key_hash: &TokenHash,
    ) -> Result<Option<SiteId>, DirectoryError> {
        Ok(self
            .keys
            .read()
            .expect("key map poisoned")
            .get(key_hash)
            .cloned())
    }

    async fn get_site(&self, id: &SiteId) -> Result<Option<SiteRecord>, DirectoryError> {
        Ok(self
            .sites
            .read()
            .expect("site map poisoned")
            .get(id)
            .cloned())
    }
}

/// In-memory content source.
#[derive(Default)]
pub struct FakeContent {
    content: RwLock<HashMap<StoryId, StoryContent>>,
}

impl FakeContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, content: StoryContent) {
        self.content
            .write()
            .expect("content map poisoned")
            .insert(content.id.clone(), content);
    }
}

#[async_trait]
impl ContentSource for FakeContent {
    async fn get_content(&self, id: &StoryId) -> Result<Option<StoryContent>, DirectoryError> {
        Ok(self
            .content
            .read()
            .expect("content map poisoned")
            .get(id)
            .cloned())
    }
}

/// A fully seeded test world.
pub struct TestWorld {
    pub store: std::sync::Arc<MemoryStore>,
    pub stories: std::sync::Arc<FakeStories>,
    pub roles: std::sync::Arc<FakeRoles>,
    pub sites: std::sync::Arc<FakeSites>,
    pub content: std::sync::Arc<FakeContent>,
}

impl TestWorld {
    /// The seeded storyteller who owns both stories.
    pub fn teller() -> UserId {
        UserId::new("user-teller")
    }

    /// A second storyteller with no stories of their own.
    pub fn other_teller() -> UserId {
        UserId::new("user-other")
    }

    /// The seeded elder reviewer.
    pub fn elder() -> UserId {
        UserId::new("user-elder")
    }

    pub fn tenant() -> TenantId {
        TenantId::new("tenant-main")
    }

    pub fn org() -> OrgId {
        OrgId::new("org-river")
    }

    /// A published story at public cultural level.
    pub fn public_story() -> StoryId {
        StoryId::new("story-public")
    }

    /// A published story at sacred cultural level; elder review required.
    pub fn sacred_story() -> StoryId {
        StoryId::new("story-sacred")
    }

    pub fn site() -> SiteId {
        SiteId::new("site-gallery")
    }

    /// The plaintext API key registered for [`Self::site`].
    pub fn api_key() -> &'static str {
        "gallery-api-key-fixture"
    }

    /// Build a world with the standard seed data.
    pub fn new() -> Self {
        let world = Self {
            store: std::sync::Arc::new(MemoryStore::new()),
            stories: std::sync::Arc::new(FakeStories::new()),
            roles: std::sync::Arc::new(FakeRoles::new()),
            sites: std::sync::Arc::new(FakeSites::new()),
            content: std::sync::Arc::new(FakeContent::new()),
        };

        world.stories.put(StoryRef {
            id: Self::public_story(),
            storyteller_id: Self::teller(),
            tenant_id: Self::tenant(),
            organization_id: Some(Self::org()),
            cultural_level: CulturalLevel::Public,
            requires_elder_review: false,
            status: StoryStatus::Published,
        });
        world.stories.put(StoryRef {
            id: Self::sacred_story(),
            storyteller_id: Self::teller(),
            tenant_id: Self::tenant(),
            organization_id: Some(Self::org()),
            cultural_level: CulturalLevel::Sacred,
            requires_elder_review: true,
            status: StoryStatus::Published,
        });

        world.roles.put(
            Self::elder(),
            CallerRoles {
                is_elder: true,
                ..Default::default()
            },
        );

        world.sites.put(SiteRecord {
            id: Self::site(),
            name: "River Gallery".to_string(),
            allowed_domains: vec!["gallery.example.org".to_string()],
            organization_id: Some(Self::org()),
            whitelisted: false,
        });
        world.sites.register_key(Self::api_key(), Self::site());

        world.content.put(StoryContent {
            id: Self::public_story(),
            title: "The River Crossing".to_string(),
            content: "Long before the bridge was built, the crossing belonged to the ferryman. "
                .repeat(12),
            summary: Some("A story about the old river crossing.".to_string()),
            media: vec![MediaRef {
                id: "m1".to_string(),
                kind: "image".to_string(),
                url: "https://cdn.example.org/m1.jpg".to_string(),
            }],
            attribution_name: Some("Tellers of the River".to_string()),
        });
        world.content.put(StoryContent {
            id: Self::sacred_story(),
            title: "The Naming Song".to_string(),
            content: "This story is told only at the naming ceremony. ".repeat(12),
            summary: None,
            media: vec![],
            attribution_name: Some("Tellers of the River".to_string()),
        });

        world
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

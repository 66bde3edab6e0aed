//! Standalone consent server over a SQLite store.
//!
//! Stories, identities, sites, and content normally come from the rest of
//! the platform. This binary loads them from a JSON seed file instead, so
//! the consent subsystem can run on its own for local development and
//! integration work.
//!
//! Environment:
//! - `STORYKEEP_HTTP_BIND`      bind address (default `127.0.0.1:8080`)
//! - `STORYKEEP_DB`             SQLite path (default `storykeep.db`)
//! - `STORYKEEP_SEED`           JSON seed file (optional)
//! - `STORYKEEP_SHARE_BASE_URL` base URL for minted share links

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use storykeep::core::{
    CallerRoles, ContentSource, DirectoryError, RoleDirectory, SiteId, SiteRecord, SiteRegistry,
    StoryContent, StoryDirectory, StoryId, StoryRef, TokenHash, UserId,
};
use storykeep::{Directories, Platform, PlatformConfig, SqliteStore};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Seed {
    #[serde(default)]
    stories: Vec<StoryRef>,
    #[serde(default)]
    roles: HashMap<UserId, CallerRoles>,
    #[serde(default)]
    sites: Vec<SeedSite>,
    #[serde(default)]
    content: Vec<StoryContent>,
}

#[derive(Debug, Deserialize)]
struct SeedSite {
    #[serde(flatten)]
    record: SiteRecord,
    /// Plaintext API key; only its hash is kept in memory.
    api_key: String,
}

/// All four collaborator directories, backed by the seed file.
struct SeedDirectory {
    stories: HashMap<StoryId, StoryRef>,
    roles: HashMap<UserId, CallerRoles>,
    sites: HashMap<SiteId, SiteRecord>,
    keys: HashMap<TokenHash, SiteId>,
    content: HashMap<StoryId, StoryContent>,
}

impl From<Seed> for SeedDirectory {
    fn from(seed: Seed) -> Self {
        let mut sites = HashMap::new();
        let mut keys = HashMap::new();
        for site in seed.sites {
            keys.insert(TokenHash::of(&site.api_key), site.record.id.clone());
            sites.insert(site.record.id.clone(), site.record);
        }
        Self {
            stories: seed.stories.into_iter().map(|s| (s.id.clone(), s)).collect(),
            roles: seed.roles,
            sites,
            keys,
            content: seed.content.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }
}

#[async_trait]
impl StoryDirectory for SeedDirectory {
    async fn get_story(&self, id: &StoryId) -> Result<Option<StoryRef>, DirectoryError> {
        Ok(self.stories.get(id).cloned())
    }
}

#[async_trait]
impl RoleDirectory for SeedDirectory {
    async fn caller_roles(&self, user: &UserId) -> Result<CallerRoles, DirectoryError> {
        Ok(self.roles.get(user).copied().unwrap_or_default())
    }
}

#[async_trait]
impl SiteRegistry for SeedDirectory {
    async fn resolve_api_key(
        &self,
        key_hash: &TokenHash,
    ) -> Result<Option<SiteId>, DirectoryError> {
        Ok(self.keys.get(key_hash).cloned())
    }

    async fn get_site(&self, id: &SiteId) -> Result<Option<SiteRecord>, DirectoryError> {
        Ok(self.sites.get(id).cloned())
    }
}

#[async_trait]
impl ContentSource for SeedDirectory {
    async fn get_content(&self, id: &StoryId) -> Result<Option<StoryContent>, DirectoryError> {
        Ok(self.content.get(id).cloned())
    }
}

fn load_seed() -> anyhow::Result<Seed> {
    match env::var("STORYKEEP_SEED") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let seed: Seed = serde_json::from_str(&raw)?;
            tracing::info!(
                path,
                stories = seed.stories.len(),
                sites = seed.sites.len(),
                "loaded directory seed"
            );
            Ok(seed)
        }
        Err(_) => {
            tracing::warn!("STORYKEEP_SEED not set, directories are empty");
            Ok(Seed::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let bind = env::var("STORYKEEP_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;
    let db = env::var("STORYKEEP_DB").unwrap_or_else(|_| "storykeep.db".to_string());

    let mut config = PlatformConfig::default();
    if let Ok(url) = env::var("STORYKEEP_SHARE_BASE_URL") {
        config.share_base_url = url;
    }

    let directory = Arc::new(SeedDirectory::from(load_seed()?));
    let directories = Directories {
        stories: directory.clone(),
        roles: directory.clone(),
        sites: directory.clone(),
        content: directory,
    };

    let store = Arc::new(SqliteStore::open(&db)?);
    let platform = Arc::new(Platform::new(store, directories, config));

    tracing::info!(%addr, db, "storykeep server starting");
    storykeep_api::serve(platform, addr).await?;
    Ok(())
}

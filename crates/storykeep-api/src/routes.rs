//! Route handlers.
//!
//! Request bodies are strict: unknown fields are rejected so that a
//! misspelled restriction or scope cannot silently widen a grant.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use storykeep::core::{
    ConsentMethod, RequestMetadata, SharePermissions, SiteId, StoryId, SyndicationId, TokenId,
    UserId, WithdrawalScope,
};
use storykeep::{
    CreateShareLink, GrantRequest, Platform, Store, SyndicationRequest, WithdrawRequest,
};

use crate::error::ApiError;

type App<S> = State<Arc<Platform<S>>>;
type ApiResult<T> = Result<T, ApiError>;

fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestMetadata {
        origin: text(header::ORIGIN),
        user_agent: text(header::USER_AGENT),
    }
}

fn bearer_token(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing or malformed Authorization header"))
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Consent ledger ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantBody {
    pub story_id: StoryId,
    pub storyteller_id: UserId,
    pub method: ConsentMethod,
    pub purpose: String,
    pub scope: String,
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub restrictions: Vec<String>,
    pub witness_id: Option<UserId>,
}

pub async fn grant_consent<S: Store>(
    State(platform): App<S>,
    Json(body): Json<GrantBody>,
) -> ApiResult<impl IntoResponse> {
    let record = platform
        .grant_consent(GrantRequest {
            story_id: body.story_id,
            storyteller_id: body.storyteller_id,
            method: body.method,
            purpose: body.purpose,
            scope: body.scope,
            expires_in: body.expires_in,
            restrictions: body.restrictions,
            witness_id: body.witness_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithdrawBody {
    pub story_id: StoryId,
    pub caller_id: UserId,
    pub scope: WithdrawalScope,
    pub reason: Option<String>,
    #[serde(default)]
    pub restrictions: Vec<String>,
    pub purpose: Option<String>,
}

pub async fn withdraw_consent<S: Store>(
    State(platform): App<S>,
    Json(body): Json<WithdrawBody>,
) -> ApiResult<impl IntoResponse> {
    let records = platform
        .withdraw_consent(WithdrawRequest {
            story_id: body.story_id,
            caller_id: body.caller_id,
            scope: body.scope,
            reason: body.reason,
            restrictions: body.restrictions,
            purpose: body.purpose,
        })
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyBody {
    pub story_id: StoryId,
    pub reviewer_id: UserId,
    pub approved: bool,
    pub notes: Option<String>,
    pub purpose: Option<String>,
}

pub async fn verify_consent<S: Store>(
    State(platform): App<S>,
    Json(body): Json<VerifyBody>,
) -> ApiResult<impl IntoResponse> {
    let record = platform
        .verify_consent(
            &body.story_id,
            &body.reviewer_id,
            body.approved,
            body.notes,
            body.purpose.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub purpose: String,
}

pub async fn consent_status<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = platform.consent_status(&story_id, &query.purpose).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct CallerQuery {
    pub caller_id: UserId,
}

pub async fn consent_history<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Query(query): Query<CallerQuery>,
) -> ApiResult<impl IntoResponse> {
    let records = platform.consent_history(&story_id, &query.caller_id).await?;
    Ok(Json(records))
}

// ── Share links ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareLinkBody {
    pub caller_id: UserId,
    pub expires_in: i64,
    pub max_views: Option<u32>,
    pub purpose: String,
    #[serde(default)]
    pub shared_to: Vec<String>,
    pub watermark: Option<String>,
}

pub async fn create_share_link<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Json(body): Json<ShareLinkBody>,
) -> ApiResult<impl IntoResponse> {
    let link = platform
        .create_share_link(CreateShareLink {
            story_id,
            caller_id: body.caller_id,
            expires_in: body.expires_in,
            max_views: body.max_views,
            purpose: body.purpose,
            shared_to: body.shared_to,
            watermark: body.watermark,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn list_share_links<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Query(query): Query<CallerQuery>,
) -> ApiResult<impl IntoResponse> {
    let links = platform
        .list_share_links(&story_id, &query.caller_id)
        .await?;
    Ok(Json(links))
}

#[derive(Debug, Deserialize)]
pub struct RevokeLinkQuery {
    pub token: TokenId,
    pub caller_id: UserId,
}

pub async fn revoke_share_link<S: Store>(
    State(platform): App<S>,
    Path(_story_id): Path<StoryId>,
    Query(query): Query<RevokeLinkQuery>,
) -> ApiResult<impl IntoResponse> {
    platform
        .revoke_share_link(&query.token, &query.caller_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Syndication ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyndicationBody {
    pub story_id: StoryId,
    pub site_id: SiteId,
    pub requested_by: UserId,
    pub permissions: SharePermissions,
    pub expires_in: Option<i64>,
}

pub async fn request_syndication<S: Store>(
    State(platform): App<S>,
    Json(body): Json<SyndicationBody>,
) -> ApiResult<impl IntoResponse> {
    let consent = platform
        .request_syndication(SyndicationRequest {
            story_id: body.story_id,
            site_id: body.site_id,
            requested_by: body.requested_by,
            permissions: body.permissions,
            expires_in: body.expires_in,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(consent)))
}

#[derive(Debug, Deserialize)]
pub struct SyndicationQuery {
    pub story_id: StoryId,
    pub site_id: SiteId,
}

pub async fn get_syndication<S: Store>(
    State(platform): App<S>,
    Query(query): Query<SyndicationQuery>,
) -> ApiResult<impl IntoResponse> {
    let consent = platform
        .syndication_for(&query.story_id, &query.site_id)
        .await?;
    Ok(Json(consent))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewBody {
    pub reviewer_id: UserId,
    pub approved: bool,
    pub reason: Option<String>,
}

pub async fn review_syndication<S: Store>(
    State(platform): App<S>,
    Path(id): Path<SyndicationId>,
    Json(body): Json<ReviewBody>,
) -> ApiResult<impl IntoResponse> {
    let consent = platform
        .review_syndication(&id, &body.reviewer_id, body.approved, body.reason)
        .await?;
    Ok(Json(consent))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevokeBody {
    pub caller_id: UserId,
    pub reason: Option<String>,
}

pub async fn revoke_syndication<S: Store>(
    State(platform): App<S>,
    Path(id): Path<SyndicationId>,
    Json(body): Json<RevokeBody>,
) -> ApiResult<impl IntoResponse> {
    let consent = platform
        .revoke_syndication(&id, &body.caller_id, body.reason)
        .await?;
    Ok(Json(consent))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSyndicationBody {
    pub caller_id: UserId,
    pub permissions: Option<SharePermissions>,
    pub expires_in: Option<i64>,
}

pub async fn update_syndication<S: Store>(
    State(platform): App<S>,
    Path(id): Path<SyndicationId>,
    Json(body): Json<UpdateSyndicationBody>,
) -> ApiResult<impl IntoResponse> {
    let consent = platform
        .update_syndication(&id, &body.caller_id, body.permissions, body.expires_in)
        .await?;
    Ok(Json(consent))
}

pub async fn list_story_syndications<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Query(query): Query<CallerQuery>,
) -> ApiResult<impl IntoResponse> {
    let consents = platform
        .syndications_for_story(&story_id, &query.caller_id)
        .await?;
    Ok(Json(consents))
}

pub async fn issue_embed_token<S: Store>(
    State(platform): App<S>,
    Path(id): Path<SyndicationId>,
) -> ApiResult<impl IntoResponse> {
    let token = platform.issue_embed_token(&id).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

pub async fn revoke_embed_token<S: Store>(
    State(platform): App<S>,
    Path(id): Path<TokenId>,
    Query(query): Query<CallerQuery>,
) -> ApiResult<impl IntoResponse> {
    platform.revoke_embed_token(&id, &query.caller_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_embed_tokens<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Query(query): Query<CallerQuery>,
) -> ApiResult<impl IntoResponse> {
    let tokens = platform
        .list_embed_tokens(&story_id, &query.caller_id)
        .await?;
    Ok(Json(tokens))
}

pub async fn revoke_story_embeds<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    Query(query): Query<CallerQuery>,
) -> ApiResult<impl IntoResponse> {
    let revoked = platform
        .revoke_story_embeds(&story_id, &query.caller_id)
        .await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

// ── Validated reads ─────────────────────────────────────────────────────

pub async fn share_view<S: Store>(
    State(platform): App<S>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let view = platform
        .validate_share_token(&token, request_metadata(&headers))
        .await?;
    // Shared payloads must never land in an intermediary cache.
    Ok(([(header::CACHE_CONTROL, "private, no-store")], Json(view)))
}

pub async fn api_story_read<S: Store>(
    State(platform): App<S>,
    Path(story_id): Path<StoryId>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let key = bearer_token(&headers)?;
    let view = platform
        .validate_api_access(key, &story_id, request_metadata(&headers))
        .await?;
    Ok(([(header::CACHE_CONTROL, "private")], Json(view)))
}

pub async fn embed_view<S: Store>(
    State(platform): App<S>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let view = platform
        .validate_embed_token(&token, origin.as_deref(), request_metadata(&headers))
        .await?;
    Ok(([(header::CACHE_CONTROL, "private, no-store")], Json(view)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storykeep::{Directories, MemoryStore, PlatformConfig};
    use storykeep_testkit::TestWorld;

    fn platform(world: &TestWorld) -> Arc<Platform<MemoryStore>> {
        Arc::new(Platform::new(
            Arc::clone(&world.store),
            Directories {
                stories: world.stories.clone(),
                roles: world.roles.clone(),
                sites: world.sites.clone(),
                content: world.content.clone(),
            },
            PlatformConfig::default(),
        ))
    }

    #[test]
    fn test_grant_body_rejects_unknown_fields() {
        let err = serde_json::from_str::<GrantBody>(
            r#"{
                "story_id": "story-1",
                "storyteller_id": "user-1",
                "method": "digital",
                "purpose": "public_sharing",
                "scope": "public_sharing",
                "extra_field": true
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("extra_field"));
    }

    #[tokio::test]
    async fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }

    #[tokio::test]
    async fn test_grant_handler_creates_record() {
        let world = TestWorld::new();
        let platform = platform(&world);

        let body = GrantBody {
            story_id: TestWorld::public_story(),
            storyteller_id: TestWorld::teller(),
            method: ConsentMethod::Digital,
            purpose: "public_sharing".to_string(),
            scope: "public_sharing".to_string(),
            expires_in: None,
            restrictions: vec![],
            witness_id: None,
        };
        grant_consent(State(Arc::clone(&platform)), Json(body))
            .await
            .unwrap();

        let status = platform
            .consent_status(&TestWorld::public_story(), "public_sharing")
            .await
            .unwrap();
        assert!(status.is_some());
    }

    #[tokio::test]
    async fn test_api_read_requires_bearer() {
        let world = TestWorld::new();
        let platform = platform(&world);

        let err = api_story_read(
            State(platform),
            Path(TestWorld::public_story()),
            HeaderMap::new(),
        )
        .await
        .map(|_| ())
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}

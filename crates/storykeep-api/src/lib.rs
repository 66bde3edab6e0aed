//! # storykeep-api
//!
//! ## Overview
//!
//! HTTP surface over the [`storykeep::Platform`]. The router is a
//! library so the host application, which owns the story, role, site,
//! and content directories, can mount it alongside its other routes.
//!
//! Consent mutations take the acting user in the request body; the
//! validated read paths authenticate with what they carry (a share
//! token in the path, an API key as a bearer header, an embed token
//! plus the request origin).
//!
//! ## Key Types
//!
//! - [`router`]: builds the full route table over a platform.
//! - [`serve`]: binds a listener and runs the router.
//! - [`error::ApiError`]: platform-error to status-code mapping.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use storykeep::{Platform, Store};

pub mod error;
pub mod routes;

pub use error::{ApiError, ErrorBody};

/// Build the route table over a platform instance.
pub fn router<S: Store + 'static>(platform: Arc<Platform<S>>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        // Consent ledger
        .route(
            "/consent",
            post(routes::grant_consent::<S>)
                .delete(routes::withdraw_consent::<S>)
                .patch(routes::verify_consent::<S>),
        )
        .route("/stories/:id/consent", get(routes::consent_status::<S>))
        .route(
            "/stories/:id/consent/history",
            get(routes::consent_history::<S>),
        )
        // Share links
        .route(
            "/stories/:id/share-link",
            post(routes::create_share_link::<S>)
                .get(routes::list_share_links::<S>)
                .delete(routes::revoke_share_link::<S>),
        )
        // Syndication
        .route(
            "/syndication/consent",
            post(routes::request_syndication::<S>).get(routes::get_syndication::<S>),
        )
        .route(
            "/syndication/consent/:id",
            patch(routes::update_syndication::<S>),
        )
        .route(
            "/syndication/consent/:id/review",
            post(routes::review_syndication::<S>),
        )
        .route(
            "/syndication/consent/:id/revoke",
            post(routes::revoke_syndication::<S>),
        )
        .route(
            "/syndication/consent/:id/embed-token",
            post(routes::issue_embed_token::<S>),
        )
        .route(
            "/embed-tokens/:id",
            delete(routes::revoke_embed_token::<S>),
        )
        .route(
            "/stories/:id/embed-tokens",
            get(routes::list_embed_tokens::<S>).delete(routes::revoke_story_embeds::<S>),
        )
        .route(
            "/stories/:id/syndication",
            get(routes::list_story_syndications::<S>),
        )
        // Validated reads
        .route("/share/:token", get(routes::share_view::<S>))
        .route("/v1/stories/:id", get(routes::api_story_read::<S>))
        .route("/embed/:token", get(routes::embed_view::<S>))
        .with_state(platform)
}

/// Bind and serve until the socket closes.
pub async fn serve<S: Store + 'static>(
    platform: Arc<Platform<S>>,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let app = router(platform);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "storykeep api listening");
    axum::serve(listener, app).await
}

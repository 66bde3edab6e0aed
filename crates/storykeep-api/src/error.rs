//! Mapping from platform errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use storykeep::{AccessError, ConsentError, PlatformError, TokenError};

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// An error ready to be serialized as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_key", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        (
            self.status,
            Json(ErrorBody {
                error: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            PlatformError::Consent(e) => consent_status(e),
            PlatformError::Token(e) => token_status(e),
            PlatformError::Access(e) => access_status(e),
            PlatformError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, code, message)
    }
}

fn consent_status(err: &ConsentError) -> (StatusCode, &'static str) {
    match err {
        ConsentError::StoryNotFound(_) => (StatusCode::NOT_FOUND, "story_not_found"),
        ConsentError::NoActiveConsent => (StatusCode::NOT_FOUND, "no_active_consent"),
        ConsentError::NotOwner | ConsentError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        ConsentError::DuplicateActiveConsent => {
            (StatusCode::CONFLICT, "duplicate_active_consent")
        }
        ConsentError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        ConsentError::Stale => (StatusCode::CONFLICT, "stale"),
        ConsentError::Store(_) | ConsentError::Directory(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    }
}

fn token_status(err: &TokenError) -> (StatusCode, &'static str) {
    match err {
        TokenError::StoryNotFound(_) => (StatusCode::NOT_FOUND, "story_not_found"),
        TokenError::SiteNotFound(_) => (StatusCode::NOT_FOUND, "site_not_found"),
        TokenError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        TokenError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        TokenError::OrganizationBoundary => {
            (StatusCode::FORBIDDEN, "organization_boundary")
        }
        TokenError::WithdrawnStoryConsent => (StatusCode::CONFLICT, "consent_withdrawn"),
        TokenError::NoActiveConsent => (StatusCode::CONFLICT, "no_active_consent"),
        TokenError::DuplicateActiveConsent => {
            (StatusCode::CONFLICT, "duplicate_active_consent")
        }
        TokenError::ConsentNotApproved => (StatusCode::CONFLICT, "consent_not_approved"),
        TokenError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
        TokenError::Stale => (StatusCode::CONFLICT, "stale"),
        TokenError::Store(_) | TokenError::Directory(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    }
}

fn access_status(err: &AccessError) -> (StatusCode, &'static str) {
    let status = match err {
        AccessError::NotFound => StatusCode::NOT_FOUND,
        AccessError::InvalidKey => StatusCode::UNAUTHORIZED,
        AccessError::ConsentNotGranted | AccessError::DomainNotAllowed => StatusCode::FORBIDDEN,
        // Gone: the resource existed and is deliberately no longer served.
        AccessError::Expired
        | AccessError::Revoked
        | AccessError::ViewLimitReached
        | AccessError::ConsentWithdrawn
        | AccessError::ConsentExpired => StatusCode::GONE,
        AccessError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AccessError::Store(_) | AccessError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.reason())
}

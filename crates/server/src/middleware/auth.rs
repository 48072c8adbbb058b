use crate::api::ApiError;
use crate::config::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use openpact_core::auth::AccessCheck;
use std::sync::Arc;

/// Cookie carrying the access token for browser clients
pub const ACCESS_COOKIE: &str = "openpact_access";

/// The caller of a protected route, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub session: String,
}

/// Extract the access token from `Authorization: Bearer` or the access cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == ACCESS_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Reject requests without a valid access token. Expiry is reported
/// distinctly so clients know to refresh.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers()).ok_or_else(ApiError::invalid_token)?;

    match state.authority.validate_access(&token) {
        AccessCheck::Valid(claims) => {
            req.extensions_mut().insert(AuthUser {
                username: claims.sub,
                session: claims.sid,
            });
            Ok(next.run(req).await)
        }
        AccessCheck::Expired => {
            tracing::debug!(path = %req.uri().path(), "Access token expired");
            Err(ApiError::token_expired())
        }
        AccessCheck::Invalid => {
            tracing::debug!(path = %req.uri().path(), "Invalid access token");
            Err(ApiError::invalid_token())
        }
    }
}

// Refresh-exempt routes: session status, setup, login, refresh and logout

use super::{ApiError, ApiResult};
use crate::config::AppState;
use crate::middleware::auth::{extract_token, ACCESS_COOKIE};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use openpact_core::auth::{AccessCheck, Credentials, TokenPair};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub setup_required: bool,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Report whether setup is pending and whether the caller is signed in
pub async fn session_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<SessionStatus> {
    let username = extract_token(&headers).and_then(|token| match state.authority.validate_access(&token) {
        AccessCheck::Valid(claims) => Some(claims.sub),
        AccessCheck::Expired | AccessCheck::Invalid => None,
    });

    Json(SessionStatus {
        setup_required: state.authority.setup_required(),
        authenticated: username.is_some(),
        username,
    })
}

/// First-run admin creation
pub async fn setup(State(state): State<Arc<AppState>>, Json(credentials): Json<Credentials>) -> ApiResult<Response> {
    let pair = state.authority.setup(&credentials)?;
    tracing::info!("Admin account '{}' created", credentials.username.trim());
    Ok(with_access_cookie(pair))
}

pub async fn login(State(state): State<Arc<AppState>>, Json(credentials): Json<Credentials>) -> ApiResult<Response> {
    let pair = state.authority.issue_initial_tokens(&credentials)?;
    tracing::info!("Admin '{}' logged in", credentials.username.trim());
    Ok(with_access_cookie(pair))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Response> {
    let pair = state.authority.refresh(&req.refresh_token).map_err(|e| {
        tracing::warn!("Refresh failed: {}", e);
        ApiError::from(e)
    })?;
    Ok(with_access_cookie(pair))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Close the session named by the body's refresh token or the caller's
/// access token. Always clears the access cookie.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let token = req.refresh_token.or_else(|| extract_token(&headers));

    let logged_out = token.map(|t| state.authority.logout(&t)).unwrap_or(false);
    if logged_out {
        tracing::info!("Session closed");
    }

    let mut response = Json(LogoutResponse { logged_out }).into_response();
    let cleared = format!("{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0", ACCESS_COOKIE);
    if let Ok(value) = HeaderValue::from_str(&cleared) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// Token pair body plus the access cookie for browser clients
fn with_access_cookie(pair: TokenPair) -> Response {
    let max_age = (pair.access_expiry - chrono::Utc::now()).num_seconds().max(0);
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        ACCESS_COOKIE, pair.access_token, max_age
    );

    let mut response = Json(pair).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => tracing::warn!("Could not set access cookie: {}", e),
    }
    response
}

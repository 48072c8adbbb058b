//! Session endpoints: first-run setup, login, logout and status.
//!
//! These calls are exempt from automatic refresh. A failing login or
//! logout is reported as-is and never triggers a refresh.

use crate::client::OpenPactClient;
use crate::error::OpenPactResult;
use openpact_core::auth::TokenPair;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Session API for obtaining and discarding tokens.
pub struct SessionApi<'a> {
    client: &'a OpenPactClient,
}

impl<'a> SessionApi<'a> {
    pub(crate) fn new(client: &'a OpenPactClient) -> Self {
        Self { client }
    }

    /// Whether setup is pending and whether the installed access token is
    /// accepted.
    pub async fn status(&self) -> OpenPactResult<SessionStatus> {
        let token = self.client.tokens().map(|t| t.access_token);
        self.client.http.get("/session", token.as_deref()).await
    }

    /// Create the admin account on a fresh install and sign in.
    pub async fn setup(&self, username: &str, password: &str) -> OpenPactResult<TokenPair> {
        self.authenticate("/auth/setup", username, password).await
    }

    /// Sign in with admin credentials.
    pub async fn login(&self, username: &str, password: &str) -> OpenPactResult<TokenPair> {
        self.authenticate("/auth/login", username, password).await
    }

    /// Close the session on the gateway and drop local tokens. Local tokens
    /// are dropped even when the gateway call fails.
    pub async fn logout(&self) -> OpenPactResult<bool> {
        let Some(tokens) = self.client.tokens() else {
            return Ok(false);
        };
        self.client.auth.clear();

        let request = LogoutRequest {
            refresh_token: tokens.refresh_token,
        };
        let response: LogoutResponse = self
            .client
            .http
            .post("/auth/logout", Some(&tokens.access_token), &request)
            .await?;
        Ok(response.logged_out)
    }

    async fn authenticate(&self, path: &str, username: &str, password: &str) -> OpenPactResult<TokenPair> {
        let request = CredentialsRequest { username, password };
        let tokens: TokenPair = self.client.http.post(path, None, &request).await?;
        debug!(path, "Signed in");
        self.client.set_tokens(tokens.clone());
        Ok(tokens)
    }
}

#[derive(Serialize)]
struct CredentialsRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutResponse {
    logged_out: bool,
}

/// Session status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub setup_required: bool,
    pub authenticated: bool,
    #[serde(default)]
    pub username: Option<String>,
}

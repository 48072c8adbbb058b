//! Refresh calls against the gateway's `/auth/refresh` endpoint.

use crate::error::OpenPactError;
use crate::transport::HttpTransport;
use openpact_core::auth::{RefreshFailed, Refresher, TokenPair};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Performs the refresh call for an [`AuthSession`](openpact_core::auth::AuthSession).
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    http: HttpTransport,
}

impl HttpRefresher {
    pub(crate) fn new(http: HttpTransport) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshFailed> {
        let request = RefreshRequest { refresh_token };
        self.http
            .post("/auth/refresh", None, &request)
            .await
            .map_err(refresh_failure)
    }
}

fn refresh_failure(err: OpenPactError) -> RefreshFailed {
    match err {
        OpenPactError::Api { status: 401, details, error } => {
            if details.as_deref().is_some_and(|d| d.contains("expired")) {
                RefreshFailed::Expired
            } else {
                RefreshFailed::Rejected(details.unwrap_or(error))
            }
        }
        OpenPactError::Api { status, error, .. } if (400..500).contains(&status) => RefreshFailed::Rejected(error),
        other => RefreshFailed::Transport(other.to_string()),
    }
}

use crate::config::AppState;
use crate::middleware::auth::require_auth;
use anyhow::Result;
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use openpact_core::auth::{AuthError, RefreshFailed};
use openpact_core::secrets::SecretStoreError;
use openpact_mcp::ToolError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod auth;
mod handlers;

/// Start the API server and run until a termination signal
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let protected = Router::new()
        .route("/api/config", get(handlers::get_config))
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/secrets", get(handlers::list_secrets))
        .route(
            "/api/secrets/{name}",
            put(handlers::put_secret).delete(handlers::delete_secret),
        )
        .route("/api/scripts", get(handlers::list_scripts))
        .route("/api/scripts/{*name}", get(handlers::get_script))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        // Refresh-exempt routes
        .route("/api/health", get(health_check))
        .route("/session", get(auth::session_status))
        .route("/auth/setup", post(auth::setup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .merge(protected)
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "openpact",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Error type for API handlers: a status plus a machine-readable code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &str) -> Self {
        Self {
            status,
            body: ErrorResponse::new(error),
        }
    }

    pub fn with_details(status: StatusCode, error: &str, details: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::with_details(error, details),
        }
    }

    pub fn token_expired() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "token_expired")
    }

    pub fn invalid_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_token")
    }

    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::with_details(StatusCode::BAD_REQUEST, "bad_request", details)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("Request failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::new(StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::SetupRequired => Self::new(StatusCode::CONFLICT, "setup_required"),
            AuthError::AlreadyConfigured => Self::new(StatusCode::CONFLICT, "already_configured"),
            AuthError::InvalidSetup(details) => {
                Self::with_details(StatusCode::BAD_REQUEST, "invalid_setup", details)
            }
            err @ (AuthError::Storage(_) | AuthError::Token(_)) => Self::internal(err),
        }
    }
}

impl From<RefreshFailed> for ApiError {
    fn from(err: RefreshFailed) -> Self {
        Self::with_details(StatusCode::UNAUTHORIZED, "refresh_failed", err.to_string())
    }
}

impl From<SecretStoreError> for ApiError {
    fn from(err: SecretStoreError) -> Self {
        match err {
            SecretStoreError::NotFound(name) => {
                Self::with_details(StatusCode::NOT_FOUND, "not_found", format!("secret {}", name))
            }
            SecretStoreError::InvalidName(details) => {
                Self::with_details(StatusCode::BAD_REQUEST, "invalid_name", details)
            }
            err @ SecretStoreError::Backend(_) => Self::internal(err),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => Self::with_details(StatusCode::NOT_FOUND, "not_found", name),
            ToolError::Denied(details) => Self::with_details(StatusCode::FORBIDDEN, "forbidden", details),
            ToolError::InvalidArguments(details) => Self::bad_request(details),
            err => Self::internal(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

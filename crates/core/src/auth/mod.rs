// Admin authentication: accounts, token issuance and client-side refresh

pub mod credentials;
pub mod refresh;
pub mod session;
pub mod token;

pub use credentials::{AdminAccount, AdminStore, Credentials, MIN_PASSWORD_LEN};
pub use refresh::{RefreshCoordinator, RefreshFailed};
pub use session::{
    is_refresh_exempt, AuthSession, ExpirySignal, Refresher, SessionError, DEFAULT_MAX_REFRESH_RETRIES,
};
pub use token::{AccessCheck, Claims, TokenAuthority, TokenKind, TokenPair};

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("initial setup has not been completed")]
    SetupRequired,

    #[error("an admin account is already configured")]
    AlreadyConfigured,

    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    #[error("auth storage error: {0}")]
    Storage(String),

    #[error("token error: {0}")]
    Token(String),
}

// Token authority: issues, validates and rotates access/refresh credentials

use super::credentials::{AdminAccount, AdminStore, Credentials};
use super::refresh::RefreshFailed;
use super::AuthError;
use crate::config::ServerConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SIGNING_KEY_LEN: usize = 32;

/// Which purpose a token was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account the token was issued to
    pub sub: String,
    /// Session the token belongs to
    pub sid: String,
    pub kind: TokenKind,
    /// Unique token id
    pub jti: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

impl Claims {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Access + refresh credential pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiry: DateTime<Utc>,
    pub refresh_expiry: DateTime<Utc>,
}

impl TokenPair {
    /// Build a pair, enforcing that access expires before refresh
    pub fn new(
        access_token: String,
        refresh_token: String,
        access_expiry: DateTime<Utc>,
        refresh_expiry: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        if access_expiry >= refresh_expiry {
            return Err(AuthError::Token(
                "access expiry must precede refresh expiry".to_string(),
            ));
        }
        Ok(Self {
            access_token,
            refresh_token,
            access_expiry,
            refresh_expiry,
        })
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish()
    }
}

/// Result of validating an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessCheck {
    Valid(Claims),
    Expired,
    Invalid,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    username: String,
    /// The only refresh token id accepted for this session
    refresh_jti: String,
    refresh_expiry: DateTime<Utc>,
}

/// Issues and validates credentials for the admin gateway
pub struct TokenAuthority {
    key: Vec<u8>,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    admin: AdminStore,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl TokenAuthority {
    /// Create an authority with an explicit signing key
    pub fn new(
        key: Vec<u8>,
        access_ttl: Duration,
        refresh_ttl: Duration,
        admin: AdminStore,
    ) -> Result<Self, AuthError> {
        if key.len() < 16 {
            return Err(AuthError::Token("signing key must be at least 16 bytes".to_string()));
        }
        if access_ttl.is_zero() || access_ttl >= refresh_ttl {
            return Err(AuthError::Token(
                "access lifetime must be positive and shorter than refresh lifetime".to_string(),
            ));
        }
        // Claims carry whole seconds
        if access_ttl.subsec_nanos() != 0 || refresh_ttl.subsec_nanos() != 0 {
            return Err(AuthError::Token("token lifetimes must be whole seconds".to_string()));
        }

        let to_chrono = |d: Duration| {
            chrono::Duration::from_std(d).map_err(|e| AuthError::Token(format!("lifetime out of range: {}", e)))
        };

        Ok(Self {
            key,
            access_ttl: to_chrono(access_ttl)?,
            refresh_ttl: to_chrono(refresh_ttl)?,
            admin,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Build from process configuration. The signing key and admin account
    /// live under `<data_dir>/auth`; dev mode uses an ephemeral key.
    pub fn from_config(config: &ServerConfig) -> Result<Self, AuthError> {
        let auth_dir = config.data_dir.join("auth");
        let key = if config.dev_mode {
            tracing::warn!("Dev mode: using an ephemeral signing key, sessions will not survive restarts");
            generate_key()
        } else {
            load_or_create_key(&auth_dir.join("signing.key"))?
        };
        let admin = AdminStore::open(auth_dir.join("admin.json"))?;

        Self::new(key, config.access_expiry, config.refresh_expiry, admin)
    }

    /// Whether first-run setup is still pending
    pub fn setup_required(&self) -> bool {
        !self.admin.is_configured()
    }

    /// First-run setup: create the admin account and open a session
    pub fn setup(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        if !self.setup_required() {
            return Err(AuthError::AlreadyConfigured);
        }
        let account = AdminAccount::create(credentials)?;
        let username = account.username.clone();
        self.admin.create(account)?;
        self.open_session(&username, Utc::now())
    }

    /// Verify credentials and issue the initial token pair for a new session
    pub fn issue_initial_tokens(&self, credentials: &Credentials) -> Result<TokenPair, AuthError> {
        let account = self.admin.get().ok_or(AuthError::SetupRequired)?;
        if !account.verify(credentials) {
            tracing::warn!("Rejected login attempt for '{}'", credentials.username.trim());
            return Err(AuthError::InvalidCredentials);
        }
        self.open_session(&account.username, Utc::now())
    }

    /// Validate an access token against the current time
    pub fn validate_access(&self, token: &str) -> AccessCheck {
        self.validate_access_at(token, Utc::now())
    }

    /// Validate an access token as of `now`. Has no side effects.
    pub fn validate_access_at(&self, token: &str, now: DateTime<Utc>) -> AccessCheck {
        let Some(claims) = self.decode(token) else {
            return AccessCheck::Invalid;
        };
        if claims.kind != TokenKind::Access {
            return AccessCheck::Invalid;
        }
        if !self.session_open(&claims.sid) {
            return AccessCheck::Invalid;
        }
        if claims.is_expired_at(now) {
            return AccessCheck::Expired;
        }
        AccessCheck::Valid(claims)
    }

    /// Exchange a refresh token for a new pair
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshFailed> {
        self.refresh_at(refresh_token, Utc::now())
    }

    /// Exchange a refresh token for a new pair as of `now`. The presented
    /// token is retired; replaying it closes the session.
    pub fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<TokenPair, RefreshFailed> {
        let claims = self
            .decode(refresh_token)
            .ok_or_else(|| RefreshFailed::Rejected("malformed or forged refresh token".to_string()))?;
        if claims.kind != TokenKind::Refresh {
            return Err(RefreshFailed::Rejected("not a refresh token".to_string()));
        }
        if claims.is_expired_at(now) {
            self.close_session(&claims.sid);
            return Err(RefreshFailed::Expired);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let record = sessions
            .get_mut(&claims.sid)
            .ok_or_else(|| RefreshFailed::Rejected("session is closed".to_string()))?;

        if record.refresh_jti != claims.jti {
            tracing::warn!(session = %claims.sid, "Refresh token replay detected, closing session");
            sessions.remove(&claims.sid);
            return Err(RefreshFailed::Rejected("refresh token already used".to_string()));
        }

        let (pair, refresh_jti) = self
            .issue_pair(&record.username, &claims.sid, now)
            .map_err(|e| RefreshFailed::Rejected(e.to_string()))?;
        record.refresh_jti = refresh_jti;
        record.refresh_expiry = pair.refresh_expiry;

        tracing::debug!(session = %claims.sid, "Rotated session tokens");
        Ok(pair)
    }

    /// End the session a token belongs to. Accepts either token kind, even
    /// when expired. Returns whether a session was closed.
    pub fn logout(&self, token: &str) -> bool {
        match self.decode(token) {
            Some(claims) => self.close_session(&claims.sid),
            None => false,
        }
    }

    /// Username bound to an open session
    pub fn session_user(&self, sid: &str) -> Option<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sid)
            .map(|s| s.username.clone())
    }

    /// Number of open sessions
    pub fn active_sessions(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close sessions whose latest refresh token has expired
    pub fn prune_sessions(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.refresh_expiry > now);
        before - sessions.len()
    }

    fn open_session(&self, username: &str, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        let sid = uuid::Uuid::new_v4().to_string();
        let (pair, refresh_jti) = self.issue_pair(username, &sid, now)?;

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                sid.clone(),
                SessionRecord {
                    username: username.to_string(),
                    refresh_jti,
                    refresh_expiry: pair.refresh_expiry,
                },
            );

        tracing::info!(session = %sid, "Opened admin session for '{}'", username);
        Ok(pair)
    }

    fn close_session(&self, sid: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(sid)
            .is_some();
        if removed {
            tracing::info!(session = %sid, "Closed admin session");
        }
        removed
    }

    fn session_open(&self, sid: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(sid)
    }

    fn issue_pair(&self, username: &str, sid: &str, now: DateTime<Utc>) -> Result<(TokenPair, String), AuthError> {
        let access_expiry = now + self.access_ttl;
        let refresh_expiry = now + self.refresh_ttl;

        let access = Claims {
            sub: username.to_string(),
            sid: sid.to_string(),
            kind: TokenKind::Access,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: access_expiry.timestamp(),
        };
        let refresh = Claims {
            kind: TokenKind::Refresh,
            jti: uuid::Uuid::new_v4().to_string(),
            exp: refresh_expiry.timestamp(),
            ..access.clone()
        };

        let pair = TokenPair::new(
            self.sign(&access)?,
            self.sign(&refresh)?,
            timestamp(access.exp),
            timestamp(refresh.exp),
        )?;
        Ok((pair, refresh.jti))
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|e| AuthError::Token(e.to_string()))?;
        let body = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", body, signature))
    }

    /// Verify the signature and decode claims. Expiry is not checked here.
    fn decode(&self, token: &str) -> Option<Claims> {
        let (body, signature) = token.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        let mut mac = self.mac().ok()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let payload = URL_SAFE_NO_PAD.decode(body).ok()?;
        serde_json::from_slice(&payload).ok()
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| AuthError::Token(e.to_string()))
    }
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("admin", &self.admin)
            .field("sessions", &self.active_sessions())
            .finish()
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; SIGNING_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Read the hex-encoded signing key, creating it on first start
fn load_or_create_key(path: &Path) -> Result<Vec<u8>, AuthError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Storage(format!("failed to read signing key: {}", e)))?;
        return hex::decode(content.trim())
            .map_err(|e| AuthError::Storage(format!("signing key is corrupt: {}", e)));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AuthError::Storage(format!("failed to create auth directory: {}", e)))?;
    }

    let key = generate_key();
    std::fs::write(path, hex::encode(&key))
        .map_err(|e| AuthError::Storage(format!("failed to write signing key: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| AuthError::Storage(format!("failed to restrict signing key: {}", e)))?;
    }

    tracing::info!("Generated new signing key");
    Ok(key)
}

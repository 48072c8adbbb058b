// Client-side session: runs protected calls and drives coordinated refresh
// when a call reports an expired credential

use super::refresh::{RefreshCoordinator, RefreshFailed};
use super::token::{TokenAuthority, TokenPair};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Refresh-and-retry cycles allowed per call before giving up
pub const DEFAULT_MAX_REFRESH_RETRIES: u32 = 1;

/// Paths that never trigger a refresh, so a failing refresh cannot loop
pub fn is_refresh_exempt(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path == "/auth" || path.starts_with("/auth/") || path == "/session" || path.starts_with("/session/")
}

/// The underlying refresh call
#[async_trait::async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshFailed>;
}

#[async_trait::async_trait]
impl Refresher for TokenAuthority {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshFailed> {
        self.refresh_at(refresh_token, chrono::Utc::now())
    }
}

#[async_trait::async_trait]
impl<R: Refresher + ?Sized> Refresher for Arc<R> {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshFailed> {
        (**self).refresh(refresh_token).await
    }
}

/// Implemented by call errors so the session can tell an expired credential
/// apart from every other failure
pub trait ExpirySignal {
    fn is_credential_expired(&self) -> bool;
}

/// Failure of a call made through an [`AuthSession`]
#[derive(Debug, thiserror::Error)]
pub enum SessionError<E> {
    /// No tokens are installed
    #[error("not authenticated")]
    NotAuthenticated,

    /// The refresh failed; the session has been torn down
    #[error("session expired: {0}")]
    RefreshFailed(#[source] RefreshFailed),

    /// The credential was still reported expired after the allowed retries
    #[error("credential still rejected after {0} refresh attempt(s)")]
    RetryLimitExceeded(u32),

    /// The call itself failed
    #[error("{0}")]
    Call(#[source] E),
}

#[derive(Default)]
struct SessionState {
    tokens: Option<TokenPair>,
    /// Bumped on every install or teardown
    generation: u64,
}

/// Holds the current token pair and owns the refresh coordinator
pub struct AuthSession<R> {
    refresher: R,
    state: RwLock<SessionState>,
    coordinator: RefreshCoordinator<u64>,
    max_refresh_retries: u32,
}

impl<R: Refresher> AuthSession<R> {
    pub fn new(refresher: R) -> Self {
        Self {
            refresher,
            state: RwLock::new(SessionState::default()),
            coordinator: RefreshCoordinator::new(),
            max_refresh_retries: DEFAULT_MAX_REFRESH_RETRIES,
        }
    }

    pub fn with_max_refresh_retries(mut self, retries: u32) -> Self {
        self.max_refresh_retries = retries;
        self
    }

    /// Install tokens from login, setup or refresh. Returns the new generation.
    pub fn install(&self, tokens: TokenPair) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.tokens = Some(tokens);
        state.generation += 1;
        state.generation
    }

    /// Tear the session down
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.tokens = None;
        state.generation += 1;
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .is_some()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<u64> {
        &self.coordinator
    }

    /// Run `call` with the current access token. When it reports an expired
    /// credential on a non-exempt path, refresh (coordinated) and retry.
    pub async fn call<T, E, F, Fut>(&self, path: &str, mut call: F) -> Result<T, SessionError<E>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ExpirySignal,
    {
        let exempt = is_refresh_exempt(path);
        let mut refreshes = 0;

        loop {
            let (access_token, generation) = self.current().ok_or(SessionError::NotAuthenticated)?;

            let err = match call(access_token).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if exempt || !err.is_credential_expired() {
                return Err(SessionError::Call(err));
            }
            if refreshes >= self.max_refresh_retries {
                tracing::warn!(path, refreshes, "Credential still expired after refresh, giving up");
                return Err(SessionError::RetryLimitExceeded(refreshes));
            }
            refreshes += 1;

            self.refresh_after(generation)
                .await
                .map_err(SessionError::RefreshFailed)?;
        }
    }

    /// Obtain tokens newer than `stale_generation`. Runs at most one refresh
    /// for concurrent callers; callers that are already behind a completed
    /// rotation just pick up the newer tokens.
    pub async fn refresh_after(&self, stale_generation: u64) -> Result<u64, RefreshFailed> {
        if let Some(current) = self.newer_generation(stale_generation) {
            return Ok(current);
        }

        self.coordinator
            .run(|| async move {
                if let Some(current) = self.newer_generation(stale_generation) {
                    return Ok(current);
                }

                let refresh_token = self
                    .tokens()
                    .map(|t| t.refresh_token)
                    .ok_or_else(|| RefreshFailed::Rejected("no refresh token".to_string()))?;

                match self.refresher.refresh(&refresh_token).await {
                    Ok(tokens) => {
                        tracing::debug!("Session tokens refreshed");
                        Ok(self.install(tokens))
                    }
                    Err(e) => {
                        tracing::warn!("Refresh failed, tearing down session: {}", e);
                        self.clear();
                        Err(e)
                    }
                }
            })
            .await
    }

    fn current(&self) -> Option<(String, u64)> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .tokens
            .as_ref()
            .map(|t| (t.access_token.clone(), state.generation))
    }

    fn newer_generation(&self, stale: u64) -> Option<u64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.tokens.is_some() && state.generation > stale).then_some(state.generation)
    }
}

impl<R> std::fmt::Debug for AuthSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("AuthSession")
            .field("authenticated", &state.tokens.is_some())
            .field("generation", &state.generation)
            .field("coordinator", &self.coordinator)
            .field("max_refresh_retries", &self.max_refresh_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessCheck, AdminStore, Credentials};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Expired,
        Denied,
    }

    impl ExpirySignal for FakeError {
        fn is_credential_expired(&self) -> bool {
            matches!(self, FakeError::Expired)
        }
    }

    /// Counts refresh calls and answers slowly so callers pile up
    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl Refresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, RefreshFailed> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(RefreshFailed::Rejected("revoked".to_string()));
            }
            Ok(pair(&format!("access-{}", n)))
        }
    }

    fn pair(access: &str) -> TokenPair {
        let now = Utc::now();
        TokenPair::new(
            access.to_string(),
            format!("refresh-for-{}", access),
            now + chrono::Duration::minutes(1),
            now + chrono::Duration::hours(1),
        )
        .unwrap()
    }

    /// Accepts only tokens other than the initial "stale" one
    async fn protected(token: String) -> Result<String, FakeError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if token == "stale" {
            Err(FakeError::Expired)
        } else {
            Ok(token)
        }
    }

    #[test]
    fn test_refresh_exempt_paths() {
        assert!(is_refresh_exempt("/auth/refresh"));
        assert!(is_refresh_exempt("/auth/login?next=/"));
        assert!(is_refresh_exempt("/session"));
        assert!(!is_refresh_exempt("/sessions"));
        assert!(!is_refresh_exempt("/api/secrets"));
        assert!(!is_refresh_exempt("/authx"));
    }

    #[test]
    fn test_session_error_display_and_source() {
        use std::error::Error as _;

        let err: SessionError<std::io::Error> = SessionError::RefreshFailed(RefreshFailed::Expired);
        assert_eq!(err.to_string(), "session expired: refresh token expired");
        assert!(err.source().is_some());

        let err = SessionError::Call(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("disk full"));

        let err: SessionError<std::io::Error> = SessionError::RetryLimitExceeded(1);
        assert!(err.source().is_none());
    }

    #[tokio::test]
    async fn test_call_without_tokens() {
        let session = AuthSession::new(CountingRefresher::new(Duration::ZERO, false));
        let result = session.call("/api/secrets", protected).await;
        assert!(matches!(result, Err(SessionError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_expired_call_refreshes_and_retries() {
        let session = AuthSession::new(CountingRefresher::new(Duration::ZERO, false));
        session.install(pair("stale"));

        let result = session.call("/api/secrets", protected).await.unwrap();
        assert_eq!(result, "access-1");
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_trigger_one_refresh() {
        let session = Arc::new(AuthSession::new(CountingRefresher::new(
            Duration::from_millis(50),
            false,
        )));
        session.install(pair("stale"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.call("/api/scripts", protected).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "access-1");
        }
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 1);
        assert!(!session.coordinator().is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_failure_reaches_all_callers_and_tears_down() {
        let session = Arc::new(AuthSession::new(CountingRefresher::new(
            Duration::from_millis(50),
            true,
        )));
        session.install(pair("stale"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.call("/api/scripts", protected).await })
            })
            .collect();

        for handle in handles {
            match handle.await.unwrap() {
                Err(SessionError::RefreshFailed(RefreshFailed::Rejected(msg))) => assert_eq!(msg, "revoked"),
                other => panic!("expected refresh failure, got {:?}", other),
            }
        }
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 1);
        assert!(!session.is_authenticated());
        assert!(!session.coordinator().is_refreshing());
    }

    #[tokio::test]
    async fn test_new_refresh_after_failed_one() {
        let session = AuthSession::new(CountingRefresher::new(Duration::ZERO, true));
        session.install(pair("stale"));
        assert!(session.call("/api/a", protected).await.is_err());

        // Re-login installs tokens; the next expiry refreshes again
        session.install(pair("stale"));
        assert!(matches!(
            session.call("/api/a", protected).await,
            Err(SessionError::RefreshFailed(_))
        ));
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exempt_path_never_refreshes() {
        let session = AuthSession::new(CountingRefresher::new(Duration::ZERO, false));
        session.install(pair("stale"));

        let result = session.call("/auth/logout", protected).await;
        assert!(matches!(result, Err(SessionError::Call(FakeError::Expired))));
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let session = AuthSession::new(CountingRefresher::new(Duration::ZERO, false));
        session.install(pair("fresh"));

        let result: Result<(), _> = session
            .call("/api/a", |_| async { Err(FakeError::Denied) })
            .await;
        assert!(matches!(result, Err(SessionError::Call(FakeError::Denied))));
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_limit_bounds_refresh_loop() {
        let session = AuthSession::new(CountingRefresher::new(Duration::ZERO, false))
            .with_max_refresh_retries(2);
        session.install(pair("stale"));

        // Always reports expiry, even with fresh tokens
        let result: Result<(), _> = session
            .call("/api/a", |_| async { Err(FakeError::Expired) })
            .await;
        assert!(matches!(result, Err(SessionError::RetryLimitExceeded(2))));
        assert_eq!(session.refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_token_authority() {
        let authority = Arc::new(
            TokenAuthority::new(
                vec![3u8; 32],
                Duration::from_secs(60),
                Duration::from_secs(3600),
                AdminStore::in_memory(),
            )
            .unwrap(),
        );
        let initial = authority
            .setup(&Credentials::new("admin", "password123"))
            .unwrap();

        let session = AuthSession::new(authority.clone());
        session.install(initial.clone());

        // The gateway treats the initial access token as expired
        let stale = initial.access_token.clone();
        let check = |token: String| {
            let authority = authority.clone();
            let stale = stale.clone();
            async move {
                if token == stale {
                    return Err(FakeError::Expired);
                }
                match authority.validate_access(&token) {
                    AccessCheck::Valid(claims) => Ok(claims.sub),
                    AccessCheck::Expired => Err(FakeError::Expired),
                    AccessCheck::Invalid => Err(FakeError::Denied),
                }
            }
        };

        assert_eq!(session.call("/api/config", check).await.unwrap(), "admin");
        assert_ne!(session.tokens().unwrap().refresh_token, initial.refresh_token);
    }
}

//! Session-backed login gate in front of the static site.
//!
//! [`middleware::require_session`] decides for every request whether it may
//! reach the site; [`handlers`] implement the login and sign-out flow. All
//! authority is re-derived from the server-side session on each request; the
//! browser only ever holds an opaque session id.

pub mod cookie;
pub mod credentials;
pub mod csrf;
pub mod error;
pub mod handlers;
pub mod lockout;
pub mod middleware;
pub mod page;
pub mod session;
pub mod signing;


use axum::http::HeaderMap;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::info;

use self::{
    cookie::CookieManager,
    credentials::CredentialVerifier,
    csrf::CsrfTokens,
    error::GateError,
    lockout::{BruteForceGuard, LockoutPolicy},
    session::{Session, SessionId, SessionStore},
    signing::SigningKey,
};
use crate::store::{Clock, KeyValueStore};

const DEFAULT_LOCKOUT_THRESHOLD: u32 = 8;
const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SESSION_ABSOLUTE: Duration = Duration::from_secs(8 * 60 * 60);

/// Paths reachable without a session regardless of configuration.
const BUILTIN_PUBLIC_PATHS: [&str; 3] = ["/login", "/logout", "/health"];

#[derive(Clone, Debug)]
pub struct GateConfig {
    signing_key: SigningKey,
    cookie_secure: bool,
    lockout_threshold: u32,
    lockout_window: Duration,
    lockout_duration: Duration,
    lockout_policy: LockoutPolicy,
    session_idle: Duration,
    session_absolute: Duration,
    public_paths: Vec<String>,
    trust_forwarded_for: bool,
}

impl GateConfig {
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            cookie_secure: true,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
            lockout_policy: LockoutPolicy::Separate,
            session_idle: DEFAULT_SESSION_IDLE,
            session_absolute: DEFAULT_SESSION_ABSOLUTE,
            public_paths: Vec::new(),
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_window(mut self, window: Duration) -> Self {
        self.lockout_window = window;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    #[must_use]
    pub fn with_lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.lockout_policy = policy;
        self
    }

    #[must_use]
    pub fn with_session_idle(mut self, idle: Duration) -> Self {
        self.session_idle = idle;
        self
    }

    #[must_use]
    pub fn with_session_absolute(mut self, absolute: Duration) -> Self {
        self.session_absolute = absolute;
        self
    }

    /// Extra public paths. Entries ending in `/` match as prefixes.
    #[must_use]
    pub fn with_public_paths(mut self, paths: Vec<String>) -> Self {
        self.public_paths = paths;
        self
    }

    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    #[must_use]
    pub fn lockout_policy(&self) -> LockoutPolicy {
        self.lockout_policy
    }

    #[must_use]
    pub fn public_paths(&self) -> &[String] {
        &self.public_paths
    }
}

#[derive(Debug)]
pub struct GateState {
    config: GateConfig,
    sessions: SessionStore,
    csrf: CsrfTokens,
    guard: BruteForceGuard,
    verifier: CredentialVerifier,
    cookies: CookieManager,
}

impl GateState {
    #[must_use]
    pub fn new(
        config: GateConfig,
        verifier: CredentialVerifier,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionStore::new(
            store.clone(),
            clock.clone(),
            config.signing_key.fingerprint(),
            config.session_idle,
            config.session_absolute,
        );
        let guard = BruteForceGuard::new(
            store,
            clock,
            config.lockout_threshold,
            config.lockout_window,
            config.lockout_duration,
        );
        Self {
            csrf: CsrfTokens::new(config.signing_key.clone()),
            cookies: CookieManager::new(config.cookie_secure, config.session_absolute),
            sessions,
            guard,
            verifier,
            config,
        }
    }

    /// Build the state and drop sessions issued under a different signing secret.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn init(
        config: GateConfig,
        verifier: CredentialVerifier,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        let state = Self::new(config, verifier, store, clock);
        if state.sessions.reconcile_secret().await? {
            info!("Session secret registered");
        }
        Ok(state)
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn guard(&self) -> &BruteForceGuard {
        &self.guard
    }

    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        if path.split('/').any(|segment| segment == "..") {
            return false;
        }
        BUILTIN_PUBLIC_PATHS.contains(&path)
            || self.config.public_paths.iter().any(|public| {
                if public.ends_with('/') {
                    path.starts_with(public.as_str())
                } else {
                    path == public
                }
            })
    }

    /// The live session named by the request cookie, authenticated or not.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn current_session(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<(SessionId, Session)>, GateError> {
        let Some(id) = self.cookies.read_session_id(headers) else {
            return Ok(None);
        };
        Ok(self.sessions.get(&id).await?.map(|session| (id, session)))
    }

    /// Address used to key login attempts.
    #[must_use]
    pub fn client_address(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.config.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(forwarded) = forwarded {
                return forwarded.to_string();
            }
        }
        peer.map_or_else(|| "unknown".to_string(), |peer| peer.ip().to_string())
    }
}

/// Redirect target after login: a local absolute path, otherwise `/`.
#[must_use]
pub fn safe_next(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && path.chars().all(|c| c.is_ascii_graphic()) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

/// `/login`, carrying `target` as `next` unless it is the site root.
#[must_use]
pub fn login_location(target: &str) -> String {
    if target == "/" || target.is_empty() {
        return "/login".to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", target)
        .finish();
    format!("/login?{query}")
}

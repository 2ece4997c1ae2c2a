//! Server-side session records.
//!
//! A session is created in two situations:
//!
//! - `create_anonymous`: the login form needs a CSRF secret before anybody
//!   has authenticated. These sessions carry no identity and never authorize
//!   a protected request.
//! - `create`: a successful login. The pre-login session is destroyed by the
//!   caller and a new id is issued.
//!
//! Records are stored under `SHA-256(session id)`, so the raw id only ever
//! lives in the browser cookie. Each record carries the fingerprint of the
//! signing secret that issued it; a store shared with workers running another
//! secret never hands their sessions to this one. The backend TTL follows the
//! idle deadline, so abandoned records leave the store on their own.

use base64ct::{Base64UrlUnpadded, Encoding};
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::error::GateError;
use crate::store::{
    clock::{seconds, Clock},
    KeyValueStore, SetMode, StoreError,
};

pub(crate) const SESSION_PREFIX: &str = "vestibule:session:";
const FINGERPRINT_KEY: &str = "vestibule:secret-fingerprint";
const FINGERPRINT_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const ID_BYTES: usize = 32;
const CREATE_ATTEMPTS: usize = 3;

static SESSION_ID_FORMAT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{43}$").ok());

/// Opaque, unguessable session identifier (256 random bits, base64url).
#[derive(Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Result<Self, GateError> {
        Ok(Self(random_token()?))
    }

    /// Accept only values shaped like an issued id.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let format = SESSION_ID_FORMAT.as_ref()?;
        format.is_match(raw).then(|| Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn storage_key(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{SESSION_PREFIX}{}", hex::encode(digest))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(..)")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<String>,
    pub key_fingerprint: String,
    pub created_at: i64,
    pub last_seen_at: i64,
    pub csrf_secret: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

fn random_token() -> Result<String, GateError> {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[derive(Debug)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key_fingerprint: String,
    idle_timeout: Duration,
    absolute_timeout: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key_fingerprint: String,
        idle_timeout: Duration,
        absolute_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            key_fingerprint,
            idle_timeout,
            absolute_timeout,
        }
    }

    /// Start an authenticated session for `identity`.
    ///
    /// # Errors
    /// Returns an error if randomness or storage fails.
    pub async fn create(&self, identity: &str) -> Result<SessionId, GateError> {
        let (id, _) = self.insert(Some(identity.to_string())).await?;
        info!("Session created");
        Ok(id)
    }

    /// Start a pre-login session that only carries a CSRF secret.
    ///
    /// # Errors
    /// Returns an error if randomness or storage fails.
    pub async fn create_anonymous(&self) -> Result<(SessionId, Session), GateError> {
        self.insert(None).await
    }

    async fn insert(&self, identity: Option<String>) -> Result<(SessionId, Session), GateError> {
        let now = self.clock.now();
        let session = Session {
            identity,
            key_fingerprint: self.key_fingerprint.clone(),
            created_at: now,
            last_seen_at: now,
            csrf_secret: Some(random_token()?),
        };
        let record = serde_json::to_string(&session).map_err(StoreError::from)?;

        for _ in 0..CREATE_ATTEMPTS {
            let id = SessionId::generate()?;
            if self
                .store
                .set(
                    &id.storage_key(),
                    record.clone(),
                    self.record_ttl(&session),
                    SetMode::IfAbsent,
                )
                .await?
            {
                return Ok((id, session));
            }
            warn!("Session id collision, retrying");
        }

        Err(GateError::Configuration(
            "unable to allocate a unique session id".to_string(),
        ))
    }

    /// Look up a live session. Expired sessions are deleted and reported absent.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn get(&self, id: &SessionId) -> Result<Option<Session>, GateError> {
        let key = id.storage_key();
        let Some(record) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let session: Session = match serde_json::from_str(&record) {
            Ok(session) => session,
            Err(err) => {
                warn!("Discarding unreadable session record: {err}");
                self.store.delete(&key).await?;
                return Ok(None);
            }
        };

        if self.is_expired(&session, self.clock.now()) {
            debug!("Session expired");
            self.store.delete(&key).await?;
            return Ok(None);
        }

        if session.key_fingerprint != self.key_fingerprint {
            warn!("Discarding session issued under another signing secret");
            self.store.delete(&key).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Refresh the last-activity timestamp of a live session.
    ///
    /// Returns `false` when the session no longer exists.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn touch(&self, id: &SessionId) -> Result<bool, GateError> {
        match self.get(id).await? {
            Some(session) => self.refresh(id, session).await,
            None => Ok(false),
        }
    }

    /// Write back `session` with a new last-activity time. Never recreates a
    /// record that was destroyed in the meantime.
    pub(crate) async fn refresh(
        &self,
        id: &SessionId,
        mut session: Session,
    ) -> Result<bool, GateError> {
        let now = self.clock.now();
        if session.last_seen_at == now {
            return Ok(true);
        }
        session.last_seen_at = now;

        let ttl = self.record_ttl(&session);
        let record = serde_json::to_string(&session).map_err(StoreError::from)?;

        Ok(self
            .store
            .set(&id.storage_key(), record, ttl, SetMode::IfPresent)
            .await?)
    }

    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn destroy(&self, id: &SessionId) -> Result<bool, GateError> {
        let existed = self.store.delete(&id.storage_key()).await?;
        if existed {
            info!("Session destroyed");
        }
        Ok(existed)
    }

    /// Drop every session.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn invalidate_all(&self) -> Result<u64, GateError> {
        let removed = self.store.delete_prefix(SESSION_PREFIX).await?;
        info!("Invalidated {removed} sessions");
        Ok(removed)
    }

    /// Invalidate all sessions when the signing secret differs from the one
    /// recorded by the last startup. Returns `true` if sessions were invalidated.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    pub async fn reconcile_secret(&self) -> Result<bool, GateError> {
        let fingerprint = self.key_fingerprint.as_str();
        let stored = self.store.get(FINGERPRINT_KEY).await?;
        if stored.as_deref() == Some(fingerprint) {
            return Ok(false);
        }

        if stored.is_some() {
            warn!("Session secret changed, invalidating existing sessions");
        }
        self.invalidate_all().await?;
        self.store
            .set(
                FINGERPRINT_KEY,
                fingerprint.to_string(),
                FINGERPRINT_TTL,
                SetMode::Always,
            )
            .await?;
        Ok(true)
    }

    /// Time until the record would expire if left untouched: the idle
    /// deadline, capped by the absolute one.
    fn record_ttl(&self, session: &Session) -> Duration {
        let idle_deadline = session.last_seen_at.saturating_add(seconds(self.idle_timeout));
        let absolute_deadline = session
            .created_at
            .saturating_add(seconds(self.absolute_timeout));
        let remaining = idle_deadline
            .min(absolute_deadline)
            .saturating_sub(self.clock.now());
        Duration::from_secs(u64::try_from(remaining).unwrap_or(0))
    }

    fn is_expired(&self, session: &Session, now: i64) -> bool {
        let idle = now.saturating_sub(session.last_seen_at);
        let age = now.saturating_sub(session.created_at);
        idle >= seconds(self.idle_timeout) || age >= seconds(self.absolute_timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use std::collections::HashSet;

    const IDLE: Duration = Duration::from_secs(60);
    const ABSOLUTE: Duration = Duration::from_secs(300);

    fn sessions_on(
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        fingerprint: &str,
    ) -> SessionStore {
        SessionStore::new(store, clock, fingerprint.to_string(), IDLE, ABSOLUTE)
    }

    fn sessions() -> (Arc<ManualClock>, SessionStore) {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        (clock.clone(), sessions_on(store, clock, "one"))
    }

    #[test]
    fn parse_accepts_only_issued_shape() {
        let id = SessionId::generate().unwrap();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert_eq!(SessionId::parse(""), None);
        assert_eq!(SessionId::parse("admin"), None);
        assert_eq!(SessionId::parse(&"a".repeat(44)), None);
        assert_eq!(SessionId::parse(&format!("{}=", "a".repeat(42))), None);
    }

    #[test]
    fn debug_does_not_leak_the_id() {
        let id = SessionId::generate().unwrap();
        assert!(!format!("{id:?}").contains(id.as_str()));
    }

    #[tokio::test]
    async fn create_and_get() {
        let (_clock, sessions) = sessions();
        let id = sessions.create("admin").await.unwrap();
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session.identity.as_deref(), Some("admin"));
        assert!(session.is_authenticated());
        assert!(session.csrf_secret.is_some());
    }

    #[tokio::test]
    async fn anonymous_sessions_are_not_authenticated() {
        let (_clock, sessions) = sessions();
        let (id, created) = sessions.create_anonymous().await.unwrap();
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session, created);
        assert!(!session.is_authenticated());
        assert!(session.csrf_secret.is_some());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let (_clock, sessions) = sessions();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let id = sessions.create("admin").await.unwrap();
            assert!(seen.insert(id.as_str().to_string()));
        }
    }

    #[tokio::test]
    async fn idle_timeout_expires_and_deletes() {
        let (clock, sessions) = sessions();
        let id = sessions.create("admin").await.unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(sessions.touch(&id).await.unwrap());

        clock.advance(Duration::from_secs(59));
        assert!(sessions.get(&id).await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(sessions.get(&id).await.unwrap().is_none());
        assert!(!sessions.touch(&id).await.unwrap());
    }

    #[tokio::test]
    async fn absolute_timeout_wins_over_activity() {
        let (clock, sessions) = sessions();
        let id = sessions.create("admin").await.unwrap();
        for _ in 0..9 {
            clock.advance(Duration::from_secs(30));
            assert!(sessions.touch(&id).await.unwrap());
        }
        clock.advance(Duration::from_secs(30));
        assert!(sessions.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroyed_sessions_do_not_resurrect() {
        let (clock, sessions) = sessions();
        let id = sessions.create("admin").await.unwrap();
        let loaded = sessions.get(&id).await.unwrap().unwrap();

        assert!(sessions.destroy(&id).await.unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(!sessions.refresh(&id, loaded).await.unwrap());
        assert!(sessions.get(&id).await.unwrap().is_none());
        assert!(!sessions.destroy(&id).await.unwrap());
    }

    #[tokio::test]
    async fn invalidate_all_drops_every_session() {
        let (_clock, sessions) = sessions();
        let first = sessions.create("admin").await.unwrap();
        let (second, _) = sessions.create_anonymous().await.unwrap();
        assert_eq!(sessions.invalidate_all().await.unwrap(), 2);
        assert!(sessions.get(&first).await.unwrap().is_none());
        assert!(sessions.get(&second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_secret_invalidates_on_change() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let first = sessions_on(store.clone(), clock.clone(), "one");
        assert!(first.reconcile_secret().await.unwrap());
        let id = first.create("admin").await.unwrap();

        let restarted = sessions_on(store.clone(), clock.clone(), "one");
        assert!(!restarted.reconcile_secret().await.unwrap());
        assert!(restarted.get(&id).await.unwrap().is_some());

        let rotated = sessions_on(store, clock, "two");
        assert!(rotated.reconcile_secret().await.unwrap());
        assert!(first.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_from_another_secret_are_refused() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let old = sessions_on(store.clone(), clock.clone(), "one");
        let new = sessions_on(store.clone(), clock.clone(), "two");
        new.reconcile_secret().await.unwrap();

        // a worker still on the old secret keeps issuing sessions
        let id = old.create("admin").await.unwrap();
        assert!(new.get(&id).await.unwrap().is_none());
        assert!(store.get(&id.storage_key()).await.unwrap().is_none());
        assert!(old.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_records_expire_in_the_backend() {
        let (clock, sessions) = sessions();
        let store = sessions.store.clone();
        let (id, _) = sessions.create_anonymous().await.unwrap();
        assert!(store.get(&id.storage_key()).await.unwrap().is_some());

        clock.advance(IDLE);
        assert!(store.get(&id.storage_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_extends_the_backend_ttl_up_to_the_absolute_limit() {
        let (clock, sessions) = sessions();
        let store = sessions.store.clone();
        let id = sessions.create("admin").await.unwrap();

        for _ in 0..5 {
            clock.advance(Duration::from_secs(50));
            assert!(sessions.touch(&id).await.unwrap());
            assert!(store.get(&id.storage_key()).await.unwrap().is_some());
        }

        // last activity at 250s: the absolute limit at 300s comes first
        clock.advance(Duration::from_secs(49));
        assert!(store.get(&id.storage_key()).await.unwrap().is_some());
        clock.advance(Duration::from_secs(1));
        assert!(store.get(&id.storage_key()).await.unwrap().is_none());
    }
}

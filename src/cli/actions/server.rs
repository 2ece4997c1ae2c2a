use crate::{
    gate::{
        credentials::CredentialVerifier, lockout::LockoutPolicy, signing::SigningKey, GateConfig,
        GateState,
    },
    store::{self, Backend, Clock, SystemClock},
    vestibule,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub site_dir: PathBuf,
    pub admin_username: String,
    pub admin_password_hash: String,
    pub session_secret: SecretString,
    pub cookie_secure: bool,
    pub lockout_threshold: u32,
    pub lockout_window_seconds: u64,
    pub lockout_duration_seconds: u64,
    pub lockout_policy: LockoutPolicy,
    pub session_idle_seconds: u64,
    pub session_absolute_seconds: u64,
    pub public_paths: Vec<String>,
    pub trust_forwarded_for: bool,
    pub store: Backend,
    pub redis_url: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the store is unreachable,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let verifier = CredentialVerifier::new(args.admin_username, &args.admin_password_hash)
        .context("Invalid administrator credentials")?;
    let signing_key =
        SigningKey::new(args.session_secret).context("Invalid session secret")?;

    let config = GateConfig::new(signing_key)
        .with_cookie_secure(args.cookie_secure)
        .with_lockout_threshold(args.lockout_threshold)
        .with_lockout_window(Duration::from_secs(args.lockout_window_seconds))
        .with_lockout_duration(Duration::from_secs(args.lockout_duration_seconds))
        .with_lockout_policy(args.lockout_policy)
        .with_session_idle(Duration::from_secs(args.session_idle_seconds))
        .with_session_absolute(Duration::from_secs(args.session_absolute_seconds))
        .with_public_paths(args.public_paths)
        .with_trust_forwarded_for(args.trust_forwarded_for);

    debug!("Gate config: {:?}", config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = store::connect(args.store, args.redis_url.as_deref(), clock.clone())
        .await
        .context("Failed to open session store")?;

    let state = GateState::init(config, verifier, store, clock)
        .await
        .context("Failed to initialize session state")?;

    vestibule::new(args.port, args.site_dir, Arc::new(state)).await
}

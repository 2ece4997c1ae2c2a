//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to an action: starting the gated server with
//! its full configuration, or hashing a password for that configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{gate, store, ARG_PORT, ARG_SITE_DIR, CMD_HASH_PASSWORD};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if matches.subcommand_name() == Some(CMD_HASH_PASSWORD) {
        return Ok(Action::HashPassword);
    }

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let site_dir = matches
        .get_one::<String>(ARG_SITE_DIR)
        .map(PathBuf::from)
        .context("missing required argument: --site-dir")?;

    let gate_opts = gate::Options::parse(matches)?;
    let store_opts = store::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        site_dir,
        admin_username: gate_opts.admin_username,
        admin_password_hash: gate_opts.admin_password_hash,
        session_secret: gate_opts.session_secret,
        cookie_secure: gate_opts.cookie_secure,
        lockout_threshold: gate_opts.lockout_threshold,
        lockout_window_seconds: gate_opts.lockout_window_seconds,
        lockout_duration_seconds: gate_opts.lockout_duration_seconds,
        lockout_policy: gate_opts.lockout_policy,
        session_idle_seconds: gate_opts.session_idle_seconds,
        session_absolute_seconds: gate_opts.session_absolute_seconds,
        public_paths: gate_opts.public_paths,
        trust_forwarded_for: gate_opts.trust_forwarded_for,
        store: store_opts.backend,
        redis_url: store_opts.redis_url,
    }))
}

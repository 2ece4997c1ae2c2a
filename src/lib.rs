//! # Vestibule (session-gated static site)
//!
//! `vestibule` serves a directory of static files and lets nobody read them
//! without signing in first.
//!
//! ## Request gate
//!
//! Every request passes through [`gate::middleware::require_session`]. Public
//! paths (`/login`, `/logout`, `/health` and configured prefixes) pass
//! straight through; anything else needs an authenticated server-side session
//! or is redirected to `/login?next=<path>`.
//!
//! ## Login
//!
//! - **Credentials:** one administrative identity, its password stored as an
//!   Argon2 PHC string. Unknown usernames still cost one Argon2 verification.
//! - **CSRF:** the login and sign-out forms carry an HMAC token bound to a
//!   per-session secret. A pre-login session is created to hold it.
//! - **Lockout:** failed attempts are counted per client address, per username,
//!   or both; reaching the threshold locks the identifier for a fixed time.
//!   Storage failures deny the attempt.
//!
//! ## Sessions
//!
//! The cookie holds only a random 256-bit id. Records live in a
//! [`store::KeyValueStore`] (in-process or Redis) keyed by the SHA-256 of the
//! id, expire on idle and absolute timeouts, and are all dropped when the
//! signing secret changes.

pub mod cli;
pub mod gate;
pub mod store;
pub mod vestibule;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

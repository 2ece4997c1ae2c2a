use clap::{builder::BoolishValueParser, Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::gate::lockout::LockoutPolicy;

pub const ARG_ADMIN_USERNAME: &str = "admin-username";
pub const ARG_ADMIN_PASSWORD_HASH: &str = "admin-password-hash";
pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_WINDOW_SECONDS: &str = "lockout-window-seconds";
pub const ARG_LOCKOUT_DURATION_SECONDS: &str = "lockout-duration-seconds";
pub const ARG_LOCKOUT_POLICY: &str = "lockout-policy";
pub const ARG_SESSION_IDLE_SECONDS: &str = "session-idle-seconds";
pub const ARG_SESSION_ABSOLUTE_SECONDS: &str = "session-absolute-seconds";
pub const ARG_PUBLIC_PATHS: &str = "public-paths";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";

#[derive(Debug, Clone)]
pub struct Options {
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
}

impl Options {
    /// Parse login gate arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let read_seconds = |id: &str| -> anyhow::Result<u64> {
            matches
                .get_one::<u64>(id)
                .copied()
                .filter(|v| *v > 0)
                .ok_or_else(|| anyhow::anyhow!("--{id} must be greater than zero"))
        };

        let session_idle_seconds = read_seconds(ARG_SESSION_IDLE_SECONDS)?;
        let session_absolute_seconds = read_seconds(ARG_SESSION_ABSOLUTE_SECONDS)?;
        if session_idle_seconds > session_absolute_seconds {
            anyhow::bail!(
                "--{ARG_SESSION_IDLE_SECONDS} must not exceed --{ARG_SESSION_ABSOLUTE_SECONDS}"
            );
        }

        let lockout_threshold = matches
            .get_one::<u32>(ARG_LOCKOUT_THRESHOLD)
            .copied()
            .filter(|v| *v > 0)
            .ok_or_else(|| anyhow::anyhow!("--{ARG_LOCKOUT_THRESHOLD} must be greater than zero"))?;

        let public_paths = matches
            .get_many::<String>(ARG_PUBLIC_PATHS)
            .map(|paths| {
                paths
                    .map(|path| path.trim().to_string())
                    .filter(|path| !path.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if let Some(path) = public_paths.iter().find(|path| !path.starts_with('/')) {
            anyhow::bail!("public path must start with '/': {path}");
        }

        Ok(Self {
            admin_username: read_required(ARG_ADMIN_USERNAME)?,
            admin_password_hash: read_required(ARG_ADMIN_PASSWORD_HASH)?,
            session_secret: SecretString::from(read_required(ARG_SESSION_SECRET)?),
            cookie_secure: matches
                .get_one::<bool>(ARG_COOKIE_SECURE)
                .copied()
                .unwrap_or(true),
            lockout_threshold,
            lockout_window_seconds: read_seconds(ARG_LOCKOUT_WINDOW_SECONDS)?,
            lockout_duration_seconds: read_seconds(ARG_LOCKOUT_DURATION_SECONDS)?,
            lockout_policy: matches
                .get_one::<String>(ARG_LOCKOUT_POLICY)
                .map_or(Ok(LockoutPolicy::Separate), |value| value.parse())
                .map_err(|err: String| anyhow::anyhow!(err))?,
            session_idle_seconds,
            session_absolute_seconds,
            public_paths,
            trust_forwarded_for: matches
                .get_one::<bool>(ARG_TRUST_FORWARDED_FOR)
                .copied()
                .unwrap_or(false),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_credential_args(command);
    let command = with_lockout_args(command);
    with_session_args(command)
}

fn with_credential_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_USERNAME)
                .long(ARG_ADMIN_USERNAME)
                .help("Administrator username")
                .env("VESTIBULE_ADMIN_USERNAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD_HASH)
                .long(ARG_ADMIN_PASSWORD_HASH)
                .help("Administrator password as an Argon2 PHC string")
                .long_help(
                    "Administrator password as an Argon2 PHC string, e.g. $argon2id$v=19$m=19456,t=2,p=1$... \
                     Generate one with `vestibule hash-password`.",
                )
                .env("VESTIBULE_ADMIN_PASSWORD_HASH")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("Secret used to sign CSRF tokens (at least 32 bytes)")
                .long_help(
                    "Secret used to sign CSRF tokens (at least 32 bytes). Changing it signs out every session.",
                )
                .env("VESTIBULE_SESSION_SECRET")
                .hide_env_values(true)
                .required(true),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long(ARG_LOCKOUT_THRESHOLD)
                .help("Failed logins within the window before locking out")
                .env("VESTIBULE_LOCKOUT_THRESHOLD")
                .default_value("8")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_WINDOW_SECONDS)
                .long(ARG_LOCKOUT_WINDOW_SECONDS)
                .help("Window in seconds over which failed logins are counted")
                .env("VESTIBULE_LOCKOUT_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_DURATION_SECONDS)
                .long(ARG_LOCKOUT_DURATION_SECONDS)
                .help("Lockout duration in seconds")
                .env("VESTIBULE_LOCKOUT_DURATION_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_POLICY)
                .long(ARG_LOCKOUT_POLICY)
                .help("What failed logins are counted against")
                .env("VESTIBULE_LOCKOUT_POLICY")
                .default_value("separate")
                .value_parser(LockoutPolicy::VALUES),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Take the client address from X-Forwarded-For (only behind a trusted proxy)")
                .env("VESTIBULE_TRUST_FORWARDED_FOR")
                .default_value("false")
                .value_parser(BoolishValueParser::new()),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark the session cookie Secure (disable only for local testing over http)")
                .env("VESTIBULE_COOKIE_SECURE")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_SESSION_IDLE_SECONDS)
                .long(ARG_SESSION_IDLE_SECONDS)
                .help("Session idle timeout in seconds")
                .env("VESTIBULE_SESSION_IDLE_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_ABSOLUTE_SECONDS)
                .long(ARG_SESSION_ABSOLUTE_SECONDS)
                .help("Session absolute lifetime in seconds")
                .env("VESTIBULE_SESSION_ABSOLUTE_SECONDS")
                .default_value("28800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PUBLIC_PATHS)
                .long(ARG_PUBLIC_PATHS)
                .help("Comma separated paths served without login; a trailing '/' matches a prefix")
                .env("VESTIBULE_PUBLIC_PATHS")
                .value_delimiter(','),
        )
}

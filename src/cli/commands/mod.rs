pub mod gate;
pub mod logging;
pub mod store;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_SITE_DIR: &str = "site-dir";
pub const CMD_HASH_PASSWORD: &str = "hash-password";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("vestibule")
        .about("Session-gated static site server")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_negates_reqs(true)
        .subcommand(
            Command::new(CMD_HASH_PASSWORD)
                .about("Read a password from stdin and print its Argon2id PHC string"),
        )
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("VESTIBULE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SITE_DIR)
                .short('d')
                .long(ARG_SITE_DIR)
                .help("Directory with the static site to serve")
                .env("VESTIBULE_SITE_DIR")
                .required(true),
        );

    let command = gate::with_args(command);
    let command = store::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gate::lockout::LockoutPolicy;
    use crate::store::Backend;

    const HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$aGFzaGhhc2hoYXNoaGFzaA";
    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    const ENV_KEYS: [&str; 18] = [
        "VESTIBULE_PORT",
        "VESTIBULE_SITE_DIR",
        "VESTIBULE_ADMIN_USERNAME",
        "VESTIBULE_ADMIN_PASSWORD_HASH",
        "VESTIBULE_SESSION_SECRET",
        "VESTIBULE_COOKIE_SECURE",
        "VESTIBULE_LOCKOUT_THRESHOLD",
        "VESTIBULE_LOCKOUT_WINDOW_SECONDS",
        "VESTIBULE_LOCKOUT_DURATION_SECONDS",
        "VESTIBULE_LOCKOUT_POLICY",
        "VESTIBULE_SESSION_IDLE_SECONDS",
        "VESTIBULE_SESSION_ABSOLUTE_SECONDS",
        "VESTIBULE_STORE",
        "VESTIBULE_REDIS_URL",
        "VESTIBULE_PUBLIC_PATHS",
        "VESTIBULE_TRUST_FORWARDED_FOR",
        "VESTIBULE_LOG_LEVEL",
        "VESTIBULE_LOG_FORMAT",
    ];

    /// Every known variable unset except `values`.
    fn env_with(values: &[(&'static str, &'static str)]) -> Vec<(&'static str, Option<&'static str>)> {
        ENV_KEYS
            .iter()
            .map(|key| {
                let value = values
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| *value);
                (*key, value)
            })
            .collect()
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "vestibule");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Session-gated static site server".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_args() {
        temp_env::with_vars(env_with(&[]), || {
            let matches = new().get_matches_from(vec![
                "vestibule",
                "--port",
                "9000",
                "--site-dir",
                "/srv/site",
                "--admin-username",
                "admin",
                "--admin-password-hash",
                HASH,
                "--session-secret",
                SECRET,
                "--public-paths",
                "/assets/,/favicon.ico",
            ]);

            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9000));
            assert_eq!(
                matches.get_one::<String>(ARG_SITE_DIR).cloned(),
                Some("/srv/site".to_string())
            );

            let gate = gate::Options::parse(&matches).unwrap();
            assert_eq!(gate.admin_username, "admin");
            assert_eq!(gate.admin_password_hash, HASH);
            assert!(gate.cookie_secure);
            assert_eq!(gate.lockout_threshold, 8);
            assert_eq!(gate.lockout_window_seconds, 900);
            assert_eq!(gate.lockout_policy, LockoutPolicy::Separate);
            assert_eq!(gate.session_idle_seconds, 3600);
            assert_eq!(gate.session_absolute_seconds, 28_800);
            assert_eq!(gate.public_paths, vec!["/assets/", "/favicon.ico"]);
            assert!(!gate.trust_forwarded_for);

            let store = store::Options::parse(&matches).unwrap();
            assert_eq!(store.backend, Backend::Memory);
            assert!(store.redis_url.is_none());
        });
    }

    #[test]
    fn test_check_env() {
        let vars = env_with(&[
            ("VESTIBULE_PORT", "443"),
            ("VESTIBULE_SITE_DIR", "/srv/site"),
            ("VESTIBULE_ADMIN_USERNAME", "owner"),
            ("VESTIBULE_ADMIN_PASSWORD_HASH", HASH),
            ("VESTIBULE_SESSION_SECRET", SECRET),
            ("VESTIBULE_COOKIE_SECURE", "false"),
            ("VESTIBULE_LOCKOUT_THRESHOLD", "5"),
            ("VESTIBULE_LOCKOUT_POLICY", "address-identity"),
            ("VESTIBULE_STORE", "redis"),
            ("VESTIBULE_REDIS_URL", "redis://127.0.0.1:6379/0"),
            ("VESTIBULE_TRUST_FORWARDED_FOR", "yes"),
        ]);

        temp_env::with_vars(vars, || {
            let matches = new().get_matches_from(vec!["vestibule"]);
            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));

            let gate = gate::Options::parse(&matches).unwrap();
            assert_eq!(gate.admin_username, "owner");
            assert!(!gate.cookie_secure);
            assert_eq!(gate.lockout_threshold, 5);
            assert_eq!(gate.lockout_policy, LockoutPolicy::AddressIdentity);
            assert!(gate.trust_forwarded_for);

            let store = store::Options::parse(&matches).unwrap();
            assert_eq!(store.backend, Backend::Redis);
            assert_eq!(
                store.redis_url.as_deref(),
                Some("redis://127.0.0.1:6379/0")
            );
        });
    }

    #[test]
    fn missing_credentials_fail() {
        temp_env::with_vars(env_with(&[("VESTIBULE_SITE_DIR", "/srv/site")]), || {
            let result = new().try_get_matches_from(vec!["vestibule"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn hash_password_needs_no_server_args() {
        temp_env::with_vars(env_with(&[]), || {
            let matches = new()
                .try_get_matches_from(vec!["vestibule", CMD_HASH_PASSWORD])
                .unwrap();
            assert_eq!(matches.subcommand_name(), Some(CMD_HASH_PASSWORD));
        });
    }

    #[test]
    fn idle_longer_than_absolute_is_rejected() {
        temp_env::with_vars(env_with(&[]), || {
            let matches = new().get_matches_from(vec![
                "vestibule",
                "--site-dir",
                "/srv/site",
                "--admin-username",
                "admin",
                "--admin-password-hash",
                HASH,
                "--session-secret",
                SECRET,
                "--session-idle-seconds",
                "7200",
                "--session-absolute-seconds",
                "3600",
            ]);
            assert!(gate::Options::parse(&matches).is_err());
        });
    }

    #[test]
    fn redis_store_requires_url() {
        temp_env::with_vars(env_with(&[]), || {
            let matches = new().get_matches_from(vec![
                "vestibule",
                "--site-dir",
                "/srv/site",
                "--admin-username",
                "admin",
                "--admin-password-hash",
                HASH,
                "--session-secret",
                SECRET,
                "--store",
                "redis",
            ]);
            let err = store::Options::parse(&matches).unwrap_err();
            assert!(err.to_string().contains("--redis-url"));
        });
    }
}

use clap::{Arg, ArgMatches, Command};

use crate::store::Backend;

pub const ARG_STORE: &str = "store";
pub const ARG_REDIS_URL: &str = "redis-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub backend: Backend,
    pub redis_url: Option<String>,
}

impl Options {
    /// Parse storage arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the backend is unknown or redis is selected without a URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let backend = matches
            .get_one::<String>(ARG_STORE)
            .map_or(Some(Backend::Memory), |value| Backend::parse(value))
            .ok_or_else(|| anyhow::anyhow!("unknown --{ARG_STORE}, expected memory or redis"))?;

        let redis_url = matches
            .get_one::<String>(ARG_REDIS_URL)
            .cloned()
            .filter(|v| !v.trim().is_empty());

        if backend == Backend::Redis && redis_url.is_none() {
            anyhow::bail!("missing required argument: --{ARG_REDIS_URL} (required for redis store)");
        }

        Ok(Self { backend, redis_url })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STORE)
                .long(ARG_STORE)
                .help("Session and lockout store: memory (single process) or redis")
                .env("VESTIBULE_STORE")
                .default_value("memory")
                .value_parser(["memory", "redis"]),
        )
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL, example: redis://127.0.0.1:6379/0")
                .env("VESTIBULE_REDIS_URL")
                .hide_env_values(true),
        )
}

use clap::{
    builder::{PossibleValuesParser, ValueParser},
    Arg, Command,
};

use crate::cli::telemetry::LogFormat;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("VESTIBULE_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("VESTIBULE_LOG_FORMAT")
                .global(true)
                .default_value("text")
                .value_parser(PossibleValuesParser::new(LogFormat::VALUES)),
        )
}

/// Selected log format, text unless `--log-format json` was given.
#[must_use]
pub fn log_format(matches: &clap::ArgMatches) -> LogFormat {
    matches
        .get_one::<String>(ARG_LOG_FORMAT)
        .and_then(|value| LogFormat::parse(value))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names_and_numbers() {
        let command = with_args(Command::new("vestibule"));
        for (level, expected) in [("info", 2u8), ("DEBUG", 3), ("4", 4)] {
            temp_env::with_var("VESTIBULE_LOG_LEVEL", Some(level), || {
                let matches = command.clone().get_matches_from(vec!["vestibule"]);
                assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(expected));
            });
        }
    }

    #[test]
    fn log_format_from_env() {
        temp_env::with_var("VESTIBULE_LOG_FORMAT", Some("json"), || {
            let matches = with_args(Command::new("vestibule")).get_matches_from(vec!["vestibule"]);
            assert_eq!(log_format(&matches), LogFormat::Json);
        });
        temp_env::with_var("VESTIBULE_LOG_FORMAT", None::<&str>, || {
            let matches = with_args(Command::new("vestibule")).get_matches_from(vec!["vestibule"]);
            assert_eq!(log_format(&matches), LogFormat::Text);
        });
    }

    #[test]
    fn repeated_flag_counts() {
        temp_env::with_var("VESTIBULE_LOG_LEVEL", None::<&str>, || {
            let matches = with_args(Command::new("vestibule")).get_matches_from(vec!["vestibule", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }
}

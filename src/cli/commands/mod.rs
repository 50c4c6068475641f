pub mod logging;
pub mod rotation;
pub mod vault;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_IN_MEMORY: &str = "in-memory";

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

    let command = Command::new("rotator")
        .about("Secret and signing key rotation")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("ROTATOR_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "Database connection string. Username/password are injected from Vault DB creds, so they are not required in the DSN.",
                )
                .env("ROTATOR_DSN")
                .required_unless_present(ARG_IN_MEMORY),
        )
        .arg(
            Arg::new(ARG_IN_MEMORY)
                .long(ARG_IN_MEMORY)
                .help("Keep all state in memory, without Postgres or Vault (development only)")
                .env("ROTATOR_IN_MEMORY")
                .action(ArgAction::SetTrue)
                .conflicts_with(ARG_DSN),
        );

    let command = vault::with_args(command);
    let command = rotation::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV: [&str; 8] = [
        "ROTATOR_PORT",
        "ROTATOR_DSN",
        "ROTATOR_IN_MEMORY",
        "ROTATOR_LOG_LEVEL",
        "ROTATOR_VAULT_URL",
        "ROTATOR_VAULT_ROLE_ID",
        "ROTATOR_VAULT_SECRET_ID",
        "ROTATOR_VAULT_WRAPPED_TOKEN",
    ];

    fn with_cleared_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(ENV.map(|name| (name, None::<&str>)), f);
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "rotator");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Secret and signing key rotation".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_port_and_dsn() {
        with_cleared_env(|| {
            let matches = new().get_matches_from(vec![
                "rotator",
                "--port",
                "8081",
                "--dsn",
                "postgres://localhost:5432/rotator",
                "--vault-url",
                "https://vault.tld:8200",
                "--vault-role-id",
                "role-id",
                "--vault-secret-id",
                "secret-id",
            ]);

            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8081));
            assert_eq!(
                matches.get_one::<String>(ARG_DSN).cloned(),
                Some("postgres://localhost:5432/rotator".to_string())
            );
            assert!(!matches.get_flag(ARG_IN_MEMORY));
        });
    }

    #[test]
    fn test_check_env() {
        with_cleared_env(|| {
            temp_env::with_vars(
                [
                    ("ROTATOR_PORT", Some("443")),
                    ("ROTATOR_DSN", Some("postgres://localhost:5432/rotator")),
                    ("ROTATOR_LOG_LEVEL", Some("info")),
                ],
                || {
                    let matches = new().get_matches_from(vec!["rotator"]);
                    assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                    assert_eq!(logging::verbosity(&matches), 2);
                },
            );
        });
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5_u8 {
            with_cleared_env(|| {
                let mut args = vec!["rotator".to_string(), "--in-memory".to_string()];
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(usize::from(index))));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(matches.get_count(logging::ARG_VERBOSITY), index);
                assert_eq!(logging::verbosity(&matches), index);
            });
        }
    }

    #[test]
    fn test_dsn_required_without_in_memory() {
        with_cleared_env(|| {
            let result = new().try_get_matches_from(vec!["rotator"]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_in_memory_conflicts_with_dsn() {
        with_cleared_env(|| {
            let result = new().try_get_matches_from(vec![
                "rotator",
                "--in-memory",
                "--dsn",
                "postgres://localhost/rotator",
            ]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::ArgumentConflict)
            );
        });
    }
}

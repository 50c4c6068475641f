use crate::rotation::{config, RotationConfig};
use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Arg, ArgMatches, Command};

pub const ARG_MIN_TTL: &str = "min-ttl-seconds";
pub const ARG_SECRET_ACTIVATION_DELAY: &str = "secret-activation-delay-seconds";
pub const ARG_SECRET_DESTROY_TTL: &str = "secret-destroy-ttl-seconds";
pub const ARG_COOKIE_KEY_MIN_TTL: &str = "cookie-key-min-ttl-seconds";
pub const ARG_COOKIE_KEY_MAX_TTL: &str = "cookie-key-max-ttl-seconds";
pub const ARG_TOKEN_KEY_MAX_AGE: &str = "token-signing-key-max-age-seconds";
pub const ARG_VERIFICATION_KEY_MAX_AGE: &str = "verification-signing-key-max-age-seconds";
pub const ARG_VERIFICATION_ACTIVATION_DELAY: &str = "verification-activation-delay-seconds";
pub const ARG_SECRETS_PARENT: &str = "secrets-parent";
pub const ARG_SIGNING_KEYS_PARENT: &str = "signing-keys-parent";

fn seconds(matches: &ArgMatches, id: &str) -> Result<Duration> {
    let value = matches
        .get_one::<u64>(id)
        .copied()
        .with_context(|| format!("missing required argument: --{id}"))?;
    let value = i64::try_from(value).with_context(|| format!("--{id} is too large"))?;
    Ok(Duration::seconds(value))
}

/// Build the rotation timings from matches.
///
/// # Errors
/// Returns an error if a duration is missing or out of range.
pub fn parse(matches: &ArgMatches) -> Result<RotationConfig> {
    let mut config = RotationConfig::new()
        .with_min_ttl(seconds(matches, ARG_MIN_TTL)?)
        .with_secret_activation_delay(seconds(matches, ARG_SECRET_ACTIVATION_DELAY)?)
        .with_secret_destroy_ttl(seconds(matches, ARG_SECRET_DESTROY_TTL)?)
        .with_cookie_key_min_ttl(seconds(matches, ARG_COOKIE_KEY_MIN_TTL)?)
        .with_cookie_key_max_ttl(seconds(matches, ARG_COOKIE_KEY_MAX_TTL)?)
        .with_token_signing_key_max_age(seconds(matches, ARG_TOKEN_KEY_MAX_AGE)?)
        .with_verification_signing_key_max_age(seconds(matches, ARG_VERIFICATION_KEY_MAX_AGE)?)
        .with_verification_activation_delay(seconds(
            matches,
            ARG_VERIFICATION_ACTIVATION_DELAY,
        )?);

    if let Some(parent) = matches.get_one::<String>(ARG_SECRETS_PARENT) {
        config = config.with_secrets_parent(parent.trim_matches('/'));
    }
    if let Some(parent) = matches.get_one::<String>(ARG_SIGNING_KEYS_PARENT) {
        config = config.with_signing_keys_parent(parent.trim_matches('/'));
    }

    Ok(config)
}

fn duration_arg(
    id: &'static str,
    env: &'static str,
    help: &'static str,
    default: &'static str,
) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(duration_arg(
            ARG_MIN_TTL,
            "ROTATOR_MIN_TTL_SECONDS",
            "Minimum interval between two rotation runs",
            "900",
        ))
        .arg(duration_arg(
            ARG_SECRET_ACTIVATION_DELAY,
            "ROTATOR_SECRET_ACTIVATION_DELAY_SECONDS",
            "Age a new secret must reach before it is activated",
            "300",
        ))
        .arg(duration_arg(
            ARG_SECRET_DESTROY_TTL,
            "ROTATOR_SECRET_DESTROY_TTL_SECONDS",
            "Time a soft-deleted secret is kept before it is purged",
            "86400",
        ))
        .arg(duration_arg(
            ARG_COOKIE_KEY_MIN_TTL,
            "ROTATOR_COOKIE_KEY_MIN_TTL_SECONDS",
            "Age of the newest cookie key before another one is created (0 disables rotation)",
            "2592000",
        ))
        .arg(duration_arg(
            ARG_COOKIE_KEY_MAX_TTL,
            "ROTATOR_COOKIE_KEY_MAX_TTL_SECONDS",
            "Age after which a cookie key is retired (0 keeps keys forever)",
            "0",
        ))
        .arg(duration_arg(
            ARG_TOKEN_KEY_MAX_AGE,
            "ROTATOR_TOKEN_SIGNING_KEY_MAX_AGE_SECONDS",
            "Age after which the token signing key is replaced",
            "2592000",
        ))
        .arg(duration_arg(
            ARG_VERIFICATION_KEY_MAX_AGE,
            "ROTATOR_VERIFICATION_SIGNING_KEY_MAX_AGE_SECONDS",
            "Age after which a realm verification signing key is replaced",
            "2592000",
        ))
        .arg(duration_arg(
            ARG_VERIFICATION_ACTIVATION_DELAY,
            "ROTATOR_VERIFICATION_ACTIVATION_DELAY_SECONDS",
            "Age a new verification signing key must reach before it is activated",
            "3600",
        ))
        .arg(
            Arg::new(ARG_SECRETS_PARENT)
                .long(ARG_SECRETS_PARENT)
                .help("Secret manager path holding rotated secrets")
                .env("ROTATOR_SECRETS_PARENT")
                .default_value(config::DEFAULT_SECRETS_PARENT),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEYS_PARENT)
                .long(ARG_SIGNING_KEYS_PARENT)
                .help("Secret manager path holding signing keys")
                .env("ROTATOR_SIGNING_KEYS_PARENT")
                .default_value(config::DEFAULT_SIGNING_KEYS_PARENT),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config() {
        temp_env::with_vars(
            [
                ("ROTATOR_MIN_TTL_SECONDS", None::<&str>),
                ("ROTATOR_COOKIE_KEY_MIN_TTL_SECONDS", None),
                ("ROTATOR_SECRETS_PARENT", None),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let config = parse(&matches).unwrap();
                let defaults = RotationConfig::new();

                assert_eq!(config.min_ttl(), defaults.min_ttl());
                assert_eq!(
                    config.secret_activation_delay(),
                    defaults.secret_activation_delay()
                );
                assert_eq!(config.secret_destroy_ttl(), defaults.secret_destroy_ttl());
                assert_eq!(config.cookie_key_min_ttl(), defaults.cookie_key_min_ttl());
                assert_eq!(config.cookie_key_max_ttl(), defaults.cookie_key_max_ttl());
                assert_eq!(
                    config.token_signing_key_max_age(),
                    defaults.token_signing_key_max_age()
                );
                assert_eq!(
                    config.verification_signing_key_max_age(),
                    defaults.verification_signing_key_max_age()
                );
                assert_eq!(
                    config.verification_activation_delay(),
                    defaults.verification_activation_delay()
                );
                assert_eq!(config.secrets_parent(), defaults.secrets_parent());
                assert_eq!(config.signing_keys_parent(), defaults.signing_keys_parent());
            },
        );
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                ("ROTATOR_MIN_TTL_SECONDS", Some("60")),
                ("ROTATOR_COOKIE_KEY_MAX_TTL_SECONDS", Some("7200")),
                ("ROTATOR_SECRETS_PARENT", Some("/apps/rotator/")),
            ],
            || {
                let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                let config = parse(&matches).unwrap();
                assert_eq!(config.min_ttl(), Duration::seconds(60));
                assert_eq!(config.cookie_key_max_ttl(), Duration::hours(2));
                assert_eq!(config.secrets_parent(), "apps/rotator");
            },
        );
    }

    #[test]
    fn test_rejects_negative_seconds() {
        temp_env::with_var("ROTATOR_MIN_TTL_SECONDS", None::<&str>, || {
            let result = with_args(Command::new("test")).try_get_matches_from(vec![
                "test",
                "--min-ttl-seconds",
                "-5",
            ]);
            assert!(result.is_err());
        });
    }
}

use anyhow::{bail, Result};
use clap::{Arg, ArgGroup, ArgMatches, Command};

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";
pub const ARG_VAULT_KV_MOUNT: &str = "vault-kv-mount";
pub const ARG_VAULT_DB_ROLE: &str = "vault-db-role";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub role_id: String,
    pub secret_id: Option<String>,
    pub wrapped_token: Option<String>,
    pub kv_mount: String,
    pub db_role: String,
}

impl Options {
    /// Parse Vault arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the URL, the role id or both of secret id and
    /// wrapped token are missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        // env vars set to "" reach us as empty strings
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(url) = get_non_empty(ARG_VAULT_URL) else {
            bail!("missing required argument: --{ARG_VAULT_URL}");
        };
        let Some(role_id) = get_non_empty(ARG_VAULT_ROLE_ID) else {
            bail!("missing required argument: --{ARG_VAULT_ROLE_ID}");
        };

        let secret_id = get_non_empty(ARG_VAULT_SECRET_ID);
        let wrapped_token = get_non_empty(ARG_VAULT_WRAPPED_TOKEN);
        if secret_id.is_none() && wrapped_token.is_none() {
            bail!(
                "missing required argument: --{ARG_VAULT_SECRET_ID} or --{ARG_VAULT_WRAPPED_TOKEN}"
            );
        }

        Ok(Self {
            url,
            role_id,
            secret_id,
            wrapped_token,
            kv_mount: get_non_empty(ARG_VAULT_KV_MOUNT).unwrap_or_else(|| "secret".to_string()),
            db_role: get_non_empty(ARG_VAULT_DB_ROLE).unwrap_or_else(|| "rotator".to_string()),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault base URL, example: https://vault.tld:8200")
                .env("ROTATOR_VAULT_URL"),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault AppRole role id")
                .env("ROTATOR_VAULT_ROLE_ID"),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault AppRole secret id")
                .env("ROTATOR_VAULT_SECRET_ID")
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Vault response-wrapped secret id")
                .env("ROTATOR_VAULT_WRAPPED_TOKEN"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_MOUNT)
                .long(ARG_VAULT_KV_MOUNT)
                .help("Vault KV-v2 mount holding the key material")
                .env("ROTATOR_VAULT_KV_MOUNT")
                .default_value("secret"),
        )
        .arg(
            Arg::new(ARG_VAULT_DB_ROLE)
                .long(ARG_VAULT_DB_ROLE)
                .help("Vault database secrets engine role")
                .env("ROTATOR_VAULT_DB_ROLE")
                .default_value("rotator"),
        )
        .group(
            ArgGroup::new("vault-auth")
                .args([ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_WRAPPED_TOKEN])
                .multiple(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_cleared_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("ROTATOR_VAULT_URL", None::<&str>),
                ("ROTATOR_VAULT_ROLE_ID", None),
                ("ROTATOR_VAULT_SECRET_ID", None),
                ("ROTATOR_VAULT_WRAPPED_TOKEN", None),
                ("ROTATOR_VAULT_KV_MOUNT", None),
                ("ROTATOR_VAULT_DB_ROLE", None),
            ],
            f,
        );
    }

    #[test]
    fn test_parse_secret_id() {
        with_cleared_env(|| {
            let matches = with_args(Command::new("test")).get_matches_from(vec![
                "test",
                "--vault-url",
                "https://vault.tld:8200",
                "--vault-role-id",
                "role",
                "--vault-secret-id",
                "secret",
            ]);
            let options = Options::parse(&matches).unwrap();
            assert_eq!(options.url, "https://vault.tld:8200");
            assert_eq!(options.secret_id.as_deref(), Some("secret"));
            assert_eq!(options.wrapped_token, None);
            assert_eq!(options.kv_mount, "secret");
            assert_eq!(options.db_role, "rotator");
        });
    }

    #[test]
    fn test_parse_wrapped_token_from_env() {
        with_cleared_env(|| {
            temp_env::with_vars(
                [
                    ("ROTATOR_VAULT_URL", Some("http://vault:8200")),
                    ("ROTATOR_VAULT_ROLE_ID", Some("role")),
                    ("ROTATOR_VAULT_WRAPPED_TOKEN", Some("wrapped")),
                    ("ROTATOR_VAULT_KV_MOUNT", Some("kv")),
                ],
                || {
                    let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
                    let options = Options::parse(&matches).unwrap();
                    assert_eq!(options.wrapped_token.as_deref(), Some("wrapped"));
                    assert_eq!(options.kv_mount, "kv");
                },
            );
        });
    }

    #[test]
    fn test_parse_missing_credentials() {
        with_cleared_env(|| {
            let matches = with_args(Command::new("test")).get_matches_from(vec![
                "test",
                "--vault-url",
                "http://vault:8200",
                "--vault-role-id",
                "role",
            ]);
            let err = Options::parse(&matches).unwrap_err();
            assert!(err.to_string().contains("--vault-secret-id"));
        });
    }

    #[test]
    fn test_secret_id_conflicts_with_wrapped_token() {
        with_cleared_env(|| {
            let result = with_args(Command::new("test")).try_get_matches_from(vec![
                "test",
                "--vault-secret-id",
                "secret",
                "--vault-wrapped-token",
                "wrapped",
            ]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::ArgumentConflict)
            );
        });
    }
}

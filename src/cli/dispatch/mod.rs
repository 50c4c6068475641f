//! Map validated CLI matches to an [`Action`].

use crate::cli::{
    actions::{
        server::{Args, Storage},
        Action,
    },
    commands::{rotation, vault, ARG_DSN, ARG_IN_MEMORY, ARG_PORT},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let rotation = rotation::parse(matches)?;

    let storage = if matches.get_flag(ARG_IN_MEMORY) {
        Storage::InMemory
    } else {
        let dsn = matches
            .get_one::<String>(ARG_DSN)
            .cloned()
            .context("missing required argument: --dsn")?;

        Storage::Postgres {
            dsn,
            vault: vault::Options::parse(matches)?,
        }
    };

    Ok(Action::Server(Args {
        port,
        storage,
        rotation,
    }))
}

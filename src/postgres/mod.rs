//! PostgreSQL implementations of the rotation stores and lock.
//!
//! Queries are plain runtime `sqlx::query` calls against the tables in
//! `sql/schema.sql`. Each one runs inside a `db.query` span.

mod lock;
mod secrets;
mod signing_keys;

use anyhow::{bail, Context, Result};
use sqlx::{
    postgres::{PgPoolOptions, PgQueryResult},
    PgPool,
};
use std::time::Duration;
use tracing::{info_span, Span};

/// Open the connection pool used by [`PostgresStore`] and the health check.
///
/// # Errors
/// Returns an error if no connection can be established.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn expect_one(result: &PgQueryResult, what: &str) -> Result<()> {
    match result.rows_affected() {
        1 => Ok(()),
        0 => bail!("{what} not found"),
        n => bail!("{what} matched {n} rows"),
    }
}

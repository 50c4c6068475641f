use super::{db_span, PostgresStore};
use crate::rotation::store::{LockOutcome, RotationLock};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::{debug, instrument, Instrument};

#[async_trait]
impl RotationLock for PostgresStore {
    #[instrument(skip(self))]
    async fn try_lock(
        &self,
        name: &str,
        min_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        let mut tx = self.pool.begin().await?;

        let query = "SELECT expires_at FROM rotation_locks WHERE name = $1 FOR UPDATE";
        let row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .with_context(|| format!("failed to read lock {name}"))?;

        let expires_at = now + min_ttl;
        match row {
            Some(row) => {
                let held_until: DateTime<Utc> = row.try_get("expires_at")?;
                if held_until > now {
                    tx.rollback().await?;
                    debug!(%held_until, "lock held");
                    return Ok(LockOutcome::TooEarly);
                }

                let query = "UPDATE rotation_locks SET expires_at = $2 WHERE name = $1";
                sqlx::query(query)
                    .bind(name)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .instrument(db_span("UPDATE", query))
                    .await
                    .with_context(|| format!("failed to renew lock {name}"))?;
            }
            None => {
                let query = r"
                    INSERT INTO rotation_locks (name, expires_at) VALUES ($1, $2)
                    ON CONFLICT (name) DO NOTHING
                ";
                let result = sqlx::query(query)
                    .bind(name)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .instrument(db_span("INSERT", query))
                    .await
                    .with_context(|| format!("failed to create lock {name}"))?;

                // another instance created the row first
                if result.rows_affected() == 0 {
                    tx.rollback().await?;
                    return Ok(LockOutcome::TooEarly);
                }
            }
        }

        tx.commit().await?;
        Ok(LockOutcome::Acquired)
    }
}

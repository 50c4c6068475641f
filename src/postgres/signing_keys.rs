use super::{db_span, expect_one, PostgresStore};
use crate::rotation::{
    audit::{self, Actor, AuditAction},
    signing_key::{Realm, SigningKey},
    store::SigningKeyStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Row};
use tracing::Instrument;
use uuid::Uuid;

fn key_from_row(row: &PgRow) -> Result<SigningKey> {
    Ok(SigningKey {
        id: row.try_get("id")?,
        kid: row.try_get("kid")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SigningKeyStore for PostgresStore {
    async fn list_token_signing_keys(&self) -> Result<Vec<SigningKey>> {
        let query = r"
            SELECT id, kid, active, created_at, updated_at
            FROM token_signing_keys
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list token signing keys")?;

        rows.iter().map(key_from_row).collect()
    }

    async fn create_token_signing_key(
        &self,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey> {
        let mut tx = self.pool.begin().await?;

        let query = r"
            UPDATE token_signing_keys SET active = FALSE, updated_at = $1
            WHERE active
        ";
        sqlx::query(query)
            .bind(created_at)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to deactivate token signing keys")?;

        let query = r"
            INSERT INTO token_signing_keys (id, kid, active, created_at, updated_at)
            VALUES ($1, $2, TRUE, $3, $3)
        ";
        let id = Uuid::new_v4();
        sqlx::query(query)
            .bind(id)
            .bind(kid)
            .bind(created_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert token signing key")?;

        tx.commit().await?;

        audit::record(
            actor,
            AuditAction::CreateSigningKey,
            &audit::signing_key_resource("token", id),
        );
        Ok(SigningKey {
            id,
            kid: kid.to_string(),
            active: true,
            created_at,
            updated_at: created_at,
        })
    }

    async fn list_auto_rotate_realms(&self) -> Result<Vec<Realm>> {
        let query = r"
            SELECT id, name, auto_rotate_verification_keys
            FROM realms
            WHERE auto_rotate_verification_keys
            ORDER BY name
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list realms")?;

        rows.iter()
            .map(|row| {
                Ok(Realm {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    auto_rotate_verification_keys: row.try_get("auto_rotate_verification_keys")?,
                })
            })
            .collect()
    }

    async fn list_realm_signing_keys(&self, realm_id: Uuid) -> Result<Vec<SigningKey>> {
        let query = r"
            SELECT id, kid, active, created_at, updated_at
            FROM realm_signing_keys
            WHERE realm_id = $1
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(realm_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .with_context(|| format!("failed to list signing keys of realm {realm_id}"))?;

        rows.iter().map(key_from_row).collect()
    }

    async fn create_realm_signing_key(
        &self,
        realm_id: Uuid,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey> {
        let query = r"
            INSERT INTO realm_signing_keys (id, realm_id, kid, active, created_at, updated_at)
            VALUES ($1, $2, $3, FALSE, $4, $4)
        ";
        let id = Uuid::new_v4();
        sqlx::query(query)
            .bind(id)
            .bind(realm_id)
            .bind(kid)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .with_context(|| format!("failed to insert signing key for realm {realm_id}"))?;

        audit::record(
            actor,
            AuditAction::CreateSigningKey,
            &audit::signing_key_resource(realm_id, id),
        );
        Ok(SigningKey {
            id,
            kid: kid.to_string(),
            active: false,
            created_at,
            updated_at: created_at,
        })
    }

    async fn activate_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // the partial unique index allows one active key per realm
        let query = r"
            UPDATE realm_signing_keys SET active = FALSE, updated_at = $3
            WHERE realm_id = $1 AND active AND id <> $2
        ";
        sqlx::query(query)
            .bind(realm_id)
            .bind(key_id)
            .bind(at)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to deactivate realm signing keys")?;

        let query = r"
            UPDATE realm_signing_keys SET active = TRUE, updated_at = $3
            WHERE realm_id = $1 AND id = $2
        ";
        let result = sqlx::query(query)
            .bind(realm_id)
            .bind(key_id)
            .bind(at)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to activate realm signing key")?;
        expect_one(&result, &format!("signing key {key_id} in realm {realm_id}"))?;

        tx.commit().await?;

        audit::record(
            actor,
            AuditAction::ActivateSigningKey,
            &audit::signing_key_resource(realm_id, key_id),
        );
        Ok(())
    }

    async fn destroy_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        actor: &Actor,
    ) -> Result<()> {
        let query = "DELETE FROM realm_signing_keys WHERE realm_id = $1 AND id = $2";
        let result = sqlx::query(query)
            .bind(realm_id)
            .bind(key_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete realm signing key")?;
        expect_one(&result, &format!("signing key {key_id} in realm {realm_id}"))?;

        audit::record(
            actor,
            AuditAction::DestroySigningKey,
            &audit::signing_key_resource(realm_id, key_id),
        );
        Ok(())
    }
}

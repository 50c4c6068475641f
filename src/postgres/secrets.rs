use super::{db_span, expect_one, PostgresStore};
use crate::rotation::{
    audit::{self, Actor, AuditAction},
    secret::{NewSecret, Secret, SecretState, SecretType},
    store::SecretStore,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, Row};
use tracing::Instrument;
use uuid::Uuid;

fn secret_from_row(row: &PgRow) -> Result<Secret> {
    let secret_type = row
        .try_get::<String, _>("secret_type")?
        .parse::<SecretType>()
        .map_err(|e| anyhow!(e))?;

    Ok(Secret::from_parts(
        row.try_get("id")?,
        secret_type,
        row.try_get("reference")?,
        row.try_get("active")?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
        row.try_get("deleted_at")?,
    ))
}

impl PostgresStore {
    async fn select_secrets(
        &self,
        query: &'static str,
        secret_type: SecretType,
    ) -> Result<Vec<Secret>> {
        let rows = sqlx::query(query)
            .bind(secret_type.as_str())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .with_context(|| format!("failed to list {secret_type} secrets"))?;

        rows.iter().map(secret_from_row).collect()
    }
}

#[async_trait]
impl SecretStore for PostgresStore {
    async fn list_secrets(&self, secret_type: SecretType) -> Result<Vec<Secret>> {
        let query = r"
            SELECT id, secret_type, reference, active, created_at, updated_at, deleted_at
            FROM secrets
            WHERE secret_type = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC
        ";
        self.select_secrets(query, secret_type).await
    }

    async fn list_secrets_unscoped(&self, secret_type: SecretType) -> Result<Vec<Secret>> {
        let query = r"
            SELECT id, secret_type, reference, active, created_at, updated_at, deleted_at
            FROM secrets
            WHERE secret_type = $1
            ORDER BY created_at DESC
        ";
        self.select_secrets(query, secret_type).await
    }

    async fn create_secret(&self, secret: NewSecret, actor: &Actor) -> Result<Secret> {
        let query = r"
            INSERT INTO secrets (id, secret_type, reference, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
        ";
        let id = Uuid::new_v4();
        sqlx::query(query)
            .bind(id)
            .bind(secret.secret_type.as_str())
            .bind(&secret.reference)
            .bind(secret.active)
            .bind(secret.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert secret")?;

        let created = Secret::from_parts(
            id,
            secret.secret_type,
            secret.reference,
            secret.active,
            secret.created_at,
            secret.created_at,
            None,
        );
        audit::record(
            actor,
            AuditAction::CreateSecret,
            &audit::secret_resource(created.secret_type, created.id),
        );
        Ok(created)
    }

    async fn create_secrets(
        &self,
        secrets: Vec<NewSecret>,
        actor: &Actor,
    ) -> Result<Vec<Secret>> {
        let query = r"
            INSERT INTO secrets (id, secret_type, reference, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
        ";
        let mut tx = self.pool.begin().await?;

        let mut created = Vec::with_capacity(secrets.len());
        for secret in secrets {
            let id = Uuid::new_v4();
            sqlx::query(query)
                .bind(id)
                .bind(secret.secret_type.as_str())
                .bind(&secret.reference)
                .bind(secret.active)
                .bind(secret.created_at)
                .execute(&mut *tx)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to insert secret")?;

            created.push(Secret::from_parts(
                id,
                secret.secret_type,
                secret.reference,
                secret.active,
                secret.created_at,
                secret.created_at,
                None,
            ));
        }

        tx.commit().await?;

        for secret in &created {
            audit::record(
                actor,
                AuditAction::CreateSecret,
                &audit::secret_resource(secret.secret_type, secret.id),
            );
        }
        Ok(created)
    }

    async fn save_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        let action = match secret.state() {
            SecretState::Active => AuditAction::ActivateSecret,
            SecretState::Inactive => AuditAction::DeactivateSecret,
            state => bail!("secret {} cannot be saved while {}", secret.id, state.as_str()),
        };

        let query = r"
            UPDATE secrets SET active = $2, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(secret.id)
            .bind(secret.is_active())
            .bind(secret.updated_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update secret")?;
        expect_one(&result, &format!("secret {}", secret.id))?;

        audit::record(
            actor,
            action,
            &audit::secret_resource(secret.secret_type, secret.id),
        );
        Ok(())
    }

    async fn soft_delete_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        let deleted_at = secret
            .deleted_at()
            .ok_or_else(|| anyhow!("secret {} is not marked for deletion", secret.id))?;

        let query = "UPDATE secrets SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL";
        let result = sqlx::query(query)
            .bind(secret.id)
            .bind(deleted_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to soft delete secret")?;
        expect_one(&result, &format!("secret {}", secret.id))?;

        audit::record(
            actor,
            AuditAction::SoftDeleteSecret,
            &audit::secret_resource(secret.secret_type, secret.id),
        );
        Ok(())
    }

    async fn purge_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        if secret.state() != SecretState::Purged {
            bail!("secret {} is not purged", secret.id);
        }

        let query = "DELETE FROM secrets WHERE id = $1 AND deleted_at IS NOT NULL";
        let result = sqlx::query(query)
            .bind(secret.id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge secret")?;
        expect_one(&result, &format!("secret {}", secret.id))?;

        audit::record(
            actor,
            AuditAction::PurgeSecret,
            &audit::secret_resource(secret.secret_type, secret.id),
        );
        Ok(())
    }
}

//! Secret rotation state machine.
//!
//! Each pass walks every secret type through the same phases, in order:
//! legacy import, creation, activation, expiry, soft deletion and purge.
//! Every transition is re-evaluated from persisted timestamps, so running a
//! pass again from any partial state converges on the same result.

use crate::rotation::{
    audit::Actor,
    clock::Clock,
    config::RotationConfig,
    error::RotationErrors,
    legacy::{self, Mutator},
    secret::{NewSecret, Secret, SecretState, SecretType, TransitionError},
    store::{LockOutcome, RotationLock, SecretManager, SecretStore, SigningKeyStore},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const SECRETS_LOCK: &str = "secret_rotation";
pub const SIGNING_KEYS_LOCK: &str = "signing_key_rotation";

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Rotation parameters for one secret type.
#[derive(Clone, Debug)]
pub struct SecretSpec {
    pub secret_type: SecretType,
    pub parent: String,
    pub num_bytes: usize,
    /// Age of the newest generation before another one is created. Zero
    /// creates a single generation and never rotates it.
    pub min_ttl: Duration,
    /// Age after which an active generation is deactivated. Zero disables expiry.
    pub max_ttl: Duration,
    /// Variable holding legacy key material to import on first run.
    pub env_var: &'static str,
    pub mutator: Option<Mutator>,
}

/// The secret types this service manages.
#[must_use]
pub fn default_secret_specs(config: &RotationConfig) -> Vec<SecretSpec> {
    let parent = config.secrets_parent().to_string();
    let hmac = |secret_type, env_var| SecretSpec {
        secret_type,
        parent: parent.clone(),
        num_bytes: 128,
        min_ttl: Duration::zero(),
        max_ttl: Duration::zero(),
        env_var,
        mutator: None,
    };

    vec![
        hmac(SecretType::ApiKeyDatabaseHmac, "DB_APIKEY_DATABASE_KEY"),
        hmac(SecretType::ApiKeySignatureHmac, "DB_APIKEY_SIGNATURE_KEY"),
        SecretSpec {
            secret_type: SecretType::CookieKeys,
            parent: parent.clone(),
            // 32 bytes HMAC + 32 bytes encryption
            num_bytes: 64,
            min_ttl: config.cookie_key_min_ttl(),
            max_ttl: config.cookie_key_max_ttl(),
            env_var: "COOKIE_KEYS",
            mutator: Some(legacy::cookie_pairs),
        },
        hmac(SecretType::PhoneNumberDatabaseHmac, "DB_PHONE_HMAC_KEY"),
        hmac(
            SecretType::VerificationCodeDatabaseHmac,
            "DB_VERIFICATION_CODE_DATABASE_KEY",
        ),
    ]
}

/// Result of a lock-gated rotation run.
#[derive(Debug)]
pub enum RotationRun {
    /// Another run happened within the minimum interval; nothing was done.
    TooEarly,
    Completed(RotationErrors),
}

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Backends {
    pub secrets: Arc<dyn SecretStore>,
    pub signing_keys: Arc<dyn SigningKeyStore>,
    pub manager: Arc<dyn SecretManager>,
    pub lock: Arc<dyn RotationLock>,
}

#[derive(Clone)]
pub struct RotationEngine {
    pub(crate) backends: Backends,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: RotationConfig,
    pub(crate) actor: Actor,
    env: EnvLookup,
}

impl RotationEngine {
    #[must_use]
    pub fn new(backends: Backends, clock: Arc<dyn Clock>, config: RotationConfig) -> Self {
        Self {
            backends,
            clock,
            config,
            actor: Actor::system(),
            env: Arc::new(|name: &str| std::env::var(name).ok()),
        }
    }

    /// Replace the environment used for legacy imports.
    #[must_use]
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Rotate every secret type unless another run happened within `min_ttl`.
    ///
    /// # Errors
    /// Returns an error only when the lock store itself fails.
    pub async fn run_secret_rotation(&self) -> Result<RotationRun> {
        if self.try_lock(SECRETS_LOCK).await? == LockOutcome::TooEarly {
            return Ok(RotationRun::TooEarly);
        }

        let specs = default_secret_specs(&self.config);
        Ok(RotationRun::Completed(self.rotate_secrets(&specs).await))
    }

    pub(crate) async fn try_lock(&self, name: &str) -> Result<LockOutcome> {
        let outcome = self
            .backends
            .lock
            .try_lock(name, self.config.min_ttl(), self.clock.now())
            .await
            .with_context(|| format!("failed to acquire lock {name}"))?;

        if outcome == LockOutcome::TooEarly {
            debug!(lock = name, "skipping rotation, too early");
        }
        Ok(outcome)
    }

    /// Rotate each secret type in turn, collecting failures.
    pub async fn rotate_secrets(&self, specs: &[SecretSpec]) -> RotationErrors {
        let mut errors = RotationErrors::new();
        for spec in specs {
            if let Err(e) = self.rotate_secret(spec).await {
                errors.extend(e);
            }
        }
        errors
    }

    /// Drive one secret type through a full pass.
    ///
    /// # Errors
    /// Returns every failure of the pass; later phases still run when the
    /// records they need could be listed.
    #[instrument(
        skip(self, spec),
        fields(
            secret_type = %spec.secret_type,
            parent = %spec.parent,
            min_ttl = %spec.min_ttl,
            max_ttl = %spec.max_ttl
        )
    )]
    pub async fn rotate_secret(&self, spec: &SecretSpec) -> Result<(), RotationErrors> {
        let mut errors = RotationErrors::new();
        let now = self.clock.now();
        let secret_type = spec.secret_type;

        if let Some(value) = (self.env)(spec.env_var).filter(|v| !v.trim().is_empty()) {
            if let Err(e) = self.import_secrets(spec, &value, now).await {
                error!("legacy import failed: {e:#}");
                return Err(e
                    .context(format!(
                        "failed to import {secret_type} secrets from {}",
                        spec.env_var
                    ))
                    .into());
            }
        }

        let mut secrets = match self.backends.secrets.list_secrets(secret_type).await {
            Ok(secrets) => secrets,
            Err(e) => {
                errors.push(e.context(format!("failed to list {secret_type} secrets")));
                errors.extend(self.purge_secrets(secret_type, now).await);
                return errors.into_result();
            }
        };

        if needs_new_generation(&secrets, spec.min_ttl, now) {
            if let Err(e) = self.create_secret(spec, secrets.is_empty(), now).await {
                errors.push(e.context(format!("failed to create {secret_type} secret")));
            }
        }

        let activation_delay = self.config.secret_activation_delay();

        for secret in &mut secrets {
            if secret.state() == SecretState::Inactive
                && !secret.was_active()
                && now - secret.created_at > activation_delay
            {
                if let Err(e) = self.transition(secret, now, Secret::activate).await {
                    errors.push(e.context(format!("failed to activate {secret_type} secret")));
                }
            }
        }

        if spec.max_ttl > Duration::zero() {
            for secret in &mut secrets {
                if secret.is_active() && now - secret.created_at > spec.max_ttl {
                    if let Err(e) = self.transition(secret, now, Secret::deactivate).await {
                        errors.push(e.context(format!("failed to expire {secret_type} secret")));
                    }
                }
            }

            for secret in &mut secrets {
                if secret.state() == SecretState::Inactive
                    && secret.was_active()
                    && now - secret.updated_at > activation_delay
                {
                    if let Err(e) = self.soft_delete(secret, now).await {
                        errors.push(e.context(format!("failed to delete {secret_type} secret")));
                    }
                }
            }
        }

        errors.extend(self.purge_secrets(secret_type, now).await);

        errors.into_result()
    }

    async fn import_secrets(
        &self,
        spec: &SecretSpec,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing = self
            .backends
            .secrets
            .list_secrets_unscoped(spec.secret_type)
            .await
            .context("failed to list existing secrets")?;
        if !existing.is_empty() {
            return Ok(());
        }

        let mut blocks = legacy::resolve_blocks(self.backends.manager.as_ref(), value).await?;
        if let Some(mutator) = spec.mutator {
            blocks = mutator(blocks)?;
        }

        // keep the legacy order: the first block is the newest
        let created_at = (0..blocks.len())
            .map(|index| -> Result<DateTime<Utc>> {
                Ok(now - Duration::hours(i64::try_from(index)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut references = Vec::with_capacity(blocks.len());
        for block in &blocks {
            match self
                .backends
                .manager
                .create_version(&spec.parent, block)
                .await
            {
                Ok(reference) => references.push(reference),
                Err(e) => {
                    self.discard_versions(&references).await;
                    return Err(e.context("failed to store imported secret"));
                }
            }
        }

        let records: Vec<NewSecret> = references
            .iter()
            .zip(created_at)
            .map(|(reference, created_at)| NewSecret {
                secret_type: spec.secret_type,
                reference: reference.clone(),
                active: true,
                created_at,
            })
            .collect();

        // all or nothing, so a failed import is retried from scratch
        if let Err(e) = self
            .backends
            .secrets
            .create_secrets(records, &self.actor)
            .await
        {
            self.discard_versions(&references).await;
            return Err(e.context("failed to save imported secrets"));
        }

        let count = references.len();
        info!(count, env_var = spec.env_var, "imported legacy secrets");
        Ok(())
    }

    async fn discard_versions(&self, references: &[String]) {
        for reference in references {
            if let Err(e) = self.backends.manager.destroy_version(reference).await {
                warn!(reference = %reference, "failed to discard imported secret version: {e:#}");
            }
        }
    }

    async fn create_secret(
        &self,
        spec: &SecretSpec,
        first: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut value = vec![0u8; spec.num_bytes];
        OsRng.fill_bytes(&mut value);

        let reference = self
            .backends
            .manager
            .create_version(&spec.parent, &value)
            .await
            .context("failed to create secret version")?;

        let secret = self
            .backends
            .secrets
            .create_secret(
                NewSecret {
                    secret_type: spec.secret_type,
                    reference,
                    active: first,
                    created_at: now,
                },
                &self.actor,
            )
            .await?;

        info!(id = %secret.id, active = first, "created secret generation");
        Ok(())
    }

    async fn transition(
        &self,
        secret: &mut Secret,
        now: DateTime<Utc>,
        apply: fn(&mut Secret, DateTime<Utc>) -> Result<(), TransitionError>,
    ) -> Result<()> {
        apply(secret, now)?;
        self.backends.secrets.save_secret(secret, &self.actor).await?;
        info!(id = %secret.id, state = secret.state().as_str(), "updated secret");
        Ok(())
    }

    async fn soft_delete(&self, secret: &mut Secret, now: DateTime<Utc>) -> Result<()> {
        secret.mark_for_deletion(now)?;
        self.backends
            .secrets
            .soft_delete_secret(secret, &self.actor)
            .await?;
        info!(id = %secret.id, "marked secret for deletion");
        Ok(())
    }

    async fn purge_secrets(&self, secret_type: SecretType, now: DateTime<Utc>) -> RotationErrors {
        let mut errors = RotationErrors::new();
        let destroy_ttl = self.config.secret_destroy_ttl();

        let secrets = match self
            .backends
            .secrets
            .list_secrets_unscoped(secret_type)
            .await
        {
            Ok(secrets) => secrets,
            Err(e) => {
                errors.push(e.context(format!("failed to list deleted {secret_type} secrets")));
                return errors;
            }
        };

        for mut secret in secrets {
            let Some(deleted_at) = secret.deleted_at() else {
                continue;
            };
            if now - deleted_at <= destroy_ttl {
                continue;
            }

            if let Err(e) = self.purge(&mut secret).await {
                warn!(id = %secret.id, "failed to purge secret: {e:#}");
                errors.push(e.context(format!("failed to purge {secret_type} secret")));
            }
        }

        errors
    }

    async fn purge(&self, secret: &mut Secret) -> Result<()> {
        self.backends
            .manager
            .destroy_version(&secret.reference)
            .await
            .context("failed to destroy secret version")?;
        secret.purge()?;
        self.backends.secrets.purge_secret(secret, &self.actor).await?;
        info!(id = %secret.id, "purged secret");
        Ok(())
    }
}

fn needs_new_generation(secrets: &[Secret], min_ttl: Duration, now: DateTime<Utc>) -> bool {
    match secrets.first() {
        None => true,
        Some(newest) => min_ttl > Duration::zero() && now - newest.created_at > min_ttl,
    }
}

//! Persistence seams used by the rotation engine.
//!
//! The engine owns time: every timestamp written through these traits comes
//! from the engine's clock, so implementations never call `now()` themselves.
//! Mutating methods take the [`Actor`] responsible for the change.

use crate::rotation::{
    audit::Actor,
    secret::{NewSecret, Secret, SecretType},
    signing_key::{Realm, SigningKey},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Records of `secret_type` that are not soft-deleted, newest first.
    async fn list_secrets(&self, secret_type: SecretType) -> Result<Vec<Secret>>;

    /// Every record of `secret_type`, soft-deleted ones included, newest first.
    async fn list_secrets_unscoped(&self, secret_type: SecretType) -> Result<Vec<Secret>>;

    async fn create_secret(&self, secret: NewSecret, actor: &Actor) -> Result<Secret>;

    /// Insert several records at once. Either every record is stored or none is.
    async fn create_secrets(
        &self,
        secrets: Vec<NewSecret>,
        actor: &Actor,
    ) -> Result<Vec<Secret>>;

    /// Persist the active flag and `updated_at`.
    async fn save_secret(&self, secret: &Secret, actor: &Actor) -> Result<()>;

    /// Persist the `deleted_at` marker of a secret pending deletion.
    async fn soft_delete_secret(&self, secret: &Secret, actor: &Actor) -> Result<()>;

    /// Remove the record permanently.
    async fn purge_secret(&self, secret: &Secret, actor: &Actor) -> Result<()>;
}

#[async_trait]
pub trait SigningKeyStore: Send + Sync {
    /// Global token signing keys, newest first.
    async fn list_token_signing_keys(&self) -> Result<Vec<SigningKey>>;

    /// Insert a new token signing key and make it the only active one.
    async fn create_token_signing_key(
        &self,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey>;

    async fn list_auto_rotate_realms(&self) -> Result<Vec<Realm>>;

    /// Verification signing keys of a realm, newest first.
    async fn list_realm_signing_keys(&self, realm_id: Uuid) -> Result<Vec<SigningKey>>;

    /// Insert a new, inactive verification signing key.
    async fn create_realm_signing_key(
        &self,
        realm_id: Uuid,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey>;

    /// Activate `key_id` and deactivate whichever key of the realm was active.
    async fn activate_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<()>;

    async fn destroy_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        actor: &Actor,
    ) -> Result<()>;
}

/// Upstream versioned blob store holding the key material itself.
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Store `value` as a new version below `parent` and return its reference.
    async fn create_version(&self, parent: &str, value: &[u8]) -> Result<String>;

    async fn get_value(&self, reference: &str) -> Result<Vec<u8>>;

    async fn destroy_version(&self, reference: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Someone else holds the lock for the current interval.
    TooEarly,
}

/// Cross-instance try-lock with a minimum re-acquisition interval.
#[async_trait]
pub trait RotationLock: Send + Sync {
    /// Never blocks; backing-store faults are errors.
    async fn try_lock(&self, name: &str, min_ttl: Duration, now: DateTime<Utc>)
        -> Result<LockOutcome>;
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    async fn list_secrets(&self, secret_type: SecretType) -> Result<Vec<Secret>> {
        (**self).list_secrets(secret_type).await
    }

    async fn list_secrets_unscoped(&self, secret_type: SecretType) -> Result<Vec<Secret>> {
        (**self).list_secrets_unscoped(secret_type).await
    }

    async fn create_secret(&self, secret: NewSecret, actor: &Actor) -> Result<Secret> {
        (**self).create_secret(secret, actor).await
    }

    async fn create_secrets(
        &self,
        secrets: Vec<NewSecret>,
        actor: &Actor,
    ) -> Result<Vec<Secret>> {
        (**self).create_secrets(secrets, actor).await
    }

    async fn save_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        (**self).save_secret(secret, actor).await
    }

    async fn soft_delete_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        (**self).soft_delete_secret(secret, actor).await
    }

    async fn purge_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        (**self).purge_secret(secret, actor).await
    }
}

#[async_trait]
impl<T: SigningKeyStore + ?Sized> SigningKeyStore for Arc<T> {
    async fn list_token_signing_keys(&self) -> Result<Vec<SigningKey>> {
        (**self).list_token_signing_keys().await
    }

    async fn create_token_signing_key(
        &self,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey> {
        (**self).create_token_signing_key(kid, created_at, actor).await
    }

    async fn list_auto_rotate_realms(&self) -> Result<Vec<Realm>> {
        (**self).list_auto_rotate_realms().await
    }

    async fn list_realm_signing_keys(&self, realm_id: Uuid) -> Result<Vec<SigningKey>> {
        (**self).list_realm_signing_keys(realm_id).await
    }

    async fn create_realm_signing_key(
        &self,
        realm_id: Uuid,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey> {
        (**self)
            .create_realm_signing_key(realm_id, kid, created_at, actor)
            .await
    }

    async fn activate_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<()> {
        (**self)
            .activate_realm_signing_key(realm_id, key_id, at, actor)
            .await
    }

    async fn destroy_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        actor: &Actor,
    ) -> Result<()> {
        (**self)
            .destroy_realm_signing_key(realm_id, key_id, actor)
            .await
    }
}

#[async_trait]
impl<T: SecretManager + ?Sized> SecretManager for Arc<T> {
    async fn create_version(&self, parent: &str, value: &[u8]) -> Result<String> {
        (**self).create_version(parent, value).await
    }

    async fn get_value(&self, reference: &str) -> Result<Vec<u8>> {
        (**self).get_value(reference).await
    }

    async fn destroy_version(&self, reference: &str) -> Result<()> {
        (**self).destroy_version(reference).await
    }
}

#[async_trait]
impl<T: RotationLock + ?Sized> RotationLock for Arc<T> {
    async fn try_lock(
        &self,
        name: &str,
        min_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        (**self).try_lock(name, min_ttl, now).await
    }
}

//! In-process implementations of the rotation seams.
//!
//! Used by tests and by `--in-memory` development mode. Each store keeps the
//! audit trail it emitted so callers can assert on who changed what.

use crate::rotation::{
    audit::{self, Actor, AuditAction},
    secret::{NewSecret, Secret, SecretState, SecretType},
    signing_key::{Realm, SigningKey},
    store::{LockOutcome, RotationLock, SecretManager, SecretStore, SigningKeyStore},
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};
use ulid::Ulid;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub resource: String,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("Poisoned lock"))
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[derive(Default)]
struct SecretsInner {
    secrets: Vec<Secret>,
    audit: Vec<AuditEntry>,
    // inserts left before the next one is rejected
    failing_insert: Option<usize>,
}

fn new_record(secret: NewSecret) -> Secret {
    Secret::from_parts(
        Uuid::new_v4(),
        secret.secret_type,
        secret.reference,
        secret.active,
        secret.created_at,
        secret.created_at,
        None,
    )
}

impl SecretsInner {
    fn admit_insert(&mut self) -> Result<()> {
        match self.failing_insert {
            Some(0) => {
                self.failing_insert = None;
                bail!("secret store rejected insert");
            }
            Some(left) => {
                self.failing_insert = Some(left - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn log(&mut self, actor: &Actor, action: AuditAction, secret: &Secret) {
        let resource = audit::secret_resource(secret.secret_type, secret.id);
        audit::record(actor, action, &resource);
        self.audit.push(AuditEntry {
            actor: actor.to_string(),
            action,
            resource,
        });
    }

    fn position(&self, secret: &Secret) -> Result<usize> {
        self.secrets
            .iter()
            .position(|s| s.id == secret.id)
            .ok_or_else(|| anyhow!("secret {} not found", secret.id))
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    inner: Mutex<SecretsInner>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded so far, oldest first.
    ///
    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn audit_trail(&self) -> Result<Vec<AuditEntry>> {
        Ok(lock(&self.inner)?.audit.clone())
    }

    /// Reject one insert after `successes` more have gone through.
    ///
    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn fail_insert_after(&self, successes: usize) -> Result<()> {
        lock(&self.inner)?.failing_insert = Some(successes);
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn list_secrets(&self, secret_type: SecretType) -> Result<Vec<Secret>> {
        let mut secrets: Vec<Secret> = lock(&self.inner)?
            .secrets
            .iter()
            .filter(|s| s.secret_type == secret_type && s.deleted_at().is_none())
            .cloned()
            .collect();
        newest_first(&mut secrets, |s| s.created_at);
        Ok(secrets)
    }

    async fn list_secrets_unscoped(&self, secret_type: SecretType) -> Result<Vec<Secret>> {
        let mut secrets: Vec<Secret> = lock(&self.inner)?
            .secrets
            .iter()
            .filter(|s| s.secret_type == secret_type)
            .cloned()
            .collect();
        newest_first(&mut secrets, |s| s.created_at);
        Ok(secrets)
    }

    async fn create_secret(&self, secret: NewSecret, actor: &Actor) -> Result<Secret> {
        let mut inner = lock(&self.inner)?;
        inner.admit_insert()?;

        let created = new_record(secret);
        inner.secrets.push(created.clone());
        inner.log(actor, AuditAction::CreateSecret, &created);
        Ok(created)
    }

    async fn create_secrets(
        &self,
        secrets: Vec<NewSecret>,
        actor: &Actor,
    ) -> Result<Vec<Secret>> {
        let mut inner = lock(&self.inner)?;

        let mut created = Vec::with_capacity(secrets.len());
        for secret in secrets {
            inner.admit_insert()?;
            created.push(new_record(secret));
        }

        for secret in &created {
            inner.secrets.push(secret.clone());
            inner.log(actor, AuditAction::CreateSecret, secret);
        }
        Ok(created)
    }

    async fn save_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        let action = match secret.state() {
            SecretState::Active => AuditAction::ActivateSecret,
            SecretState::Inactive => AuditAction::DeactivateSecret,
            state => bail!("secret {} cannot be saved while {}", secret.id, state.as_str()),
        };

        let mut inner = lock(&self.inner)?;
        let index = inner.position(secret)?;
        inner.secrets[index] = secret.clone();
        inner.log(actor, action, secret);
        Ok(())
    }

    async fn soft_delete_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        if secret.deleted_at().is_none() {
            bail!("secret {} is not marked for deletion", secret.id);
        }

        let mut inner = lock(&self.inner)?;
        let index = inner.position(secret)?;
        inner.secrets[index] = secret.clone();
        inner.log(actor, AuditAction::SoftDeleteSecret, secret);
        Ok(())
    }

    async fn purge_secret(&self, secret: &Secret, actor: &Actor) -> Result<()> {
        if secret.state() != SecretState::Purged {
            bail!("secret {} is not purged", secret.id);
        }

        let mut inner = lock(&self.inner)?;
        let index = inner.position(secret)?;
        inner.secrets.remove(index);
        inner.log(actor, AuditAction::PurgeSecret, secret);
        Ok(())
    }
}

#[derive(Default)]
struct SigningKeysInner {
    token_keys: Vec<SigningKey>,
    realms: Vec<Realm>,
    realm_keys: HashMap<Uuid, Vec<SigningKey>>,
    failing_realms: HashSet<Uuid>,
    audit: Vec<AuditEntry>,
}

impl SigningKeysInner {
    fn log(&mut self, actor: &Actor, action: AuditAction, owner: &str, key_id: Uuid) {
        let resource = audit::signing_key_resource(owner, key_id);
        audit::record(actor, action, &resource);
        self.audit.push(AuditEntry {
            actor: actor.to_string(),
            action,
            resource,
        });
    }
}

#[derive(Default)]
pub struct MemorySigningKeyStore {
    inner: Mutex<SigningKeysInner>,
}

impl MemorySigningKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn add_realm(&self, name: &str, auto_rotate_verification_keys: bool) -> Result<Realm> {
        let realm = Realm {
            id: Uuid::new_v4(),
            name: name.to_string(),
            auto_rotate_verification_keys,
        };
        lock(&self.inner)?.realms.push(realm.clone());
        Ok(realm)
    }

    /// Make every subsequent key creation for `realm_id` fail.
    ///
    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn fail_realm(&self, realm_id: Uuid) -> Result<()> {
        lock(&self.inner)?.failing_realms.insert(realm_id);
        Ok(())
    }

    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn audit_trail(&self) -> Result<Vec<AuditEntry>> {
        Ok(lock(&self.inner)?.audit.clone())
    }
}

fn new_key(kid: &str, active: bool, created_at: DateTime<Utc>) -> SigningKey {
    SigningKey {
        id: Uuid::new_v4(),
        kid: kid.to_string(),
        active,
        created_at,
        updated_at: created_at,
    }
}

#[async_trait]
impl SigningKeyStore for MemorySigningKeyStore {
    async fn list_token_signing_keys(&self) -> Result<Vec<SigningKey>> {
        let mut keys = lock(&self.inner)?.token_keys.clone();
        newest_first(&mut keys, |k| k.created_at);
        Ok(keys)
    }

    async fn create_token_signing_key(
        &self,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey> {
        let key = new_key(kid, true, created_at);

        let mut inner = lock(&self.inner)?;
        for existing in inner.token_keys.iter_mut().filter(|k| k.active) {
            existing.active = false;
            existing.updated_at = created_at;
        }
        inner.token_keys.push(key.clone());
        inner.log(actor, AuditAction::CreateSigningKey, "token", key.id);
        Ok(key)
    }

    async fn list_auto_rotate_realms(&self) -> Result<Vec<Realm>> {
        Ok(lock(&self.inner)?
            .realms
            .iter()
            .filter(|r| r.auto_rotate_verification_keys)
            .cloned()
            .collect())
    }

    async fn list_realm_signing_keys(&self, realm_id: Uuid) -> Result<Vec<SigningKey>> {
        let mut keys = lock(&self.inner)?
            .realm_keys
            .get(&realm_id)
            .cloned()
            .unwrap_or_default();
        newest_first(&mut keys, |k| k.created_at);
        Ok(keys)
    }

    async fn create_realm_signing_key(
        &self,
        realm_id: Uuid,
        kid: &str,
        created_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<SigningKey> {
        let mut inner = lock(&self.inner)?;
        if inner.failing_realms.contains(&realm_id) {
            bail!("realm {realm_id} is unavailable");
        }
        if !inner.realms.iter().any(|r| r.id == realm_id) {
            bail!("realm {realm_id} not found");
        }

        let key = new_key(kid, false, created_at);
        inner
            .realm_keys
            .entry(realm_id)
            .or_default()
            .push(key.clone());
        inner.log(
            actor,
            AuditAction::CreateSigningKey,
            &realm_id.to_string(),
            key.id,
        );
        Ok(key)
    }

    async fn activate_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        let keys = inner
            .realm_keys
            .get_mut(&realm_id)
            .ok_or_else(|| anyhow!("realm {realm_id} has no signing keys"))?;
        if !keys.iter().any(|k| k.id == key_id) {
            bail!("signing key {key_id} not found in realm {realm_id}");
        }

        for key in keys.iter_mut() {
            if key.id == key_id {
                key.active = true;
                key.updated_at = at;
            } else if key.active {
                key.active = false;
                key.updated_at = at;
            }
        }
        inner.log(
            actor,
            AuditAction::ActivateSigningKey,
            &realm_id.to_string(),
            key_id,
        );
        Ok(())
    }

    async fn destroy_realm_signing_key(
        &self,
        realm_id: Uuid,
        key_id: Uuid,
        actor: &Actor,
    ) -> Result<()> {
        let mut inner = lock(&self.inner)?;
        let keys = inner
            .realm_keys
            .get_mut(&realm_id)
            .ok_or_else(|| anyhow!("realm {realm_id} has no signing keys"))?;
        let index = keys
            .iter()
            .position(|k| k.id == key_id)
            .ok_or_else(|| anyhow!("signing key {key_id} not found in realm {realm_id}"))?;
        keys.remove(index);
        inner.log(
            actor,
            AuditAction::DestroySigningKey,
            &realm_id.to_string(),
            key_id,
        );
        Ok(())
    }
}

#[derive(Default)]
struct ManagerInner {
    versions: HashMap<String, Vec<u8>>,
    unavailable: bool,
}

/// Versioned blob store kept in memory.
#[derive(Default)]
pub struct MemorySecretManager {
    inner: Mutex<ManagerInner>,
}

impl MemorySecretManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value under a fixed reference.
    ///
    /// # Errors
    /// Returns an error if the manager lock is poisoned.
    pub fn put(&self, reference: &str, value: &[u8]) -> Result<()> {
        lock(&self.inner)?
            .versions
            .insert(reference.to_string(), value.to_vec());
        Ok(())
    }

    /// Simulate an outage; every call fails while set.
    ///
    /// # Errors
    /// Returns an error if the manager lock is poisoned.
    pub fn set_unavailable(&self, unavailable: bool) -> Result<()> {
        lock(&self.inner)?.unavailable = unavailable;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the manager lock is poisoned.
    pub fn version_count(&self) -> Result<usize> {
        Ok(lock(&self.inner)?.versions.len())
    }

    fn available(&self) -> Result<MutexGuard<'_, ManagerInner>> {
        let inner = lock(&self.inner)?;
        if inner.unavailable {
            bail!("secret manager unavailable");
        }
        Ok(inner)
    }
}

#[async_trait]
impl SecretManager for MemorySecretManager {
    async fn create_version(&self, parent: &str, value: &[u8]) -> Result<String> {
        let reference = format!("{}/{}", parent.trim_end_matches('/'), Ulid::new());
        self.available()?
            .versions
            .insert(reference.clone(), value.to_vec());
        Ok(reference)
    }

    async fn get_value(&self, reference: &str) -> Result<Vec<u8>> {
        self.available()?
            .versions
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("secret version {reference} does not exist"))
    }

    async fn destroy_version(&self, reference: &str) -> Result<()> {
        self.available()?.versions.remove(reference);
        Ok(())
    }
}

#[derive(Default)]
struct LockInner {
    expires: HashMap<String, DateTime<Utc>>,
    unavailable: bool,
}

#[derive(Default)]
pub struct MemoryLock {
    inner: Mutex<LockInner>,
}

impl MemoryLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns an error if the lock table is poisoned.
    pub fn set_unavailable(&self, unavailable: bool) -> Result<()> {
        lock(&self.inner)?.unavailable = unavailable;
        Ok(())
    }
}

#[async_trait]
impl RotationLock for MemoryLock {
    async fn try_lock(
        &self,
        name: &str,
        min_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        let mut inner = lock(&self.inner)?;
        if inner.unavailable {
            bail!("lock store unavailable");
        }

        if let Some(expires_at) = inner.expires.get(name) {
            if *expires_at > now {
                return Ok(LockOutcome::TooEarly);
            }
        }

        inner.expires.insert(name.to_string(), now + min_ttl);
        Ok(LockOutcome::Acquired)
    }
}

//! Token and realm verification signing key rotation.
//!
//! Verification keys are published to relying parties before anything signs
//! with them: a new realm key stays inactive for the activation delay, and the
//! key it replaces is kept around for the same delay before being destroyed.
//! Token signing keys have no such dwell time, a new token key is active as
//! soon as it is written.

use crate::rotation::{
    engine::{RotationEngine, RotationRun, SIGNING_KEYS_LOCK},
    error::RotationErrors,
    signing_key::{Realm, SigningKey},
    store::LockOutcome,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info, instrument, warn};

const SIGNING_KEY_BYTES: usize = 32;

impl RotationEngine {
    /// Rotate the token key and every auto-rotating realm unless another run
    /// happened within `min_ttl`.
    ///
    /// # Errors
    /// Returns an error only when the lock store itself fails.
    pub async fn run_signing_key_rotation(&self) -> Result<RotationRun> {
        if self.try_lock(SIGNING_KEYS_LOCK).await? == LockOutcome::TooEarly {
            return Ok(RotationRun::TooEarly);
        }

        let mut errors = RotationErrors::new();
        if let Err(e) = self.rotate_token_signing_key().await {
            errors.push(e.context("failed to rotate token signing key"));
        }
        errors.extend(self.rotate_verification_keys().await);

        Ok(RotationRun::Completed(errors))
    }

    /// Create a new token signing key when none is active or the active one
    /// is older than the configured maximum age.
    ///
    /// # Errors
    /// Returns an error if the keys cannot be listed or the new key cannot be stored.
    #[instrument(skip(self))]
    pub async fn rotate_token_signing_key(&self) -> Result<()> {
        let now = self.clock.now();
        let max_age = self.config.token_signing_key_max_age();

        let keys = self
            .backends
            .signing_keys
            .list_token_signing_keys()
            .await
            .context("failed to list token signing keys")?;

        if let Some(active) = keys.iter().find(|k| k.active) {
            if now - active.created_at <= max_age {
                debug!(kid = %active.kid, "token signing key is current");
                return Ok(());
            }
        }

        let parent = format!("{}/token", self.config.signing_keys_parent());
        let kid = self.create_key_material(&parent).await?;
        let key = self
            .backends
            .signing_keys
            .create_token_signing_key(&kid, now, &self.actor)
            .await
            .context("failed to save token signing key")?;

        info!(id = %key.id, kid = %key.kid, "created token signing key");
        Ok(())
    }

    /// Rotate verification signing keys of every realm that opted in.
    ///
    /// Keys are created for all realms before any realm is activated, so a
    /// key created in this pass is never activated by it.
    pub async fn rotate_verification_keys(&self) -> RotationErrors {
        let mut errors = RotationErrors::new();
        let now = self.clock.now();

        let realms = match self.backends.signing_keys.list_auto_rotate_realms().await {
            Ok(realms) => realms,
            Err(e) => {
                errors.push(e.context("failed to list realms"));
                return errors;
            }
        };

        for realm in &realms {
            if let Err(e) = self.create_realm_key(realm, now).await {
                warn!(realm_id = %realm.id, "failed to create verification key: {e:#}");
                errors.push(e.context(format!("realm {}: failed to create signing key", realm.id)));
            }
        }

        for realm in &realms {
            errors.extend(self.activate_and_destroy(realm, now).await);
        }

        errors
    }

    #[instrument(skip(self, realm, now), fields(realm_id = %realm.id))]
    async fn create_realm_key(&self, realm: &Realm, now: DateTime<Utc>) -> Result<()> {
        let keys = self
            .backends
            .signing_keys
            .list_realm_signing_keys(realm.id)
            .await
            .context("failed to list signing keys")?;

        let max_age = self.config.verification_signing_key_max_age();
        let needed = match keys.first() {
            None => true,
            Some(newest) => newest.active && now - newest.created_at > max_age,
        };
        if !needed {
            return Ok(());
        }

        let parent = format!("{}/realms/{}", self.config.signing_keys_parent(), realm.id);
        let kid = self.create_key_material(&parent).await?;
        let key = self
            .backends
            .signing_keys
            .create_realm_signing_key(realm.id, &kid, now, &self.actor)
            .await
            .context("failed to save signing key")?;

        info!(id = %key.id, kid = %key.kid, "created verification signing key");
        Ok(())
    }

    #[instrument(skip(self, realm, now), fields(realm_id = %realm.id))]
    async fn activate_and_destroy(&self, realm: &Realm, now: DateTime<Utc>) -> RotationErrors {
        let mut errors = RotationErrors::new();
        let delay = self.config.verification_activation_delay();

        let keys = match self
            .backends
            .signing_keys
            .list_realm_signing_keys(realm.id)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                errors.push(e.context(format!("realm {}: failed to list signing keys", realm.id)));
                return errors;
            }
        };

        let Some((newest, older)) = keys.split_first() else {
            return errors;
        };

        if let Some(activated) = pending_activation(newest, delay, now) {
            if let Err(e) = self
                .backends
                .signing_keys
                .activate_realm_signing_key(realm.id, activated.id, now, &self.actor)
                .await
            {
                errors.push(
                    e.context(format!("realm {}: failed to activate signing key", realm.id)),
                );
                return errors;
            }
            info!(id = %activated.id, "activated verification signing key");
        }

        for key in older {
            // listed before this pass activated anything, so a key displaced
            // just now still reads as active here
            if key.active || now - key.updated_at <= delay {
                continue;
            }
            if let Err(e) = self.destroy_realm_key(realm, key).await {
                errors.push(e.context(format!(
                    "realm {}: failed to destroy signing key {}",
                    realm.id, key.id
                )));
            }
        }

        errors
    }

    async fn destroy_realm_key(&self, realm: &Realm, key: &SigningKey) -> Result<()> {
        self.backends
            .manager
            .destroy_version(&key.kid)
            .await
            .context("failed to destroy key material")?;
        self.backends
            .signing_keys
            .destroy_realm_signing_key(realm.id, key.id, &self.actor)
            .await?;
        info!(id = %key.id, "destroyed verification signing key");
        Ok(())
    }

    async fn create_key_material(&self, parent: &str) -> Result<String> {
        let mut material = vec![0u8; SIGNING_KEY_BYTES];
        OsRng.fill_bytes(&mut material);

        self.backends
            .manager
            .create_version(parent, &material)
            .await
            .context("failed to create key material")
    }
}

fn pending_activation(
    newest: &SigningKey,
    delay: Duration,
    now: DateTime<Utc>,
) -> Option<&SigningKey> {
    (!newest.active && now - newest.created_at > delay).then_some(newest)
}

#[cfg(test)]
mod tests {
    use crate::rotation::{
        clock::ManualClock,
        config::RotationConfig,
        engine::{Backends, RotationEngine, RotationRun},
        memory::{MemoryLock, MemorySecretManager, MemorySecretStore, MemorySigningKeyStore},
        store::{SecretManager, SigningKeyStore},
    };
    use chrono::Duration;
    use std::sync::Arc;

    struct Harness {
        engine: RotationEngine,
        keys: Arc<MemorySigningKeyStore>,
        manager: Arc<MemorySecretManager>,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let keys = Arc::new(MemorySigningKeyStore::new());
        let manager = Arc::new(MemorySecretManager::new());
        let clock = ManualClock::default();

        let engine = RotationEngine::new(
            Backends {
                secrets: Arc::new(MemorySecretStore::new()),
                signing_keys: keys.clone(),
                manager: manager.clone(),
                lock: Arc::new(MemoryLock::new()),
            },
            Arc::new(clock.clone()),
            RotationConfig::new()
                .with_token_signing_key_max_age(Duration::days(30))
                .with_verification_signing_key_max_age(Duration::days(30))
                .with_verification_activation_delay(Duration::hours(1)),
        );

        Harness {
            engine,
            keys,
            manager,
            clock,
        }
    }

    #[tokio::test]
    async fn token_key_is_created_and_rotated_after_max_age() {
        let h = harness();

        h.engine.rotate_token_signing_key().await.unwrap();
        h.engine.rotate_token_signing_key().await.unwrap();
        assert_eq!(h.keys.list_token_signing_keys().await.unwrap().len(), 1);

        h.clock.advance(Duration::days(31));
        h.engine.rotate_token_signing_key().await.unwrap();

        let keys = h.keys.list_token_signing_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.iter().filter(|k| k.active).count(), 1);
        assert!(keys[0].active);
    }

    #[tokio::test]
    async fn token_key_is_active_immediately() {
        // token keys skip the activation delay verification keys observe
        let h = harness();

        h.engine.rotate_token_signing_key().await.unwrap();
        h.clock.advance(Duration::days(31));
        h.engine.rotate_token_signing_key().await.unwrap();

        let keys = h.keys.list_token_signing_keys().await.unwrap();
        assert!(keys[0].active);
        assert_eq!(keys[0].created_at, keys[0].updated_at);
        assert!(!keys[1].active);
    }

    #[tokio::test]
    async fn verification_key_dwell_time() {
        let h = harness();
        let realm = h.keys.add_realm("acme", true).unwrap();

        // first key waits for the activation delay too
        assert!(h.engine.rotate_verification_keys().await.is_empty());
        let keys = h.keys.list_realm_signing_keys(realm.id).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].active);

        h.clock.advance(Duration::minutes(61));
        assert!(h.engine.rotate_verification_keys().await.is_empty());
        let first = h.keys.list_realm_signing_keys(realm.id).await.unwrap()[0].clone();
        assert!(first.active);

        // a replacement is created but not activated in the same pass
        h.clock.advance(Duration::days(31));
        assert!(h.engine.rotate_verification_keys().await.is_empty());
        let keys = h.keys.list_realm_signing_keys(realm.id).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys[0].active);
        assert!(keys[1].active);

        h.clock.advance(Duration::minutes(61));
        assert!(h.engine.rotate_verification_keys().await.is_empty());
        let keys = h.keys.list_realm_signing_keys(realm.id).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].active);
        assert!(!keys[1].active);
        assert_eq!(keys[1].id, first.id);

        // the displaced key is destroyed only after it has been inactive for the delay
        h.clock.advance(Duration::minutes(30));
        assert!(h.engine.rotate_verification_keys().await.is_empty());
        assert_eq!(h.keys.list_realm_signing_keys(realm.id).await.unwrap().len(), 2);

        h.clock.advance(Duration::minutes(31));
        assert!(h.engine.rotate_verification_keys().await.is_empty());
        let keys = h.keys.list_realm_signing_keys(realm.id).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].active);
        assert!(h.manager.get_value(&first.kid).await.is_err());
        assert!(h.manager.get_value(&keys[0].kid).await.is_ok());
    }

    #[tokio::test]
    async fn realms_without_auto_rotation_are_skipped() {
        let h = harness();
        let manual = h.keys.add_realm("manual", false).unwrap();

        assert!(h.engine.rotate_verification_keys().await.is_empty());
        assert!(h
            .keys
            .list_realm_signing_keys(manual.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn one_failing_realm_does_not_block_others() {
        let h = harness();
        let broken = h.keys.add_realm("broken", true).unwrap();
        let healthy = h.keys.add_realm("healthy", true).unwrap();
        h.keys.fail_realm(broken.id).unwrap();

        let errors = h.engine.rotate_verification_keys().await;
        assert_eq!(errors.len(), 1);
        assert!(errors.messages()[0].contains(&broken.id.to_string()));

        assert_eq!(
            h.keys.list_realm_signing_keys(healthy.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn lock_gates_signing_key_runs() {
        let h = harness();
        h.keys.add_realm("acme", true).unwrap();

        assert!(matches!(
            h.engine.run_signing_key_rotation().await.unwrap(),
            RotationRun::Completed(errors) if errors.is_empty()
        ));
        assert!(matches!(
            h.engine.run_signing_key_rotation().await.unwrap(),
            RotationRun::TooEarly
        ));
        assert_eq!(h.keys.list_token_signing_keys().await.unwrap().len(), 1);

        let trail = h.keys.audit_trail().unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|entry| entry.actor == "rotation"));
    }
}

use chrono::Duration;

pub const DEFAULT_SECRETS_PARENT: &str = "rotator/secrets";
pub const DEFAULT_SIGNING_KEYS_PARENT: &str = "rotator/signing-keys";

/// Rotation timings.
///
/// A zero `cookie_key_min_ttl` disables cookie key rotation after the first
/// generation; a zero `cookie_key_max_ttl` never expires the active one.
#[derive(Clone, Debug)]
pub struct RotationConfig {
    min_ttl: Duration,
    secret_activation_delay: Duration,
    secret_destroy_ttl: Duration,
    cookie_key_min_ttl: Duration,
    cookie_key_max_ttl: Duration,
    token_signing_key_max_age: Duration,
    verification_signing_key_max_age: Duration,
    verification_activation_delay: Duration,
    secrets_parent: String,
    signing_keys_parent: String,
}

impl RotationConfig {
    /// Defaults: rotate at most every 15m, activate secrets after 5m, destroy
    /// soft-deleted secrets after 24h, rotate cookie keys every 30 days and
    /// signing keys every 30 days with a 1h verification key activation delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_ttl: Duration::minutes(15),
            secret_activation_delay: Duration::minutes(5),
            secret_destroy_ttl: Duration::hours(24),
            cookie_key_min_ttl: Duration::days(30),
            cookie_key_max_ttl: Duration::zero(),
            token_signing_key_max_age: Duration::days(30),
            verification_signing_key_max_age: Duration::days(30),
            verification_activation_delay: Duration::hours(1),
            secrets_parent: DEFAULT_SECRETS_PARENT.to_string(),
            signing_keys_parent: DEFAULT_SIGNING_KEYS_PARENT.to_string(),
        }
    }

    #[must_use]
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_secret_activation_delay(mut self, delay: Duration) -> Self {
        self.secret_activation_delay = delay;
        self
    }

    #[must_use]
    pub fn with_secret_destroy_ttl(mut self, ttl: Duration) -> Self {
        self.secret_destroy_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_cookie_key_min_ttl(mut self, ttl: Duration) -> Self {
        self.cookie_key_min_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_cookie_key_max_ttl(mut self, ttl: Duration) -> Self {
        self.cookie_key_max_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_signing_key_max_age(mut self, age: Duration) -> Self {
        self.token_signing_key_max_age = age;
        self
    }

    #[must_use]
    pub fn with_verification_signing_key_max_age(mut self, age: Duration) -> Self {
        self.verification_signing_key_max_age = age;
        self
    }

    #[must_use]
    pub fn with_verification_activation_delay(mut self, delay: Duration) -> Self {
        self.verification_activation_delay = delay;
        self
    }

    #[must_use]
    pub fn with_secrets_parent(mut self, parent: impl Into<String>) -> Self {
        self.secrets_parent = parent.into();
        self
    }

    #[must_use]
    pub fn with_signing_keys_parent(mut self, parent: impl Into<String>) -> Self {
        self.signing_keys_parent = parent.into();
        self
    }

    /// Minimum interval between two rotation runs, enforced by the lock.
    #[must_use]
    pub const fn min_ttl(&self) -> Duration {
        self.min_ttl
    }

    #[must_use]
    pub const fn secret_activation_delay(&self) -> Duration {
        self.secret_activation_delay
    }

    #[must_use]
    pub const fn secret_destroy_ttl(&self) -> Duration {
        self.secret_destroy_ttl
    }

    #[must_use]
    pub const fn cookie_key_min_ttl(&self) -> Duration {
        self.cookie_key_min_ttl
    }

    #[must_use]
    pub const fn cookie_key_max_ttl(&self) -> Duration {
        self.cookie_key_max_ttl
    }

    #[must_use]
    pub const fn token_signing_key_max_age(&self) -> Duration {
        self.token_signing_key_max_age
    }

    #[must_use]
    pub const fn verification_signing_key_max_age(&self) -> Duration {
        self.verification_signing_key_max_age
    }

    #[must_use]
    pub const fn verification_activation_delay(&self) -> Duration {
        self.verification_activation_delay
    }

    #[must_use]
    pub fn secrets_parent(&self) -> &str {
        &self.secrets_parent
    }

    #[must_use]
    pub fn signing_keys_parent(&self) -> &str {
        &self.signing_keys_parent
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RotationConfig::new();
        assert_eq!(config.min_ttl(), Duration::minutes(15));
        assert_eq!(config.secret_activation_delay(), Duration::minutes(5));
        assert_eq!(config.secret_destroy_ttl(), Duration::hours(24));
        assert_eq!(config.cookie_key_max_ttl(), Duration::zero());
        assert_eq!(config.secrets_parent(), DEFAULT_SECRETS_PARENT);
    }

    #[test]
    fn builder_overrides() {
        let config = RotationConfig::new()
            .with_min_ttl(Duration::seconds(1))
            .with_cookie_key_max_ttl(Duration::days(60))
            .with_signing_keys_parent("custom/keys");
        assert_eq!(config.min_ttl(), Duration::seconds(1));
        assert_eq!(config.cookie_key_max_ttl(), Duration::days(60));
        assert_eq!(config.signing_keys_parent(), "custom/keys");
    }
}

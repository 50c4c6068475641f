//! Audit trail for key material mutations.
//!
//! Every store mutation names the [`Actor`] that caused it. Stores call
//! [`record`] after a successful write, which emits a structured `tracing`
//! event that log pipelines can forward as the audit log.

use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Who or what triggered a change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor(Arc<str>);

impl Actor {
    pub const SYSTEM: &'static str = "rotation";

    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// The scheduled rotation process.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Self::SYSTEM)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    CreateSecret,
    ActivateSecret,
    DeactivateSecret,
    SoftDeleteSecret,
    PurgeSecret,
    CreateSigningKey,
    ActivateSigningKey,
    DestroySigningKey,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            Self::CreateSecret => "create_secret",
            Self::ActivateSecret => "activate_secret",
            Self::DeactivateSecret => "deactivate_secret",
            Self::SoftDeleteSecret => "soft_delete_secret",
            Self::PurgeSecret => "purge_secret",
            Self::CreateSigningKey => "create_signing_key",
            Self::ActivateSigningKey => "activate_signing_key",
            Self::DestroySigningKey => "destroy_signing_key",
        };
        f.write_str(action)
    }
}

/// Emit one audit event.
pub fn record(actor: &Actor, action: AuditAction, resource: &str) {
    tracing::info!(
        audit.actor = %actor,
        audit.action = %action,
        audit.resource = %resource,
        "audit_event"
    );
}

#[must_use]
pub fn secret_resource(secret_type: impl fmt::Display, id: Uuid) -> String {
    format!("secret:{secret_type}/{id}")
}

#[must_use]
pub fn signing_key_resource(owner: impl fmt::Display, id: Uuid) -> String {
    format!("signing_key:{owner}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::system().to_string(), "rotation");
        assert_eq!(Actor::new("admin@example.com").name(), "admin@example.com");
    }

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::CreateSecret.to_string(), "create_secret");
        assert_eq!(AuditAction::SoftDeleteSecret.to_string(), "soft_delete_secret");
        assert_eq!(AuditAction::DestroySigningKey.to_string(), "destroy_signing_key");
    }

    #[test]
    fn test_resource_helpers() {
        let id = Uuid::nil();
        assert_eq!(
            secret_resource("cookie_keys", id),
            format!("secret:cookie_keys/{id}")
        );
        assert_eq!(
            signing_key_resource("token", id),
            format!("signing_key:token/{id}")
        );
    }
}

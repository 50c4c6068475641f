//! Secret generations and their lifecycle.
//!
//! ```text
//!   Inactive ──activate──► Active ──deactivate──► Inactive ──mark_for_deletion──► PendingDeletion ──purge──► Purged
//! ```
//!
//! An inactive record whose `created_at == updated_at` has never been touched
//! and is waiting for activation; once `updated_at` diverges the record has
//! been active and is on its way out. The engine relies on that distinction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Category of key material, each rotated with its own parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKeyDatabaseHmac,
    ApiKeySignatureHmac,
    CookieKeys,
    PhoneNumberDatabaseHmac,
    VerificationCodeDatabaseHmac,
}

impl SecretType {
    pub const ALL: [Self; 5] = [
        Self::ApiKeyDatabaseHmac,
        Self::ApiKeySignatureHmac,
        Self::CookieKeys,
        Self::PhoneNumberDatabaseHmac,
        Self::VerificationCodeDatabaseHmac,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiKeyDatabaseHmac => "api_key_database_hmac",
            Self::ApiKeySignatureHmac => "api_key_signature_hmac",
            Self::CookieKeys => "cookie_keys",
            Self::PhoneNumberDatabaseHmac => "phone_number_database_hmac",
            Self::VerificationCodeDatabaseHmac => "verification_code_database_hmac",
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| format!("unknown secret type: {value}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretState {
    Active,
    Inactive,
    PendingDeletion { deleted_at: DateTime<Utc> },
    Purged,
}

impl SecretState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::PendingDeletion { .. } => "pending_deletion",
            Self::Purged => "purged",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("secret {id}: cannot {action} while {from}")]
pub struct TransitionError {
    pub id: Uuid,
    pub action: &'static str,
    pub from: &'static str,
}

/// One generation of key material for a [`SecretType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Secret {
    pub id: Uuid,
    pub secret_type: SecretType,
    /// Opaque pointer into the upstream secret manager.
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    state: SecretState,
}

impl Secret {
    /// Rebuild a record from its persisted columns.
    #[must_use]
    pub fn from_parts(
        id: Uuid,
        secret_type: SecretType,
        reference: String,
        active: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        let state = match (deleted_at, active) {
            (Some(deleted_at), _) => SecretState::PendingDeletion { deleted_at },
            (None, true) => SecretState::Active,
            (None, false) => SecretState::Inactive,
        };

        Self {
            id,
            secret_type,
            reference,
            created_at,
            updated_at,
            state,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SecretState {
        self.state
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, SecretState::Active)
    }

    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SecretState::PendingDeletion { deleted_at } => Some(deleted_at),
            _ => None,
        }
    }

    /// True once the record has been touched after creation.
    #[must_use]
    pub fn was_active(&self) -> bool {
        self.created_at != self.updated_at
    }

    /// # Errors
    /// Returns an error unless the secret is inactive.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition("activate", SecretState::Inactive, SecretState::Active)?;
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    /// Returns an error unless the secret is active.
    pub fn deactivate(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition("deactivate", SecretState::Active, SecretState::Inactive)?;
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    /// Returns an error unless the secret is inactive.
    pub fn mark_for_deletion(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(
            "mark for deletion",
            SecretState::Inactive,
            SecretState::PendingDeletion { deleted_at: now },
        )
    }

    /// # Errors
    /// Returns an error unless the secret is pending deletion.
    pub fn purge(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, SecretState::PendingDeletion { .. }) {
            return Err(self.refuse("purge"));
        }
        self.state = SecretState::Purged;
        Ok(())
    }

    fn transition(
        &mut self,
        action: &'static str,
        from: SecretState,
        to: SecretState,
    ) -> Result<(), TransitionError> {
        if self.state != from {
            return Err(self.refuse(action));
        }
        self.state = to;
        Ok(())
    }

    fn refuse(&self, action: &'static str) -> TransitionError {
        TransitionError {
            id: self.id,
            action,
            from: self.state.as_str(),
        }
    }
}

/// A generation about to be inserted.
#[derive(Clone, Debug)]
pub struct NewSecret {
    pub secret_type: SecretType,
    pub reference: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

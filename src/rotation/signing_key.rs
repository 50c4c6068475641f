use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One generation of a token or realm verification signing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SigningKey {
    pub id: Uuid,
    /// Upstream reference of the key material, published as the key id.
    pub kid: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tenant that owns its verification signing keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Realm {
    pub id: Uuid,
    pub name: String,
    pub auto_rotate_verification_keys: bool,
}

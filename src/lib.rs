//! # Rotator
//!
//! `rotator` manages the lifecycle of symmetric secrets and signing keys.
//!
//! An external scheduler calls the HTTP triggers at a fixed cadence. Each run
//! takes a cross-instance lock, then moves every generation through creation,
//! activation, expiry, soft deletion and purge based on its persisted
//! timestamps. Key material lives in a Vault KV mount; the database only holds
//! references to it.
//!
//! ## Secrets
//!
//! HMAC keys for API keys, phone numbers and verification codes, plus the
//! cookie signing/encryption pair. Legacy values found in the environment are
//! imported once, on the first run for a type.
//!
//! ## Signing keys
//!
//! A global token signing key, replaced when it grows too old, and per-realm
//! verification signing keys that are published ahead of activation.

pub mod api;
pub mod cli;
pub mod postgres;
pub mod rotation;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

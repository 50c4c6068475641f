pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod legacy;
pub mod memory;
pub mod secret;
pub mod signing;
pub mod signing_key;
pub mod store;

pub use audit::{Actor, AuditAction};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RotationConfig;
pub use engine::{default_secret_specs, Backends, RotationEngine, RotationRun, SecretSpec};
pub use error::RotationErrors;
pub use secret::{NewSecret, Secret, SecretState, SecretType};
pub use signing_key::{Realm, SigningKey};
pub use store::{LockOutcome, RotationLock, SecretManager, SecretStore, SigningKeyStore};

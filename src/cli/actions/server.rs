use crate::{
    api,
    cli::{commands::vault::Options as VaultOptions, globals::GlobalArgs},
    postgres::{self, PostgresStore},
    rotation::{
        memory::{MemoryLock, MemorySecretManager, MemorySecretStore, MemorySigningKeyStore},
        Backends, RotationConfig, RotationEngine, SystemClock,
    },
    vault::{self, kv::VaultSecretManager},
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Where rotation state and key material live.
#[derive(Debug)]
pub enum Storage {
    /// Process memory only, lost on restart.
    InMemory,
    /// Records in Postgres, key material in Vault KV.
    Postgres { dsn: String, vault: VaultOptions },
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub storage: Storage,
    pub rotation: RotationConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if Vault login fails, DB credentials cannot be fetched, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    // renewal tasks report failures here and stop the server
    let (tx, rx) = mpsc::unbounded_channel();

    let (backends, pool) = match args.storage {
        Storage::InMemory => {
            warn!("running with in-memory storage, all keys are lost on restart");
            (memory_backends(), None)
        }
        Storage::Postgres {
            dsn,
            vault: options,
        } => {
            let globals = vault_login(&options).await?;
            debug!("Global args: {:?}", globals);

            vault::renew::try_renew(&globals, tx.clone()).await?;

            let pool = postgres::connect(&database_url(&dsn, &globals)?).await?;
            let store = Arc::new(PostgresStore::new(pool.clone()));
            let backends = Backends {
                secrets: store.clone(),
                signing_keys: store.clone(),
                manager: Arc::new(VaultSecretManager::new(&globals, &options.kv_mount)?),
                lock: store,
            };
            (backends, Some(pool))
        }
    };

    let engine = RotationEngine::new(backends, Arc::new(SystemClock), args.rotation);
    info!(
        min_ttl = engine.config().min_ttl().num_seconds(),
        "rotation engine ready"
    );

    let result = api::new(args.port, engine, pool, rx).await;

    // keep the sender alive while serving
    drop(tx);

    result
}

fn memory_backends() -> Backends {
    Backends {
        secrets: Arc::new(MemorySecretStore::new()),
        signing_keys: Arc::new(MemorySigningKeyStore::new()),
        manager: Arc::new(MemorySecretManager::new()),
        lock: Arc::new(MemoryLock::new()),
    }
}

async fn vault_login(options: &VaultOptions) -> Result<GlobalArgs> {
    let mut globals = GlobalArgs::new(options.url.clone());
    let login_url = vault::approle_login_url(&globals.vault_url)?;

    // If vault wrapped token try to unwrap, otherwise use secret-id.
    let vault_token: String = if let Some(wrapped) = &options.wrapped_token {
        let secret_id = vault::unwrap(&globals.vault_url, wrapped).await?;
        let (token, _) = vault::approle_login(&login_url, &secret_id, &options.role_id).await?;
        token
    } else {
        let secret_id = options
            .secret_id
            .as_deref()
            .ok_or_else(|| anyhow!("Vault secret-id is required"))?;
        let (token, _) = vault::approle_login(&login_url, secret_id, &options.role_id).await?;
        token
    };

    globals.set_token(SecretString::from(vault_token));

    vault::database::database_creds(&mut globals, &options.db_role)
        .await
        .context("Could not get database username and password")?;

    Ok(globals)
}

fn database_url(dsn: &str, globals: &GlobalArgs) -> Result<String> {
    let mut dsn = Url::parse(dsn).context("invalid DSN")?;

    dsn.set_username(&globals.vault_db_username)
        .map_err(|()| anyhow!("Error setting username"))?;

    dsn.set_password(Some(globals.vault_db_password.expose_secret()))
        .map_err(|()| anyhow!("Error setting password"))?;

    Ok(dsn.to_string())
}

//! Background renewal of the Vault token and the database lease.
//!
//! Both tasks sleep for 70-90% of the lease returned by Vault. After three
//! failed attempts they send a [`ShutdownSignal`] so the server stops instead
//! of running on expiring credentials.

use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{anyhow, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::future::Future;
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use tracing::{debug, error, info_span, instrument, warn, Instrument};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownSignal {
    TokenRenewalFailed,
    DbLeaseRenewalFailed,
}

impl ShutdownSignal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenRenewalFailed => "vault_token_renewal_failed",
            Self::DbLeaseRenewalFailed => "vault_db_lease_renewal_failed",
        }
    }
}

async fn post_renewal(
    url: &str,
    token: &SecretString,
    path: &str,
    payload: Value,
) -> Result<Value> {
    let client = vault::client()?;
    let renew_url = vault::endpoint_url(url, path)?;

    let span = info_span!(
        "vault.renew",
        http.method = "POST",
        url = %renew_url
    );
    let response = client
        .post(&renew_url)
        .json(&payload)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    Ok(vault::error_for_status(&renew_url, response)
        .await?
        .json()
        .await?)
}

/// Renew a Vault token
#[instrument(skip(token))]
async fn renew_token(url: &str, token: &SecretString, increment: Option<u64>) -> Result<u64> {
    let payload = json!({
        "increment": increment.unwrap_or(0)
    });

    post_renewal(url, token, "/v1/auth/token/renew-self", payload)
        .await?
        .get("auth")
        .and_then(|v| v.get("lease_duration"))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

#[instrument(skip(token))]
async fn renew_db_lease(
    url: &str,
    token: &SecretString,
    lease_id: &str,
    increment: u64,
) -> Result<u64> {
    let payload = json!({
        "increment": increment,
        "lease_id": lease_id
    });

    post_renewal(url, token, "/v1/sys/leases/renew", payload)
        .await?
        .get("lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Retry `renew` up to three times with exponential backoff, then keep
/// renewing at a jittered fraction of the returned lease.
async fn renewal_loop<F, Fut>(
    what: &'static str,
    signal: ShutdownSignal,
    tx: mpsc::UnboundedSender<ShutdownSignal>,
    renew: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let mut rng = StdRng::from_entropy();
    let mut jittered_lease_duration = Duration::default();

    loop {
        for attempt in 1..=3 {
            let backoff_time = 2u64.pow(attempt - 1);

            if attempt > 1 {
                warn!("Backing off for {} seconds", backoff_time);
                sleep(Duration::from_secs(backoff_time)).await;
            }

            match renew().await {
                Ok(lease_duration) => {
                    let factor = rng.gen_range(70..90);

                    jittered_lease_duration = Duration::from_secs(lease_duration * factor / 100);

                    break;
                }

                Err(e) => {
                    error!("Failed to renew {}: {}", what, e);

                    if attempt == 3 {
                        error!("Failed to renew {} after 3 attempts: {}", what, e);
                        let _ = tx.send(signal);
                        return;
                    }
                }
            }
        }

        debug!(
            "Will renew {} in {} seconds",
            what,
            jittered_lease_duration.as_secs()
        );

        sleep(jittered_lease_duration).await;
    }
}

/// Spawn the token and database lease renewal tasks.
/// # Errors
/// Returns an error if the tasks cannot be initialized.
#[instrument(skip(globals, tx))]
pub async fn try_renew(
    globals: &GlobalArgs,
    tx: mpsc::UnboundedSender<ShutdownSignal>,
) -> Result<()> {
    tokio::spawn({
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let tx = tx.clone();

        async move {
            renewal_loop("token", ShutdownSignal::TokenRenewalFailed, tx, || {
                renew_token(&url, &token, None)
            })
            .await;
        }
    });

    tokio::spawn({
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let lease_id = globals.vault_db_lease_id.clone();
        let lease_duration = globals.vault_db_lease_duration;

        async move {
            renewal_loop("DB lease", ShutdownSignal::DbLeaseRenewalFailed, tx, || {
                renew_db_lease(&url, &token, &lease_id, lease_duration)
            })
            .await;
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::tests::can_bind_localhost;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn shutdown_signal_names() {
        assert_eq!(
            ShutdownSignal::TokenRenewalFailed.as_str(),
            "vault_token_renewal_failed"
        );
        assert_eq!(
            ShutdownSignal::DbLeaseRenewalFailed.as_str(),
            "vault_db_lease_renewal_failed"
        );
    }

    #[tokio::test]
    async fn renew_db_lease_returns_lease_duration() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/sys/leases/renew"))
            .and(body_json(json!({"increment": 3600, "lease_id": "lease"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lease_duration": 3600
            })))
            .mount(&server)
            .await;

        let token = SecretString::from("token".to_string());
        let lease = renew_db_lease(&server.uri(), &token, "lease", 3600)
            .await
            .unwrap();
        assert_eq!(lease, 3600);
    }

    #[tokio::test]
    async fn failed_renewals_signal_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(renewal_loop(
            "token",
            ShutdownSignal::TokenRenewalFailed,
            tx,
            || async { Err::<u64, _>(anyhow!("vault sealed")) },
        ));

        assert_eq!(rx.recv().await, Some(ShutdownSignal::TokenRenewalFailed));
        task.await.unwrap();
    }
}

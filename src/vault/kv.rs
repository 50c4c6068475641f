//! [`SecretManager`] backed by a Vault KV v2 mount.
//!
//! Every generation is its own KV path, `<parent>/<ulid>`, holding the key
//! material base64 encoded under the `value` field. The path below the mount
//! is the reference stored in the database. Destroying a version removes the
//! path's metadata, which wipes every KV version written to it.

use crate::{cli::globals::GlobalArgs, rotation::SecretManager, vault};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{info_span, instrument, Instrument};
use ulid::Ulid;

const VALUE_FIELD: &str = "value";

pub struct VaultSecretManager {
    client: Client,
    url: String,
    token: SecretString,
    mount: String,
}

impl VaultSecretManager {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(globals: &GlobalArgs, mount: &str) -> Result<Self> {
        Ok(Self {
            client: vault::client()?,
            url: globals.vault_url.clone(),
            token: globals.vault_token.clone(),
            mount: mount.trim_matches('/').to_string(),
        })
    }

    fn url_for(&self, kind: &str, reference: &str) -> Result<String> {
        let reference = reference.trim_matches('/');
        if reference.is_empty() {
            return Err(anyhow!("empty secret reference"));
        }
        vault::endpoint_url(&self.url, &format!("/v1/{}/{kind}/{reference}", self.mount))
    }
}

#[async_trait]
impl SecretManager for VaultSecretManager {
    #[instrument(skip(self, value))]
    async fn create_version(&self, parent: &str, value: &[u8]) -> Result<String> {
        let reference = format!("{}/{}", parent.trim_matches('/'), Ulid::new());
        let url = self.url_for("data", &reference)?;

        let payload = json!({
            "options": {"cas": 0},
            "data": {(VALUE_FIELD): Base64::encode_string(value)}
        });

        let span = info_span!("vault.kv.write", http.method = "POST", url = %url);
        let response = self
            .client
            .post(&url)
            .header("X-Vault-Token", self.token.expose_secret())
            .json(&payload)
            .send()
            .instrument(span)
            .await?;
        vault::error_for_status(&url, response).await?;

        Ok(reference)
    }

    #[instrument(skip(self))]
    async fn get_value(&self, reference: &str) -> Result<Vec<u8>> {
        let url = self.url_for("data", reference)?;

        let span = info_span!("vault.kv.read", http.method = "GET", url = %url);
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", self.token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        let json: Value = vault::error_for_status(&url, response).await?.json().await?;
        let encoded = json
            .get("data")
            .and_then(|data| data.get("data"))
            .and_then(|data| data.get(VALUE_FIELD))
            .and_then(Value::as_str)
            .with_context(|| format!("{VALUE_FIELD} missing from {reference}"))?;

        Base64::decode_vec(encoded).map_err(|e| anyhow!("{reference} is not valid base64: {e}"))
    }

    #[instrument(skip(self))]
    async fn destroy_version(&self, reference: &str) -> Result<()> {
        let url = self.url_for("metadata", reference)?;

        let span = info_span!("vault.kv.destroy", http.method = "DELETE", url = %url);
        let response = self
            .client
            .delete(&url)
            .header("X-Vault-Token", self.token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        // already gone
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        vault::error_for_status(&url, response).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::tests::can_bind_localhost;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(server: &MockServer) -> VaultSecretManager {
        let mut globals = GlobalArgs::new(server.uri());
        globals.set_token(SecretString::from("token".to_string()));
        VaultSecretManager::new(&globals, "/secret/").unwrap()
    }

    #[tokio::test]
    async fn create_version_writes_new_path() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v1/secret/data/rotator/secrets/[0-9A-Z]{26}$"))
            .and(header("X-Vault-Token", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"version": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reference = manager(&server)
            .create_version("rotator/secrets/", b"key")
            .await
            .unwrap();
        assert!(reference.starts_with("rotator/secrets/"));
    }

    #[tokio::test]
    async fn get_value_decodes_field() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/legacy/cookie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"data": {"value": "YWJj"}, "metadata": {"version": 3}}
            })))
            .mount(&server)
            .await;

        let value = manager(&server).get_value("legacy/cookie").await.unwrap();
        assert_eq!(value, b"abc");
    }

    #[tokio::test]
    async fn get_value_reports_vault_errors() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/missing"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errors": ["permission denied"]
            })))
            .mount(&server)
            .await;

        let err = manager(&server).get_value("missing").await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn destroy_version_tolerates_missing_path() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/v1/secret/metadata/rotator/secrets/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;

        manager(&server)
            .destroy_version("rotator/secrets/gone")
            .await
            .unwrap();
    }
}

use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info_span, instrument, Instrument};

/// Get DB credentials from Vault's database secrets engine for `role` and
/// store them, together with their lease, in `globals`.
/// # Errors
/// Returns an error if the Vault request fails or the response is missing expected fields.
#[instrument(skip(globals))]
pub async fn database_creds(globals: &mut GlobalArgs, role: &str) -> Result<()> {
    let client = vault::client()?;

    let db_creds = vault::endpoint_url(&globals.vault_url, &format!("/v1/database/creds/{role}"))?;

    let span = info_span!(
        "vault.database_creds",
        http.method = "GET",
        url = %db_creds
    );
    let response = client
        .get(&db_creds)
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    let json_response: Value = vault::error_for_status(&db_creds, response)
        .await?
        .json()
        .await?;

    let lease_id = json_response
        .get("lease_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_id found"))?;
    let lease_duration = json_response
        .get("lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))?;
    let username = json_response
        .get("data")
        .and_then(|v| v.get("username"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no username found"))?;
    let password = json_response
        .get("data")
        .and_then(|v| v.get("password"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no password found"))?;

    globals.vault_db_lease_id = lease_id.to_string();
    globals.vault_db_lease_duration = lease_duration;
    globals.vault_db_username = username.to_string();
    globals.vault_db_password = SecretString::from(password.to_string());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::tests::can_bind_localhost;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn database_creds_parses_fields() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/database/creds/rotator"))
            .and(header("X-Vault-Token", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lease_id": "database/creds/rotator/abc",
                "lease_duration": 3600,
                "data": {"username": "v-rotator", "password": "s3cret"}
            })))
            .mount(&server)
            .await;

        let mut globals = GlobalArgs::new(server.uri());
        globals.set_token(SecretString::from("token".to_string()));

        database_creds(&mut globals, "rotator").await.unwrap();

        assert_eq!(globals.vault_db_lease_id, "database/creds/rotator/abc");
        assert_eq!(globals.vault_db_lease_duration, 3600);
        assert_eq!(globals.vault_db_username, "v-rotator");
        assert_eq!(globals.vault_db_password.expose_secret(), "s3cret");
    }

    #[tokio::test]
    async fn database_creds_requires_password() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/database/creds/rotator"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lease_id": "id",
                "lease_duration": 60,
                "data": {"username": "v-rotator"}
            })))
            .mount(&server)
            .await;

        let mut globals = GlobalArgs::new(server.uri());
        let err = database_creds(&mut globals, "rotator").await.unwrap_err();
        assert!(err.to_string().contains("no password found"));
    }
}

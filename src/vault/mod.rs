pub mod database;
pub mod kv;
pub mod renew;

use crate::APP_USER_AGENT;
use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, info_span, instrument, Instrument};
use url::Url;

fn vault_error_message(json_response: &Value) -> &str {
    json_response
        .get("errors")
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

/// Turn a non-success Vault response into an error naming the endpoint.
pub(crate) async fn error_for_status(url: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let json_response: Value = response.json().await.unwrap_or(Value::Null);

    Err(anyhow!(
        "{} - {}, {}",
        url,
        status,
        vault_error_message(&json_response)
    ))
}

/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
#[instrument]
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// # Errors
/// Returns an error if `url` is not a valid Vault base URL.
pub fn approle_login_url(url: &str) -> Result<String> {
    endpoint_url(url, "/v1/auth/approle/login")
}

/// Unwrap a wrapped Vault client token
/// Create wrapped token with:
/// vault write -wrap-ttl=300s -f auth/approle/role/rotator/secret-id
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(token))]
pub async fn unwrap(url: &str, token: &str) -> Result<String> {
    let client = client()?;

    let unwrap_url = endpoint_url(url, "/v1/sys/wrapping/unwrap")?;

    let span = info_span!(
        "vault.unwrap",
        http.method = "POST",
        url = %unwrap_url
    );
    let response = client
        .post(&unwrap_url)
        .header("X-Vault-Token", token)
        .send()
        .instrument(span)
        .await?;

    let json_response: Value = error_for_status(&unwrap_url, response).await?.json().await?;
    let sid = json_response
        .get("data")
        .and_then(|v| v.get("secret_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))?;

    Ok(sid.to_string())
}

/// Login to Vault using `AppRole`
/// Create a secret ID with:
/// vault write -f auth/approle/role/rotator/secret-id
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(sid))]
pub async fn approle_login(url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let client = client()?;

    let login_payload = json!({
        "role_id": rid,
        "secret_id": sid
    });

    debug!("login URL: {}, role ID: {}", url, rid);

    let span = info_span!(
        "vault.approle_login",
        http.method = "POST",
        url = %url
    );
    let response = client
        .post(url)
        .json(&login_payload)
        .send()
        .instrument(span)
        .await?;

    let json_response: Value = error_for_status(url, response).await?.json().await?;
    let token = json_response
        .get("auth")
        .and_then(|v| v.get("client_token"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response
        .get("auth")
        .and_then(|v| v.get("lease_duration"))
        .and_then(Value::as_u64)
        .unwrap_or(1800);

    Ok((token.to_string(), lease_duration))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[test]
    fn endpoint_url_defaults_ports() {
        assert_eq!(
            endpoint_url("http://vault.tld", "/v1/test").unwrap(),
            "http://vault.tld:80/v1/test"
        );
        assert_eq!(
            endpoint_url("https://vault.tld", "/v1/test").unwrap(),
            "https://vault.tld:443/v1/test"
        );
        assert_eq!(
            approle_login_url("https://vault.tld:8200").unwrap(),
            "https://vault.tld:8200/v1/auth/approle/login"
        );
    }

    #[test]
    fn endpoint_url_rejects_unsupported_scheme() {
        let err = endpoint_url("ftp://vault.tld", "/v1/test").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[tokio::test]
    async fn unwrap_returns_secret_id() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/sys/wrapping/unwrap"))
            .and(header("X-Vault-Token", "wrapped-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"secret_id": "secret-123"}
            })))
            .mount(&server)
            .await;

        let secret_id = unwrap(&server.uri(), "wrapped-token").await.unwrap();
        assert_eq!(secret_id, "secret-123");
    }

    #[tokio::test]
    async fn approle_login_reports_vault_errors() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({
                "role_id": "role-id",
                "secret_id": "secret-id"
            })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["invalid role or secret ID"]
            })))
            .mount(&server)
            .await;

        let url = approle_login_url(&server.uri()).unwrap();
        let err = approle_login(&url, "secret-id", "role-id")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid role or secret ID"));
    }
}
